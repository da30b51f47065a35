//! The verification and settlement interface of a payment facilitator.
//!
//! Implementors validate incoming payment headers against payment
//! requirements ([`Facilitator::verify`]) and commit ledger transactions
//! realizing the payment ([`Facilitator::settle`]). The Guard middleware is
//! written against this trait, so it works identically over the HTTP client
//! to a remote facilitator and over an in-process implementation in tests.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Arc;

use crate::proto;

/// Asynchronous interface for payment facilitators.
///
/// Verification failures are **values** ([`proto::VerifyResponse::Invalid`]
/// with a reason token), not errors; `Err` is reserved for transport and
/// infrastructure failures where no protocol-level verdict exists.
pub trait Facilitator {
    /// The transport/infrastructure error type.
    type Error: Debug + Display;

    /// Checks a payment header against the payment requirements.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] only when no verdict could be produced
    /// (e.g. the facilitator is unreachable).
    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send;

    /// Commits a ledger transaction realizing the payment.
    ///
    /// Settlement is idempotent over the payment header content: replaying
    /// an identical header after a prior success yields a duplicate
    /// indicator, never a second transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] only when no settlement verdict could be
    /// produced.
    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send;

    /// Lists the payment kinds this facilitator can process.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] when the listing cannot be produced.
    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send;
}

impl<T: Facilitator + Send + Sync> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> impl Future<Output = Result<proto::VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> impl Future<Output = Result<proto::SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<proto::SupportedResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
