//! The exact-scheme facilitator: verification and settlement over one
//! ledger provider and a pair of TTL stores.

use std::sync::Arc;

use hub402::facilitator::Facilitator;
use hub402::proto::{
    self, EXACT_SCHEME, SupportedPaymentKind, SupportedResponse,
};
use hub402::store::{StoreError, TtlStore};

use crate::chain::funding::FundingManager;
use crate::chain::provider::LedgerOps;
use crate::exact::settle::{SettleOptions, settle_payment};
use crate::exact::verify::{VerificationStrategy, verify_payment};

/// Behavior switches wired from service configuration.
#[derive(Debug)]
pub struct FacilitatorOptions {
    /// How verification is performed (local checks or strict delegate).
    pub strategy: VerificationStrategy,
    /// Settlement shape and demo gating.
    pub settle: SettleOptions,
    /// Skip the nonce replay check; test environments only.
    pub skip_replay_check: bool,
}

/// Infrastructure failures of the facilitator; protocol-level rejections
/// are response values, never this error.
#[derive(Debug, thiserror::Error)]
pub enum ExactFacilitatorError {
    /// A replay or idempotency store operation failed.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

/// [`Facilitator`] for the exact scheme on one Solana network.
pub struct ExactSvmFacilitator<L> {
    ledger: Arc<L>,
    funding: FundingManager<L>,
    nonce_store: Arc<dyn TtlStore>,
    idempotency_store: Arc<dyn TtlStore>,
    options: FacilitatorOptions,
}

impl<L> std::fmt::Debug for ExactSvmFacilitator<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExactSvmFacilitator")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<L: LedgerOps> ExactSvmFacilitator<L> {
    /// Assembles a facilitator over its injected dependencies.
    pub fn new(
        ledger: Arc<L>,
        funding: FundingManager<L>,
        nonce_store: Arc<dyn TtlStore>,
        idempotency_store: Arc<dyn TtlStore>,
        options: FacilitatorOptions,
    ) -> Self {
        Self {
            ledger,
            funding,
            nonce_store,
            idempotency_store,
            options,
        }
    }

    /// The ledger provider this facilitator settles against.
    #[must_use]
    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }
}

impl<L: LedgerOps> Facilitator for ExactSvmFacilitator<L> {
    type Error = ExactFacilitatorError;

    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, Self::Error> {
        let response = verify_payment(
            &request.payment_header,
            &request.payment_requirements,
            &self.options.strategy,
            self.nonce_store.as_ref(),
            self.options.skip_replay_check,
        )
        .await?;
        Ok(response)
    }

    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, Self::Error> {
        let response = settle_payment(
            self.ledger.as_ref(),
            &self.funding,
            self.idempotency_store.as_ref(),
            &self.options.settle,
            &request.payment_header,
            &request.payment_requirements,
        )
        .await?;
        Ok(response)
    }

    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        Ok(SupportedResponse {
            kinds: vec![SupportedPaymentKind {
                scheme: EXACT_SCHEME.to_owned(),
                network: self.ledger.network().id().to_owned(),
            }],
        })
    }
}
