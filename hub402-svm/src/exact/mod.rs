//! The `exact` payment scheme on Solana.
//!
//! A payment is valid when it authorizes a transfer of exactly the required
//! amount to exactly the required recipient within its validity window, with
//! a fresh nonce. Settlement co-signs and submits the client's pre-signed
//! transaction, or (demo settlement only) transfers from the facilitator's
//! own account.

pub mod facilitator;
pub mod settle;
pub mod transaction;
pub mod verify;

pub use facilitator::{ExactFacilitatorError, ExactSvmFacilitator, FacilitatorOptions};
pub use settle::{IDEMPOTENCY_TTL, SettleOptions, SettlementMode, idempotency_key};
pub use transaction::PreSignedTransaction;
pub use verify::{DelegateError, NONCE_TTL, VerificationStrategy, VerifyDelegate};
