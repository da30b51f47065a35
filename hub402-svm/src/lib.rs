//! Solana support for the hub402 payment protocol.
//!
//! This crate realizes the protocol's Ledger capability on Solana and builds
//! the facilitator's verification and settlement logic on top of it:
//!
//! - [`chain`] - The [`SolanaLedger`](chain::SolanaLedger) provider (RPC,
//!   fee-payer keypair, confirmation), the [`LedgerOps`](chain::LedgerOps)
//!   seam that tests mock, and the [`FundingManager`](chain::FundingManager)
//!   that keeps the operating account capitalized on non-production
//!   networks.
//! - [`exact`] - The `exact` payment scheme: the ordered verification
//!   algorithm, the settlement variants, and
//!   [`ExactSvmFacilitator`](exact::ExactSvmFacilitator) tying both to the
//!   replay/idempotency stores.

pub mod chain;
pub mod exact;

pub use chain::{Address, FundingManager, LedgerOps, SolanaLedger, SolanaNetwork};
pub use exact::ExactSvmFacilitator;
