//! Core types for the hub402 pay-per-call payment protocol.
//!
//! hub402 realizes the x402 payment flow for HTTP APIs: a resource server
//! answers unpaid requests with `402 Payment Required` and a list of payment
//! requirements, the client retries with a signed payment authorization in a
//! request header, and a trusted facilitator verifies the authorization and
//! settles it against the ledger.
//!
//! This crate is the shared vocabulary of that flow. It contains no HTTP and
//! no chain code; those live in `hub402-http` and `hub402-svm`.
//!
//! # Modules
//!
//! - [`proto`] - Wire format types and machine-readable failure reasons
//! - [`timestamp`] - Unix timestamps for authorization validity windows
//! - [`encoding`] - Base64 helpers for header transport
//! - [`facilitator`] - The verify/settle/supported interface
//! - [`store`] - Key/TTL store contract used for replay and idempotency
//!   ledgers, with an in-memory reference backend

pub mod encoding;
pub mod facilitator;
pub mod proto;
pub mod store;
pub mod timestamp;
