//! HTTP transport for the hub402 payment protocol.
//!
//! # Modules
//!
//! - [`constants`] - Header names and well-known paths
//! - [`headers`] - Base64 JSON codecs for payment headers
//! - [`error`] - Transport error types
//! - [`facilitator_client`] - Reqwest client for a remote facilitator
//! - [`server`] - The Guard middleware for axum resource servers

pub mod constants;
pub mod error;
pub mod facilitator_client;
pub mod headers;
pub mod server;

pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use server::{PaymentGuard, RouteTable};
