//! The Guard: resource-server middleware enforcing the payment protocol.
//!
//! The Guard wraps an axum service with a [`RouteTable`] of payment
//! requirements. Requests to unguarded routes pass straight through.
//! Guarded requests without an `x-payment` header are challenged with a
//! 402; with one, the Guard asks its facilitator to verify then settle the
//! payment, attaches the settlement receipt to the response, and only then
//! lets the protected handler run.

pub mod guard;
mod paygate;
pub mod well_known;

pub use guard::{PaymentGuard, PaymentGuardService, RouteTable};
pub use well_known::{GuardedRoute, WellKnownCatalog, catalog};
