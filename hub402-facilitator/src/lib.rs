//! The hub402 facilitator service.
//!
//! Exposes the facilitator HTTP surface (`/verify`, `/settle`, `/health`,
//! `/supported`) over an [`hub402_svm::ExactSvmFacilitator`], with durable
//! replay/idempotency stores, an auth/rate-limit gate, and environment
//! configuration.
//!
//! # Modules
//!
//! - [`config`] - Environment/CLI configuration
//! - [`store`] - File- and Redis-backed TTL store backends
//! - [`gate`] - API-key and per-IP minimum-interval middleware
//! - [`strategy`] - Verification strategy wiring (local vs strict delegate)
//! - [`handlers`] - Axum routes

pub mod config;
pub mod gate;
pub mod handlers;
pub mod store;
pub mod strategy;
