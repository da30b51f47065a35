//! HTTP-level names used by the hub402 protocol.

/// Request header carrying the base64 payment payload (client → server).
/// Matched case-insensitively, as all HTTP headers are.
pub const X_PAYMENT_HEADER: &str = "x-payment";

/// Response header carrying the base64 settlement receipt (server → client).
pub const X_PAYMENT_RESPONSE_HEADER: &str = "x-payment-response";

/// Path serving the guarded-route catalog on a resource server.
pub const WELL_KNOWN_X402_PATH: &str = "/.well-known/x402";
