//! Base64 JSON codecs for the `x-payment` and `x-payment-response` headers.
//!
//! The Guard forwards the `x-payment` header to the facilitator verbatim;
//! these codecs exist for clients constructing payments and for tests and
//! tooling reading settlement receipts.

use hub402::encoding::Base64Bytes;
use hub402::proto::{PaymentPayload, SettleResponse};

use crate::error::HttpError;

/// Encodes a payment payload for the `x-payment` request header.
///
/// # Errors
///
/// Returns [`HttpError::Json`] if serialization fails.
pub fn encode_payment_payload(payload: &PaymentPayload) -> Result<String, HttpError> {
    let json = serde_json::to_vec(payload)?;
    Ok(Base64Bytes::encode(json).to_string())
}

/// Decodes an `x-payment` header value.
///
/// # Errors
///
/// Returns [`HttpError`] on base64 or JSON failure.
pub fn decode_payment_payload(header_value: &str) -> Result<PaymentPayload, HttpError> {
    let bytes = Base64Bytes::from(header_value.trim()).decode()?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Encodes a settlement receipt for the `x-payment-response` header.
///
/// # Errors
///
/// Returns [`HttpError::Json`] if serialization fails.
pub fn encode_payment_response(response: &SettleResponse) -> Result<String, HttpError> {
    let json = serde_json::to_vec(response)?;
    Ok(Base64Bytes::encode(json).to_string())
}

/// Decodes an `x-payment-response` header value.
///
/// # Errors
///
/// Returns [`HttpError`] on base64 or JSON failure.
pub fn decode_payment_response(header_value: &str) -> Result<SettleResponse, HttpError> {
    let bytes = Base64Bytes::from(header_value.trim()).decode()?;
    Ok(serde_json::from_slice(&bytes)?)
}
