//! Base64 helpers for header transport.
//!
//! Payment payloads and settlement receipts travel in HTTP headers as
//! base64-encoded JSON. [`Base64Bytes`] keeps the encoded form as bytes so
//! header values can be built and parsed without intermediate copies.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use std::fmt::Display;

/// Bytes holding a base64-encoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    /// Encodes raw bytes into their base64 representation.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Self {
        Self(B64.encode(input.as_ref()).into_bytes())
    }

    /// Decodes the held base64 text back into raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the held bytes are not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        B64.decode(&self.0)
    }
}

impl AsRef<[u8]> for Base64Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Base64Bytes {
    fn from(slice: &[u8]) -> Self {
        Self(slice.to_vec())
    }
}

impl From<&str> for Base64Bytes {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl Display for Base64Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}
