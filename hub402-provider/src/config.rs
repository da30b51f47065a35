//! Provider configuration.
//!
//! The provider never talks to the ledger itself; it only needs to know
//! what to charge, where payments go, and which facilitator verifies and
//! settles them. Missing required settings are fatal at startup.

use std::net::IpAddr;

use clap::Parser;

/// A base58 Solana public key is 32 bytes.
const PUBKEY_LEN: usize = 32;

/// Configuration errors detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `PAY_TO` is not a base58 32-byte public key.
    #[error("PAY_TO is not a base58-encoded 32-byte public key: {0}")]
    InvalidPayTo(String),
}

/// Resource server settings.
#[derive(Debug, Clone, Parser)]
#[command(name = "hub402-provider", about = "hub402 pay-per-call resource server")]
pub struct ProviderConfig {
    /// Bind address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Recipient address for payments. Required.
    #[arg(long, env = "PAY_TO")]
    pub pay_to: String,

    /// Asset (mint) identifier, or `native` for the network-native asset.
    #[arg(long, env = "ASSET", default_value = "native")]
    pub asset: String,

    /// Price per call in atomic units (a decimal string, passed through
    /// verbatim).
    #[arg(long, env = "AMOUNT_ATOMIC", default_value = "1")]
    pub amount_atomic: String,

    /// Protocol network identifier advertised in payment requirements.
    #[arg(long, env = "NETWORK", default_value = "solana-devnet")]
    pub network: String,

    /// Base URL of the facilitator performing verify/settle.
    #[arg(long, env = "FACILITATOR_URL", default_value = "http://localhost:8787")]
    pub facilitator_url: String,
}

impl ProviderConfig {
    /// Validates that `PAY_TO` decodes to a public key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPayTo`] otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bytes = bs58::decode(&self.pay_to)
            .into_vec()
            .map_err(|e| ConfigError::InvalidPayTo(e.to_string()))?;
        if bytes.len() != PUBKEY_LEN {
            return Err(ConfigError::InvalidPayTo(format!(
                "expected {PUBKEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pay_to_is_required() {
        assert!(ProviderConfig::try_parse_from(["hub402-provider"]).is_err());
    }

    #[test]
    fn validates_pay_to() {
        let mut config = ProviderConfig::try_parse_from([
            "hub402-provider",
            "--pay-to",
            "8dWkYkFkYBnpPsJLxKXJhWDZv4FH3wSJnVt2KLbU4q2j",
        ])
        .unwrap();
        config.validate().unwrap();

        config.pay_to = "tooshort".to_owned();
        assert!(config.validate().is_err());
    }
}
