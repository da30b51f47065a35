//! Facilitator configuration from environment variables and CLI flags.
//!
//! Every setting has an environment variable; a `.env` file is loaded at
//! startup. Missing or invalid required values are fatal: the process logs
//! the failure and exits before serving a single request.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use solana_keypair::Keypair;
use url::Url;

use hub402_svm::chain::types::SolanaNetwork;
use hub402_svm::exact::SettlementMode;

/// A fee-payer secret key of 64 bytes, base58-encoded.
const FEE_PAYER_SECRET_LEN: usize = 64;

/// Configuration errors detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `FEE_PAYER_SECRET` is not a base58 64-byte keypair.
    #[error("FEE_PAYER_SECRET is not a base58-encoded 64-byte keypair: {0}")]
    InvalidFeePayerSecret(String),
}

/// Facilitator service settings.
#[derive(Debug, Clone, Parser)]
#[command(name = "hub402-facilitator", about = "hub402 payment facilitator service")]
pub struct FacilitatorConfig {
    /// Bind address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 8787)]
    pub port: u16,

    /// Solana cluster to settle on.
    #[arg(long, env = "NETWORK", default_value = "devnet")]
    pub network: SolanaNetwork,

    /// RPC endpoint override; defaults to the cluster's public endpoint.
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: Option<String>,

    /// Base58 secret key of the operating (fee-payer) account. When unset,
    /// an ephemeral keypair is generated and auto-funded on faucet
    /// networks.
    #[arg(long, env = "FEE_PAYER_SECRET", hide_env_values = true)]
    pub fee_payer_secret: Option<String>,

    /// When set, every request must carry this value in `x-api-key`.
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Transfer shape for authorization-only settlement.
    #[arg(long, env = "SETTLEMENT_MODE", default_value = "native")]
    pub settlement_mode: SettlementMode,

    /// Base URL of a reference facilitator to delegate verification to
    /// (strict mode). Unset means local verification.
    #[arg(long, env = "STRICT_VERIFIER_URL")]
    pub strict_verifier_url: Option<Url>,

    /// Disable the per-IP minimum-interval rate limit.
    #[arg(long, env = "DISABLE_RATE_LIMIT", default_value_t = false)]
    pub disable_rate_limit: bool,

    /// Minimum milliseconds between requests from one client IP.
    #[arg(long, env = "RATE_LIMIT_MIN_INTERVAL_MS", default_value_t = 250)]
    pub rate_limit_min_interval_ms: u64,

    /// Disable nonce replay protection. Test environments only.
    #[arg(long, env = "DISABLE_NONCE_REPLAY", default_value_t = false)]
    pub disable_nonce_replay: bool,

    /// Allow authorization-only settlement paid from the facilitator's own
    /// funds. Strictly a non-production behavior.
    #[arg(long, env = "DEMO_MODE", default_value_t = false)]
    pub demo_mode: bool,

    /// Redis URL for the shared replay/idempotency stores. Required for
    /// multi-replica deployments; unset falls back to the local file store.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Directory for the file-backed stores.
    #[arg(long, env = "STORE_DIR", default_value = "data")]
    pub store_dir: PathBuf,
}

impl FacilitatorConfig {
    /// The RPC endpoint to use, explicit or cluster default.
    #[must_use]
    pub fn rpc_url(&self) -> String {
        self.rpc_url
            .clone()
            .unwrap_or_else(|| self.network.default_rpc_url().to_owned())
    }

    /// Decodes the configured fee payer, or generates an ephemeral one.
    ///
    /// Returns the keypair and whether it was auto-generated (which is what
    /// gates automatic faucet funding).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFeePayerSecret`] when the configured
    /// secret does not decode to a 64-byte keypair.
    pub fn fee_payer(&self) -> Result<(Keypair, bool), ConfigError> {
        match self.fee_payer_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => {
                let bytes = bs58::decode(secret)
                    .into_vec()
                    .map_err(|e| ConfigError::InvalidFeePayerSecret(e.to_string()))?;
                if bytes.len() != FEE_PAYER_SECRET_LEN {
                    return Err(ConfigError::InvalidFeePayerSecret(format!(
                        "expected {FEE_PAYER_SECRET_LEN} bytes, got {}",
                        bytes.len()
                    )));
                }
                Ok((Keypair::from_base58_string(secret), false))
            }
            None => Ok((Keypair::new(), true)),
        }
    }
}
