//! Operating-account funding with bounded faucet retries.
//!
//! The facilitator pays ledger fees (and, in authorization-only demo mode,
//! the transfer amount) from its own account. On faucet-backed clusters the
//! [`FundingManager`] tops that account up when a settlement finds it short.
//! Public faucets rate-limit aggressively, so requests walk down decreasing
//! amount tiers with a bounded number of attempts per tier and a longer
//! fixed cooldown whenever the faucet signals a rate limit.
//!
//! Exhaustion is reported, not fatal: the settler decides whether to abort.

use std::sync::Arc;
use std::time::Duration;

use super::provider::{LedgerOps, SolanaLedgerError};
use super::types::LAMPORTS_PER_SOL;

/// Retry shape for faucet requests.
///
/// Defaults match public devnet faucet behavior. Tests inject millisecond
/// delays so no test ever sleeps for real.
#[derive(Debug, Clone)]
pub struct FundingConfig {
    /// Lamports requested at the largest tier; further tiers halve and
    /// quarter this.
    pub request_amount: u64,
    /// Attempts per amount tier.
    pub max_attempts: u32,
    /// Delay before the second attempt of a tier.
    pub initial_delay: Duration,
    /// Additional delay per subsequent attempt.
    pub delay_step: Duration,
    /// Upper bound for the per-attempt delay.
    pub max_delay: Duration,
    /// Fixed cooldown after a rate-limit signal.
    pub rate_limit_cooldown: Duration,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            request_amount: 2 * LAMPORTS_PER_SOL,
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            delay_step: Duration::from_secs(5),
            max_delay: Duration::from_secs(20),
            rate_limit_cooldown: Duration::from_secs(15),
        }
    }
}

/// Why the operating account could not be funded.
#[derive(Debug, thiserror::Error)]
pub enum FundingError {
    /// Funding only applies to auto-provisioned accounts on faucet-backed
    /// clusters.
    #[error("automatic funding is disabled for this deployment")]
    Disabled,
    /// Every tier exhausted its attempt budget.
    #[error("faucet funding exhausted after {attempts} attempts")]
    Exhausted {
        /// Total requests made across all tiers.
        attempts: u32,
    },
}

/// Keeps the facilitator operating balance above what settlements need.
pub struct FundingManager<L> {
    ledger: Arc<L>,
    enabled: bool,
    config: FundingConfig,
}

impl<L> std::fmt::Debug for FundingManager<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundingManager")
            .field("enabled", &self.enabled)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<L: LedgerOps> FundingManager<L> {
    /// Creates a manager over `ledger`. `enabled` should be `true` only for
    /// auto-provisioned fee payers on faucet-backed clusters.
    pub fn new(ledger: Arc<L>, enabled: bool, config: FundingConfig) -> Self {
        Self {
            ledger,
            enabled,
            config,
        }
    }

    /// Whether this manager will attempt faucet requests at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Ensures the operating balance is at least `minimum_balance`,
    /// requesting faucet funds if it is not.
    ///
    /// Returns as soon as one faucet request confirms; the caller re-checks
    /// the balance afterwards, since a smaller tier may have been granted.
    ///
    /// # Errors
    ///
    /// [`FundingError::Disabled`] when funding does not apply to this
    /// deployment, [`FundingError::Exhausted`] when every tier failed.
    /// Ledger read failures surface as [`SolanaLedgerError`] via
    /// [`FundingError`]-free propagation in the balance probe.
    pub async fn ensure_funded(&self, minimum_balance: u64) -> Result<(), FundingError> {
        match self.ledger.balance().await {
            Ok(balance) if balance >= minimum_balance => return Ok(()),
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(error = %error, "balance probe failed before funding");
            }
        }
        if !self.enabled {
            return Err(FundingError::Disabled);
        }

        let tiers = [
            self.config.request_amount,
            self.config.request_amount / 2,
            self.config.request_amount / 4,
        ];
        let mut attempts_total = 0u32;

        for amount in tiers {
            for attempt in 0..self.config.max_attempts {
                if attempt > 0 {
                    let delay = (self.config.initial_delay
                        + self.config.delay_step * (attempt - 1))
                        .min(self.config.max_delay);
                    tracing::info!(attempt, ?delay, amount, "waiting before faucet retry");
                    tokio::time::sleep(delay).await;
                }
                attempts_total += 1;
                match self.ledger.request_airdrop(amount).await {
                    Ok(signature) => {
                        tracing::info!(%signature, amount, "faucet request confirmed");
                        return Ok(());
                    }
                    Err(error) if is_rate_limit(&error) => {
                        tracing::warn!(attempt, error = %error, "faucet rate limited, cooling down");
                        tokio::time::sleep(self.config.rate_limit_cooldown).await;
                    }
                    Err(error) => {
                        tracing::warn!(attempt, amount, error = %error, "faucet request failed");
                    }
                }
            }
        }

        tracing::warn!(attempts = attempts_total, "faucet funding exhausted at every tier");
        Err(FundingError::Exhausted {
            attempts: attempts_total,
        })
    }
}

/// Whether a ledger error looks like an external rate-limit response.
fn is_rate_limit(error: &SolanaLedgerError) -> bool {
    let message = error.to_string();
    message.contains("429")
        || message.contains("Too Many Requests")
        || message.to_ascii_lowercase().contains("rate limit")
}
