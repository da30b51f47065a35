//! The ledger provider: RPC access, fee-payer signing, confirmation.
//!
//! [`SolanaLedger`] is the production implementation over the nonblocking
//! RPC client. The [`LedgerOps`] trait is the seam the verifier, settler and
//! funding manager are written against, so their logic is testable without a
//! cluster.

use std::sync::Arc;
use std::time::Duration;

use solana_account::Account;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_keypair::Keypair;
use solana_message::Hash;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::{Signer, SignerError};
use solana_transaction::versioned::VersionedTransaction;

use super::types::{Address, SolanaNetwork};

/// How long to wait for a submitted transaction to confirm.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll interval while waiting for confirmation.
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Errors surfaced by the ledger provider.
#[derive(Debug, thiserror::Error)]
pub enum SolanaLedgerError {
    /// Signing with the fee-payer keypair failed.
    #[error(transparent)]
    Signer(#[from] SignerError),
    /// The RPC transport failed.
    #[error(transparent)]
    Transport(Box<ClientErrorKind>),
    /// The ledger rejected the transaction or request.
    #[error("ledger rejected request: {0}")]
    Rejected(String),
    /// The transaction was submitted but not confirmed in time. The caller
    /// must treat this as status unknown, not as failure.
    #[error("transaction {0} not confirmed before the deadline")]
    ConfirmTimeout(Signature),
}

impl From<ClientError> for SolanaLedgerError {
    fn from(value: ClientError) -> Self {
        Self::Transport(value.kind)
    }
}

/// Ledger operations the payment protocol needs.
///
/// Implemented by [`SolanaLedger`] for production and by scripted mocks in
/// tests. All submission methods block until confirmation or error; there is
/// no cancellation once a transaction has been sent.
#[async_trait::async_trait]
pub trait LedgerOps: Send + Sync {
    /// The cluster this provider talks to.
    fn network(&self) -> SolanaNetwork;

    /// The facilitator operating (fee-payer) address.
    fn fee_payer(&self) -> Address;

    /// The fee-payer public key.
    fn pubkey(&self) -> Pubkey;

    /// Attaches the fee-payer signature to `tx` at its required-signer slot.
    ///
    /// # Errors
    ///
    /// Fails if the fee payer is not among the transaction's required
    /// signers or message signing fails.
    fn sign(&self, tx: VersionedTransaction) -> Result<VersionedTransaction, SolanaLedgerError>;

    /// Current lamport balance of the operating account.
    async fn balance(&self) -> Result<u64, SolanaLedgerError>;

    /// A recent blockhash for transaction construction.
    async fn latest_blockhash(&self) -> Result<Hash, SolanaLedgerError>;

    /// Fetches an account, `None` when it does not exist.
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, SolanaLedgerError>;

    /// Submits a transaction and waits for confirmed commitment.
    async fn send_and_confirm(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, SolanaLedgerError>;

    /// Requests faucet funds for the operating account and waits for the
    /// credit to confirm.
    async fn request_airdrop(&self, lamports: u64) -> Result<Signature, SolanaLedgerError>;

    /// Version string of the RPC node, as a reachability probe.
    async fn node_version(&self) -> Result<String, SolanaLedgerError>;
}

/// Places `keypair`'s signature into its required-signer slot of `tx`.
///
/// # Errors
///
/// Fails if the keypair is not a required signer of the message.
pub fn sign_transaction(
    keypair: &Keypair,
    mut tx: VersionedTransaction,
) -> Result<VersionedTransaction, SolanaLedgerError> {
    let message_bytes = tx.message.serialize();
    let signature = keypair.try_sign_message(&message_bytes)?;
    let num_required = tx.message.header().num_required_signatures as usize;
    let static_keys = tx.message.static_account_keys();
    let required = &static_keys[..num_required.min(static_keys.len())];
    let pos = required
        .iter()
        .position(|key| *key == keypair.pubkey())
        .ok_or_else(|| {
            SolanaLedgerError::Rejected("signer is not a required signer of the transaction".into())
        })?;
    if tx.signatures.len() < num_required {
        tx.signatures.resize(num_required, Signature::default());
    }
    tx.signatures[pos] = signature;
    Ok(tx)
}

/// Production ledger provider over the nonblocking RPC client.
pub struct SolanaLedger {
    network: SolanaNetwork,
    keypair: Arc<Keypair>,
    rpc: RpcClient,
    commitment: CommitmentConfig,
}

impl std::fmt::Debug for SolanaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaLedger")
            .field("network", &self.network)
            .field("fee_payer", &self.keypair.pubkey())
            .field("rpc_url", &self.rpc.url())
            .finish()
    }
}

impl SolanaLedger {
    /// Creates a provider for `network` talking to `rpc_url`, paying fees
    /// from `keypair`.
    #[must_use]
    pub fn new(rpc_url: String, keypair: Keypair, network: SolanaNetwork) -> Self {
        tracing::info!(
            network = %network,
            rpc = %rpc_url,
            fee_payer = %keypair.pubkey(),
            "initialized Solana ledger provider"
        );
        Self {
            network,
            keypair: Arc::new(keypair),
            rpc: RpcClient::new(rpc_url),
            commitment: CommitmentConfig::confirmed(),
        }
    }

    async fn confirm(&self, signature: &Signature) -> Result<(), SolanaLedgerError> {
        let deadline = tokio::time::Instant::now() + CONFIRM_TIMEOUT;
        loop {
            let confirmed = self
                .rpc
                .confirm_transaction_with_commitment(signature, self.commitment)
                .await?;
            if confirmed.value {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SolanaLedgerError::ConfirmTimeout(*signature));
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }
    }
}

#[async_trait::async_trait]
impl LedgerOps for SolanaLedger {
    fn network(&self) -> SolanaNetwork {
        self.network
    }

    fn fee_payer(&self) -> Address {
        Address::new(self.keypair.pubkey())
    }

    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn sign(&self, tx: VersionedTransaction) -> Result<VersionedTransaction, SolanaLedgerError> {
        sign_transaction(&self.keypair, tx)
    }

    async fn balance(&self) -> Result<u64, SolanaLedgerError> {
        let balance = self.rpc.get_balance(&self.keypair.pubkey()).await?;
        Ok(balance)
    }

    async fn latest_blockhash(&self) -> Result<Hash, SolanaLedgerError> {
        let blockhash = self.rpc.get_latest_blockhash().await?;
        Ok(blockhash)
    }

    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>, SolanaLedgerError> {
        let response = self
            .rpc
            .get_account_with_commitment(pubkey, self.commitment)
            .await?;
        Ok(response.value)
    }

    async fn send_and_confirm(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, SolanaLedgerError> {
        let signature = self.rpc.send_transaction(tx).await?;
        self.confirm(&signature).await?;
        Ok(signature)
    }

    async fn request_airdrop(&self, lamports: u64) -> Result<Signature, SolanaLedgerError> {
        let signature = self
            .rpc
            .request_airdrop(&self.keypair.pubkey(), lamports)
            .await?;
        self.confirm(&signature).await?;
        Ok(signature)
    }

    async fn node_version(&self) -> Result<String, SolanaLedgerError> {
        let version = self.rpc.get_version().await?;
        Ok(version.solana_core)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted [`LedgerOps`] implementation for crate tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    /// In-memory ledger with a scriptable faucet and a transaction log.
    pub(crate) struct MockLedger {
        pub network: SolanaNetwork,
        pub keypair: Keypair,
        pub balance: AtomicU64,
        /// Upcoming faucet outcomes; `Ok(n)` credits `n` lamports. When the
        /// queue is empty, airdrops succeed and credit the requested amount.
        pub airdrops: Mutex<VecDeque<Result<u64, String>>>,
        pub airdrop_calls: AtomicU64,
        pub airdrop_requests: Mutex<Vec<u64>>,
        pub sent: Mutex<Vec<VersionedTransaction>>,
        pub accounts: Mutex<HashMap<Pubkey, Account>>,
    }

    impl MockLedger {
        pub(crate) fn new(balance: u64) -> Self {
            Self {
                network: SolanaNetwork::Devnet,
                keypair: Keypair::new(),
                balance: AtomicU64::new(balance),
                airdrops: Mutex::new(VecDeque::new()),
                airdrop_calls: AtomicU64::new(0),
                airdrop_requests: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                accounts: Mutex::new(HashMap::new()),
            }
        }

        pub(crate) fn script_airdrops(&self, outcomes: Vec<Result<u64, String>>) {
            *self.airdrops.lock().unwrap() = outcomes.into();
        }

        pub(crate) fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl LedgerOps for MockLedger {
        fn network(&self) -> SolanaNetwork {
            self.network
        }

        fn fee_payer(&self) -> Address {
            Address::new(self.keypair.pubkey())
        }

        fn pubkey(&self) -> Pubkey {
            self.keypair.pubkey()
        }

        fn sign(&self, tx: VersionedTransaction) -> Result<VersionedTransaction, SolanaLedgerError> {
            sign_transaction(&self.keypair, tx)
        }

        async fn balance(&self) -> Result<u64, SolanaLedgerError> {
            Ok(self.balance.load(Ordering::SeqCst))
        }

        async fn latest_blockhash(&self) -> Result<Hash, SolanaLedgerError> {
            Ok(Hash::default())
        }

        async fn get_account(
            &self,
            pubkey: &Pubkey,
        ) -> Result<Option<Account>, SolanaLedgerError> {
            Ok(self.accounts.lock().unwrap().get(pubkey).cloned())
        }

        async fn send_and_confirm(
            &self,
            tx: &VersionedTransaction,
        ) -> Result<Signature, SolanaLedgerError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(tx.clone());
            let n = u8::try_from(sent.len()).unwrap_or(u8::MAX);
            Ok(Signature::from([n; 64]))
        }

        async fn request_airdrop(&self, lamports: u64) -> Result<Signature, SolanaLedgerError> {
            self.airdrop_calls.fetch_add(1, Ordering::SeqCst);
            self.airdrop_requests.lock().unwrap().push(lamports);
            let outcome = self
                .airdrops
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(lamports));
            match outcome {
                Ok(credit) => {
                    self.balance.fetch_add(credit, Ordering::SeqCst);
                    Ok(Signature::default())
                }
                Err(message) => Err(SolanaLedgerError::Rejected(message)),
            }
        }

        async fn node_version(&self) -> Result<String, SolanaLedgerError> {
            Ok("mock".to_owned())
        }
    }
}
