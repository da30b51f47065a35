//! Static inspection of client-supplied pre-signed transactions.
//!
//! A payment payload may embed a pre-built, partially-signed ledger
//! transaction. Before the facilitator co-signs and submits it, the
//! transaction is inspected without touching the network: the claimed payer
//! must appear among its signers, and a native-transfer first instruction
//! must move exactly the required amount to the required recipient.
//! Instructions targeting other programs are accepted here and enforced at
//! settlement time.

use hub402::encoding::Base64Bytes;
use hub402::proto::InvalidReason;
use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;

/// The system program, owner of native transfers.
pub const SYSTEM_PROGRAM_ID: Pubkey = pubkey!("11111111111111111111111111111111");

/// System-program instruction tag for `Transfer`.
pub(crate) const SYSTEM_TRANSFER_TAG: u32 = 2;

/// The embedded transaction bytes could not be decoded.
#[derive(Debug, thiserror::Error)]
#[error("cannot decode transaction: {0}")]
pub struct TransactionDecodeError(pub String);

/// A client-supplied transaction decoded from its base64 wire form.
#[derive(Debug, Clone)]
pub struct PreSignedTransaction {
    inner: VersionedTransaction,
}

/// One instruction with its account indices resolved to keys.
#[derive(Debug, Clone)]
pub struct InstructionView {
    /// Program the instruction targets.
    pub program_id: Pubkey,
    /// Raw instruction data.
    pub data: Vec<u8>,
    /// Accounts in instruction order.
    pub accounts: Vec<Pubkey>,
}

/// Decoded native `Transfer` instruction fields.
#[derive(Debug, Clone, Copy)]
pub struct SystemTransfer {
    /// Transfer amount in lamports.
    pub lamports: u64,
    /// Destination account.
    pub to: Pubkey,
}

impl From<VersionedTransaction> for PreSignedTransaction {
    fn from(inner: VersionedTransaction) -> Self {
        Self { inner }
    }
}

impl PreSignedTransaction {
    /// Decodes a base64 bincode-serialized transaction.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionDecodeError`] when the input is not base64 or
    /// not a serialized transaction.
    pub fn from_base64(encoded: &str) -> Result<Self, TransactionDecodeError> {
        let bytes = Base64Bytes::from(encoded)
            .decode()
            .map_err(|e| TransactionDecodeError(e.to_string()))?;
        let inner = bincode::deserialize::<VersionedTransaction>(&bytes)
            .map_err(|e| TransactionDecodeError(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Returns the wrapped transaction.
    #[must_use]
    pub const fn inner(&self) -> &VersionedTransaction {
        &self.inner
    }

    /// Consumes the wrapper.
    #[must_use]
    pub fn into_inner(self) -> VersionedTransaction {
        self.inner
    }

    /// Whether `signer` is a required signer that has actually signed.
    #[must_use]
    pub fn is_signed_by(&self, signer: &Pubkey) -> bool {
        let num_required = self.inner.message.header().num_required_signatures as usize;
        let static_keys = self.inner.message.static_account_keys();
        let required = &static_keys[..num_required.min(static_keys.len())];
        required.iter().position(|key| key == signer).is_some_and(|pos| {
            self.inner
                .signatures
                .get(pos)
                .is_some_and(|sig| *sig != Signature::default())
        })
    }

    /// Whether every required signature slot is filled.
    #[must_use]
    pub fn is_fully_signed(&self) -> bool {
        let num_required = self.inner.message.header().num_required_signatures as usize;
        self.inner.signatures.len() >= num_required
            && self
                .inner
                .signatures
                .iter()
                .take(num_required)
                .all(|sig| *sig != Signature::default())
    }

    /// Resolves the instruction at `index`, or `None` when the index or any
    /// of its account references is out of bounds.
    #[must_use]
    pub fn instruction(&self, index: usize) -> Option<InstructionView> {
        let instruction = self.inner.message.instructions().get(index)?;
        let static_keys = self.inner.message.static_account_keys();
        let program_id = *static_keys.get(instruction.program_id_index as usize)?;
        let accounts = instruction
            .accounts
            .iter()
            .map(|idx| static_keys.get(*idx as usize).copied())
            .collect::<Option<Vec<_>>>()?;
        Some(InstructionView {
            program_id,
            data: instruction.data.clone(),
            accounts,
        })
    }
}

/// Decodes a system-program instruction as a native transfer.
///
/// # Errors
///
/// Returns the [`InvalidReason`] naming the specific shape violation.
pub fn decode_system_transfer(view: &InstructionView) -> Result<SystemTransfer, InvalidReason> {
    if view.data.len() < 12 {
        return Err(InvalidReason::InvalidInstructionData);
    }
    let tag = u32::from_le_bytes(
        view.data[0..4]
            .try_into()
            .map_err(|_| InvalidReason::InvalidInstructionData)?,
    );
    if tag != SYSTEM_TRANSFER_TAG {
        return Err(InvalidReason::UnexpectedSystemIx);
    }
    let lamports = u64::from_le_bytes(
        view.data[4..12]
            .try_into()
            .map_err(|_| InvalidReason::InvalidInstructionData)?,
    );
    // Transfer accounts are [from, to].
    let to = view
        .accounts
        .get(1)
        .copied()
        .ok_or(InvalidReason::InvalidRecipient)?;
    Ok(SystemTransfer { lamports, to })
}

/// Serializes a transaction into its base64 wire form.
///
/// # Errors
///
/// Returns [`TransactionDecodeError`] if bincode serialization fails.
pub fn encode_transaction_base64(
    tx: &VersionedTransaction,
) -> Result<String, TransactionDecodeError> {
    let bytes = bincode::serialize(tx).map_err(|e| TransactionDecodeError(e.to_string()))?;
    Ok(Base64Bytes::encode(bytes).to_string())
}
