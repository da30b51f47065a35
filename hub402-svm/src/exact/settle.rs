//! Payment settlement for the exact scheme.
//!
//! [`settle_payment`] commits one ledger transaction per unique payment
//! header. The idempotency key is a content hash of the raw header:
//! replaying a byte-identical header after a prior success returns the
//! duplicate indicator without touching the ledger again.
//!
//! The settlement shape is decided exactly once per request as a
//! [`SettlementVariant`]: co-sign and submit a client-supplied transaction,
//! or (only with demo settlement enabled) transfer from the facilitator's
//! own account, natively or in SPL tokens. Submission is attempted exactly
//! once; a failed or timed-out submission is reported, never resubmitted,
//! since retrying a possibly-landed transaction risks a double spend.

use std::time::Duration;

use sha2::{Digest, Sha256};
use solana_message::{VersionedMessage, v0::Message as MessageV0};
use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
use solana_transaction::Instruction;
use solana_transaction::versioned::VersionedTransaction;
use spl_token::solana_program::instruction::AccountMeta;
use spl_token::solana_program::program_pack::Pack;

use hub402::encoding::Base64Bytes;
use hub402::proto::{PaymentPayload, PaymentRequirements, SettleErrorReason, SettleResponse};
use hub402::store::{StoreError, TtlStore};

use crate::chain::funding::FundingManager;
use crate::chain::provider::{LedgerOps, SolanaLedgerError};
use crate::chain::types::Address;
use crate::exact::transaction::{PreSignedTransaction, SYSTEM_PROGRAM_ID, SYSTEM_TRANSFER_TAG};

/// How long a settled header blocks re-settlement.
pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(10 * 60);

/// Flat fee estimate guarding the balance check before submission.
pub const TX_FEE_ESTIMATE_LAMPORTS: u64 = 5_000;

/// The associated-token-account program.
const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Which transfer the facilitator produces when the client did not supply a
/// transaction (demo settlement only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementMode {
    /// Native transfer in lamports.
    Native,
    /// SPL `TransferChecked` of the configured asset.
    Spl,
}

impl std::str::FromStr for SettlementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Self::Native),
            "spl" => Ok(Self::Spl),
            other => Err(format!("unknown settlement mode {other:?} (expected native or spl)")),
        }
    }
}

impl std::fmt::Display for SettlementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Native => "native",
            Self::Spl => "spl",
        })
    }
}

/// Settlement behavior switches.
#[derive(Debug, Clone, Copy)]
pub struct SettleOptions {
    /// Transfer shape for authorization-only payloads.
    pub mode: SettlementMode,
    /// Allow settling authorization-only payloads from the facilitator's
    /// own funds. Strictly a non-production behavior; with this off, a
    /// payload without a pre-signed transaction fails with
    /// `missing_transaction`.
    pub demo_settlement: bool,
}

/// The single per-request decision of what will be submitted.
enum SettlementVariant {
    /// Co-sign and submit the client's transaction.
    ClientTransaction(PreSignedTransaction),
    /// Facilitator-funded native transfer (demo settlement).
    NativeTransfer { lamports: u64, pay_to: Address },
    /// Facilitator-funded SPL transfer (demo settlement).
    TokenTransfer {
        mint: Address,
        amount: u64,
        pay_to: Address,
    },
}

/// Internal failure carrying the classified reason and loggable detail.
struct Failure {
    reason: SettleErrorReason,
    detail: String,
}

impl Failure {
    fn new(reason: SettleErrorReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl From<SolanaLedgerError> for Failure {
    fn from(error: SolanaLedgerError) -> Self {
        Self {
            reason: classify_ledger_error(&error),
            detail: error.to_string(),
        }
    }
}

/// Maps a ledger error onto the stable settlement reason vocabulary.
fn classify_ledger_error(error: &SolanaLedgerError) -> SettleErrorReason {
    let message = error.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("insufficient") {
        SettleErrorReason::InsufficientFunds
    } else if lowered.contains("blockhash") {
        SettleErrorReason::InvalidBlockhash
    } else if lowered.contains("signature") {
        SettleErrorReason::SignatureError
    } else {
        SettleErrorReason::UnknownError
    }
}

/// The deterministic deduplication key for a payment header.
#[must_use]
pub fn idempotency_key(payment_header: &str) -> String {
    hex::encode(Sha256::digest(payment_header.as_bytes()))
}

/// Settles a payment header against the ledger.
///
/// # Errors
///
/// Returns [`StoreError`] only when the idempotency store fails; every
/// settlement-level failure is a [`SettleResponse::Failed`] value.
pub async fn settle_payment<L: LedgerOps>(
    ledger: &L,
    funding: &FundingManager<L>,
    idempotency_store: &dyn TtlStore,
    options: &SettleOptions,
    payment_header: &str,
    requirements: &PaymentRequirements,
) -> Result<SettleResponse, StoreError> {
    let network_id = ledger.network().id().to_owned();

    let outcome = settle_inner(
        ledger,
        funding,
        idempotency_store,
        options,
        payment_header,
        requirements,
        &network_id,
    )
    .await?;

    match outcome {
        Ok(response) => Ok(response),
        Err(failure) => {
            tracing::error!(
                reason = %failure.reason,
                detail = %failure.detail,
                resource = %requirements.resource,
                fee_payer = %ledger.fee_payer(),
                "settlement failed"
            );
            let mut response = SettleResponse::failed(failure.reason, network_id);
            if failure.reason == SettleErrorReason::InsufficientFunds {
                if let SettleResponse::Failed { fee_payer, help, .. } = &mut response {
                    let address = ledger.fee_payer().to_string();
                    if ledger.network().has_faucet() {
                        *help = Some(format!(
                            "fund the fee payer manually: solana airdrop 2 {address} --url {}",
                            ledger.network()
                        ));
                    }
                    *fee_payer = Some(address);
                }
            }
            Ok(response)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn settle_inner<L: LedgerOps>(
    ledger: &L,
    funding: &FundingManager<L>,
    idempotency_store: &dyn TtlStore,
    options: &SettleOptions,
    payment_header: &str,
    requirements: &PaymentRequirements,
    network_id: &str,
) -> Result<Result<SettleResponse, Failure>, StoreError> {
    let Some(payload) = decode_header(payment_header) else {
        return Ok(Err(Failure::new(
            SettleErrorReason::UnknownError,
            "payment header is not base64 payload JSON",
        )));
    };
    let payer = payload.payload.authorization.from.clone();
    if payer.is_empty() {
        return Ok(Err(Failure::new(
            SettleErrorReason::MissingPayerAddress,
            "payment authorization carries no payer address",
        )));
    }

    let key = idempotency_key(payment_header);
    if idempotency_store.contains(&key).await? {
        tracing::info!(resource = %requirements.resource, "duplicate settlement, no new transaction");
        return Ok(Ok(SettleResponse::duplicate(
            network_id.to_owned(),
            Some(payer),
        )));
    }

    let variant = match decide_variant(&payload, options, requirements) {
        Ok(variant) => variant,
        Err(failure) => return Ok(Err(failure)),
    };

    if let Err(failure) = ensure_balance(ledger, funding, &variant).await {
        return Ok(Err(failure));
    }

    let signature = match submit(ledger, variant).await {
        Ok(signature) => signature,
        Err(failure) => return Ok(Err(failure)),
    };

    idempotency_store.put(&key, IDEMPOTENCY_TTL).await?;
    tracing::info!(
        %signature,
        resource = %requirements.resource,
        payer = %payer,
        "settlement confirmed"
    );
    Ok(Ok(SettleResponse::success(
        signature.to_string(),
        network_id.to_owned(),
        Some(payer),
    )))
}

fn decode_header(header: &str) -> Option<PaymentPayload> {
    let bytes = Base64Bytes::from(header).decode().ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn decide_variant(
    payload: &PaymentPayload,
    options: &SettleOptions,
    requirements: &PaymentRequirements,
) -> Result<SettlementVariant, Failure> {
    if let Some(tx_b64) = payload.payload.transaction.as_deref() {
        let tx = PreSignedTransaction::from_base64(tx_b64).map_err(|e| {
            Failure::new(SettleErrorReason::UnknownError, format!("client transaction: {e}"))
        })?;
        return Ok(SettlementVariant::ClientTransaction(tx));
    }

    if !options.demo_settlement {
        return Err(Failure::new(
            SettleErrorReason::MissingTransaction,
            "authorization-only settlement is disabled; a pre-signed transaction is required",
        ));
    }

    let amount: u64 = requirements.max_amount_required.parse().map_err(|_| {
        Failure::new(
            SettleErrorReason::UnknownError,
            format!("unparseable amount {:?}", requirements.max_amount_required),
        )
    })?;
    let pay_to: Address = requirements.pay_to.parse().map_err(|_| {
        Failure::new(
            SettleErrorReason::UnknownError,
            format!("unparseable recipient {:?}", requirements.pay_to),
        )
    })?;

    match options.mode {
        SettlementMode::Native => Ok(SettlementVariant::NativeTransfer {
            lamports: amount,
            pay_to,
        }),
        SettlementMode::Spl => {
            let mint: Address = requirements.asset.parse().map_err(|_| {
                Failure::new(
                    SettleErrorReason::UnknownError,
                    format!("unparseable asset {:?}", requirements.asset),
                )
            })?;
            Ok(SettlementVariant::TokenTransfer {
                mint,
                amount,
                pay_to,
            })
        }
    }
}

/// Verifies the operating balance covers fees (plus the transfer amount for
/// facilitator-funded native transfers), invoking the funding manager once
/// and re-checking when it does not.
async fn ensure_balance<L: LedgerOps>(
    ledger: &L,
    funding: &FundingManager<L>,
    variant: &SettlementVariant,
) -> Result<(), Failure> {
    let required = TX_FEE_ESTIMATE_LAMPORTS
        + match variant {
            SettlementVariant::NativeTransfer { lamports, .. } => *lamports,
            SettlementVariant::ClientTransaction(_) | SettlementVariant::TokenTransfer { .. } => 0,
        };

    let balance = ledger.balance().await?;
    if balance >= required {
        return Ok(());
    }

    tracing::info!(balance, required, "operating balance short, invoking funding manager");
    if let Err(error) = funding.ensure_funded(required).await {
        return Err(Failure::new(
            SettleErrorReason::InsufficientFunds,
            format!("need {required} lamports, have {balance}: {error}"),
        ));
    }
    let after = ledger.balance().await?;
    if after < required {
        return Err(Failure::new(
            SettleErrorReason::InsufficientFunds,
            format!("need {required} lamports, have {after} after funding"),
        ));
    }
    Ok(())
}

async fn submit<L: LedgerOps>(
    ledger: &L,
    variant: SettlementVariant,
) -> Result<Signature, Failure> {
    match variant {
        SettlementVariant::ClientTransaction(tx) => {
            let signed = PreSignedTransaction::from(ledger.sign(tx.into_inner())?);
            if !signed.is_fully_signed() {
                return Err(Failure::new(
                    SettleErrorReason::SignatureError,
                    "transaction is undersigned after adding the fee-payer signature",
                ));
            }
            Ok(ledger.send_and_confirm(signed.inner()).await?)
        }
        SettlementVariant::NativeTransfer { lamports, pay_to } => {
            let fee_payer = ledger.pubkey();
            let ix = native_transfer_instruction(&fee_payer, pay_to.pubkey(), lamports);
            submit_instructions(ledger, vec![ix]).await
        }
        SettlementVariant::TokenTransfer {
            mint,
            amount,
            pay_to,
        } => {
            let fee_payer = ledger.pubkey();
            let mint_account = ledger
                .get_account(mint.pubkey())
                .await?
                .ok_or_else(|| {
                    Failure::new(SettleErrorReason::UnknownError, format!("mint {mint} not found"))
                })?;
            let decimals = spl_token::state::Mint::unpack(&mint_account.data)
                .map_err(|e| {
                    Failure::new(SettleErrorReason::UnknownError, format!("unpack mint {mint}: {e}"))
                })?
                .decimals;

            let source = associated_token_address(&fee_payer, mint.pubkey());
            let destination = associated_token_address(pay_to.pubkey(), mint.pubkey());

            let mut instructions = Vec::with_capacity(2);
            if ledger.get_account(&destination).await?.is_none() {
                instructions.push(create_ata_instruction(
                    &fee_payer,
                    &destination,
                    pay_to.pubkey(),
                    mint.pubkey(),
                ));
            }
            let transfer = spl_token::instruction::transfer_checked(
                &spl_token::ID,
                &source,
                mint.pubkey(),
                &destination,
                &fee_payer,
                &[],
                amount,
                decimals,
            )
            .map_err(|e| {
                Failure::new(SettleErrorReason::UnknownError, format!("build transfer: {e}"))
            })?;
            instructions.push(transfer);
            submit_instructions(ledger, instructions).await
        }
    }
}

async fn submit_instructions<L: LedgerOps>(
    ledger: &L,
    instructions: Vec<Instruction>,
) -> Result<Signature, Failure> {
    let fee_payer = ledger.pubkey();
    let blockhash = ledger.latest_blockhash().await?;
    let message = MessageV0::try_compile(&fee_payer, &instructions, &[], blockhash)
        .map_err(|e| Failure::new(SettleErrorReason::UnknownError, format!("compile message: {e}")))?;
    let tx = VersionedTransaction {
        signatures: vec![Signature::default()],
        message: VersionedMessage::V0(message),
    };
    let tx = ledger.sign(tx)?;
    Ok(ledger.send_and_confirm(&tx).await?)
}

fn native_transfer_instruction(from: &Pubkey, to: &Pubkey, lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER_TAG.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![AccountMeta::new(*from, true), AccountMeta::new(*to, false)],
        data,
    }
}

fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), spl_token::ID.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_PUBKEY,
    )
    .0
}

fn create_ata_instruction(
    funder: &Pubkey,
    ata: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: ATA_PROGRAM_PUBKEY,
        accounts: vec![
            AccountMeta::new(*funder, true),
            AccountMeta::new(*ata, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::new_readonly(spl_token::ID, false),
        ],
        data: vec![0],
    }
}
