//! Payment verification for the exact scheme.
//!
//! [`verify_payment`] runs the ordered checks over a decoded payment header,
//! short-circuiting on the first failure and returning its reason token as a
//! value. The only side effect of a successful verification is recording the
//! nonce in the replay store.
//!
//! When a pre-signed transaction is embedded, static inspection always runs
//! locally. The remaining checks either run locally or go to a configured
//! strict delegate (a reference facilitator); an unreachable delegate falls
//! back to the local checks with a warning, never silently.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;

use hub402::encoding::Base64Bytes;
use hub402::proto::{
    EXACT_SCHEME, InvalidReason, PaymentPayload, PaymentRequirements, VerifyResponse, X402Version1,
};
use hub402::store::{StoreError, TtlStore};
use hub402::timestamp::UnixTimestamp;

use crate::chain::types::Address;
use crate::exact::transaction::{
    PreSignedTransaction, SYSTEM_PROGRAM_ID, decode_system_transfer,
};

/// How long an accepted nonce blocks replays.
pub const NONCE_TTL: Duration = Duration::from_secs(5 * 60);

/// `0x` followed by exactly 32 bytes of hex.
static NONCE_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^0x[0-9a-fA-F]{64}$").expect("nonce regex is valid")
});

/// The strict verifier could not produce a verdict.
#[derive(Debug, thiserror::Error)]
#[error("strict verifier unavailable: {0}")]
pub struct DelegateError(pub String);

/// A reference implementation of the scheme checks, consulted in strict
/// mode.
#[async_trait::async_trait]
pub trait VerifyDelegate: Send + Sync {
    /// Produces a verdict for the decoded payload, or [`DelegateError`]
    /// when none could be obtained.
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, DelegateError>;
}

/// How protocol checks are performed.
#[derive(Clone)]
pub enum VerificationStrategy {
    /// Run the checks in this process.
    Local,
    /// Delegate the protocol checks to a reference facilitator, falling
    /// back to local checks only when it is unreachable.
    Strict(Arc<dyn VerifyDelegate>),
}

impl std::fmt::Debug for VerificationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("Local"),
            Self::Strict(_) => f.write_str("Strict"),
        }
    }
}

/// Verifies a base64 payment header against the payment requirements.
///
/// # Errors
///
/// Returns [`StoreError`] only when the replay store itself fails; every
/// protocol-level rejection is a [`VerifyResponse::Invalid`] value.
pub async fn verify_payment(
    payment_header: &str,
    requirements: &PaymentRequirements,
    strategy: &VerificationStrategy,
    nonce_store: &dyn TtlStore,
    skip_replay_check: bool,
) -> Result<VerifyResponse, StoreError> {
    let Some(payload) = decode_header(payment_header) else {
        return Ok(VerifyResponse::invalid(InvalidReason::InvalidPayload));
    };

    if let Some(tx_b64) = payload.payload.transaction.as_deref() {
        if let Err(reason) = inspect_transaction(tx_b64, &payload, requirements) {
            return Ok(VerifyResponse::invalid(reason));
        }
    }

    if let VerificationStrategy::Strict(delegate) = strategy {
        match delegate.verify(&payload, requirements).await {
            Ok(verdict) => return Ok(verdict),
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "strict verifier unavailable, falling back to local checks"
                );
            }
        }
    }

    verify_locally(
        &payload,
        requirements,
        UnixTimestamp::now(),
        nonce_store,
        skip_replay_check,
    )
    .await
}

fn decode_header(header: &str) -> Option<PaymentPayload> {
    let bytes = Base64Bytes::from(header).decode().ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Static inspection of an embedded pre-signed transaction. Never touches
/// the network; instructions outside the native-transfer primitive are
/// deferred to settlement-time enforcement.
fn inspect_transaction(
    tx_b64: &str,
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
) -> Result<(), InvalidReason> {
    let tx = PreSignedTransaction::from_base64(tx_b64)
        .map_err(|_| InvalidReason::TransactionParseFailed)?;

    let from = &payload.payload.authorization.from;
    if from.is_empty() {
        return Err(InvalidReason::MissingAuthorizationFrom);
    }
    let payer: Address = from
        .parse()
        .map_err(|_| InvalidReason::InvalidAddressFormat)?;
    if !tx.is_signed_by(payer.pubkey()) {
        return Err(InvalidReason::PayerNotSigned);
    }

    let first = tx.instruction(0).ok_or(InvalidReason::MissingInstruction)?;
    if first.program_id == SYSTEM_PROGRAM_ID {
        let transfer = decode_system_transfer(&first)?;
        let required: u64 = requirements
            .max_amount_required
            .parse()
            .map_err(|_| InvalidReason::InvalidAmount)?;
        if transfer.lamports != required {
            return Err(InvalidReason::InvalidAmount);
        }
        let pay_to: Address = requirements
            .pay_to
            .parse()
            .map_err(|_| InvalidReason::InvalidAddressFormat)?;
        if transfer.to != *pay_to.pubkey() {
            return Err(InvalidReason::InvalidRecipient);
        }
    }
    Ok(())
}

/// The protocol checks, in order, against a clock sampled once.
async fn verify_locally(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
    now: UnixTimestamp,
    nonce_store: &dyn TtlStore,
    skip_replay_check: bool,
) -> Result<VerifyResponse, StoreError> {
    if payload.x402_version != X402Version1::VALUE {
        return Ok(VerifyResponse::invalid(InvalidReason::InvalidX402Version));
    }
    if payload.scheme != EXACT_SCHEME {
        return Ok(VerifyResponse::invalid(InvalidReason::InvalidScheme));
    }
    if payload.network != requirements.network {
        return Ok(VerifyResponse::invalid(InvalidReason::InvalidNetwork));
    }

    let auth = &payload.payload.authorization;
    if auth.from.parse::<Address>().is_err()
        || auth.to.parse::<Address>().is_err()
        || requirements.pay_to.parse::<Address>().is_err()
    {
        return Ok(VerifyResponse::invalid(InvalidReason::InvalidAddressFormat));
    }

    // Exact string equality; amounts are never parsed at this boundary.
    if auth.to != requirements.pay_to {
        return Ok(VerifyResponse::invalid(
            InvalidReason::InvalidExactSvmPayloadRecipientMismatch,
        ));
    }
    if auth.value != requirements.max_amount_required {
        return Ok(VerifyResponse::invalid(
            InvalidReason::InvalidExactSvmPayloadAuthorizationValue,
        ));
    }

    if !NONCE_FORMAT.is_match(&auth.nonce) {
        return Ok(VerifyResponse::invalid(InvalidReason::InvalidNonceFormat));
    }

    if auth.valid_after > now {
        return Ok(VerifyResponse::invalid(
            InvalidReason::InvalidExactSvmPayloadAuthorizationValidAfter,
        ));
    }
    if auth.valid_before < now {
        return Ok(VerifyResponse::invalid(
            InvalidReason::InvalidExactSvmPayloadAuthorizationValidBefore,
        ));
    }

    if !skip_replay_check {
        // Atomic check-and-record: recording the nonce is the one side
        // effect of a successful verification.
        let inserted = nonce_store.put_if_absent(&auth.nonce, NONCE_TTL).await?;
        if !inserted {
            return Ok(VerifyResponse::invalid(InvalidReason::NonceReplay));
        }
    }

    Ok(VerifyResponse::valid())
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use solana_keypair::Keypair;
    use solana_pubkey::Pubkey;
    use solana_signer::Signer;
    use solana_transaction::Instruction;

    use hub402::proto::ExactSvmAuthorization;
    use hub402::store::MemoryTtlStore;

    use super::*;
    use crate::exact::transaction::testing::{signed_transfer_b64, signed_tx_b64};

    fn fresh_nonce() -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        format!("0x{}", hex::encode(bytes))
    }

    fn requirements(pay_to: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: EXACT_SCHEME.to_owned(),
            network: "solana-devnet".to_owned(),
            max_amount_required: "1".to_owned(),
            resource: "GET /api/data".to_owned(),
            description: Some("sample data".to_owned()),
            mime_type: Some("application/json".to_owned()),
            output_schema: None,
            pay_to: pay_to.to_owned(),
            max_timeout_seconds: 60,
            asset: Pubkey::new_unique().to_string(),
            extra: None,
        }
    }

    fn payload(from: &str, to: &str, value: &str, nonce: &str) -> PaymentPayload {
        let now = UnixTimestamp::now().as_secs();
        PaymentPayload {
            x402_version: 1,
            scheme: EXACT_SCHEME.to_owned(),
            network: "solana-devnet".to_owned(),
            payload: hub402::proto::ExactSvmPayload {
                signature: "demo".to_owned(),
                authorization: ExactSvmAuthorization {
                    from: from.to_owned(),
                    to: to.to_owned(),
                    value: value.to_owned(),
                    valid_after: UnixTimestamp::from_secs(now.saturating_sub(5)),
                    valid_before: UnixTimestamp::from_secs(now + 300),
                    nonce: nonce.to_owned(),
                },
                transaction: None,
            },
        }
    }

    fn encode(payload: &PaymentPayload) -> String {
        Base64Bytes::encode(serde_json::to_vec(payload).unwrap()).to_string()
    }

    async fn run_local(header: &str, reqs: &PaymentRequirements, store: &MemoryTtlStore) -> VerifyResponse {
        verify_payment(header, reqs, &VerificationStrategy::Local, store, false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn valid_payment_passes() {
        let pay_to = Pubkey::new_unique().to_string();
        let from = Pubkey::new_unique().to_string();
        let reqs = requirements(&pay_to);
        let header = encode(&payload(&from, &pay_to, "1", &fresh_nonce()));
        let store = MemoryTtlStore::new();
        assert!(run_local(&header, &reqs, &store).await.is_valid());
    }

    #[tokio::test]
    async fn replayed_nonce_is_rejected_even_across_requirements() {
        let pay_to = Pubkey::new_unique().to_string();
        let from = Pubkey::new_unique().to_string();
        let reqs = requirements(&pay_to);
        let header = encode(&payload(&from, &pay_to, "1", &fresh_nonce()));
        let store = MemoryTtlStore::new();

        assert!(run_local(&header, &reqs, &store).await.is_valid());
        assert_eq!(
            run_local(&header, &reqs, &store).await,
            VerifyResponse::invalid(InvalidReason::NonceReplay)
        );

        // Same nonce under different (still matching) requirements.
        let mut other = reqs.clone();
        other.description = Some("renamed".to_owned());
        assert_eq!(
            run_local(&header, &other, &store).await,
            VerifyResponse::invalid(InvalidReason::NonceReplay)
        );
    }

    #[tokio::test]
    async fn replay_check_can_be_disabled() {
        let pay_to = Pubkey::new_unique().to_string();
        let from = Pubkey::new_unique().to_string();
        let reqs = requirements(&pay_to);
        let header = encode(&payload(&from, &pay_to, "1", &fresh_nonce()));
        let store = MemoryTtlStore::new();
        for _ in 0..2 {
            let verdict =
                verify_payment(&header, &reqs, &VerificationStrategy::Local, &store, true)
                    .await
                    .unwrap();
            assert!(verdict.is_valid());
        }
    }

    #[tokio::test]
    async fn differently_formatted_equal_amount_is_rejected() {
        let pay_to = Pubkey::new_unique().to_string();
        let from = Pubkey::new_unique().to_string();
        let reqs = requirements(&pay_to);
        // "01" == 1 numerically, but amounts compare as strings.
        let header = encode(&payload(&from, &pay_to, "01", &fresh_nonce()));
        let store = MemoryTtlStore::new();
        assert_eq!(
            run_local(&header, &reqs, &store).await,
            VerifyResponse::invalid(InvalidReason::InvalidExactSvmPayloadAuthorizationValue)
        );
    }

    #[tokio::test]
    async fn recipient_mismatch_is_rejected() {
        let pay_to = Pubkey::new_unique().to_string();
        let from = Pubkey::new_unique().to_string();
        let other = Pubkey::new_unique().to_string();
        let reqs = requirements(&pay_to);
        let header = encode(&payload(&from, &other, "1", &fresh_nonce()));
        let store = MemoryTtlStore::new();
        assert_eq!(
            run_local(&header, &reqs, &store).await,
            VerifyResponse::invalid(InvalidReason::InvalidExactSvmPayloadRecipientMismatch)
        );
    }

    #[tokio::test]
    async fn nonce_format_is_enforced() {
        let pay_to = Pubkey::new_unique().to_string();
        let from = Pubkey::new_unique().to_string();
        let reqs = requirements(&pay_to);
        let store = MemoryTtlStore::new();

        let bad_nonces = [
            format!("0x{}", "a".repeat(62)),
            "a".repeat(66),
            format!("0x{}", "g".repeat(64)),
            String::new(),
        ];
        for nonce in bad_nonces {
            let header = encode(&payload(&from, &pay_to, "1", &nonce));
            assert_eq!(
                run_local(&header, &reqs, &store).await,
                VerifyResponse::invalid(InvalidReason::InvalidNonceFormat),
                "nonce {nonce:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn time_window_boundaries() {
        let pay_to = Pubkey::new_unique().to_string();
        let from = Pubkey::new_unique().to_string();
        let reqs = requirements(&pay_to);
        let store = MemoryTtlStore::new();
        let now = UnixTimestamp::from_secs(1_700_000_000);

        let mut on_boundary = payload(&from, &pay_to, "1", &fresh_nonce());
        on_boundary.payload.authorization.valid_after = now;
        on_boundary.payload.authorization.valid_before = now;
        let verdict = verify_locally(&on_boundary, &reqs, now, &store, false)
            .await
            .unwrap();
        assert!(verdict.is_valid());

        let mut early = payload(&from, &pay_to, "1", &fresh_nonce());
        early.payload.authorization.valid_after = now + 1;
        early.payload.authorization.valid_before = now + 300;
        assert_eq!(
            verify_locally(&early, &reqs, now, &store, false).await.unwrap(),
            VerifyResponse::invalid(InvalidReason::InvalidExactSvmPayloadAuthorizationValidAfter)
        );

        let mut expired = payload(&from, &pay_to, "1", &fresh_nonce());
        expired.payload.authorization.valid_after = UnixTimestamp::from_secs(0);
        expired.payload.authorization.valid_before = UnixTimestamp::from_secs(now.as_secs() - 1);
        assert_eq!(
            verify_locally(&expired, &reqs, now, &store, false).await.unwrap(),
            VerifyResponse::invalid(InvalidReason::InvalidExactSvmPayloadAuthorizationValidBefore)
        );
    }

    #[tokio::test]
    async fn version_scheme_and_network_checks() {
        let pay_to = Pubkey::new_unique().to_string();
        let from = Pubkey::new_unique().to_string();
        let reqs = requirements(&pay_to);
        let store = MemoryTtlStore::new();

        let mut wrong_version = payload(&from, &pay_to, "1", &fresh_nonce());
        wrong_version.x402_version = 2;
        assert_eq!(
            run_local(&encode(&wrong_version), &reqs, &store).await,
            VerifyResponse::invalid(InvalidReason::InvalidX402Version)
        );

        let mut wrong_scheme = payload(&from, &pay_to, "1", &fresh_nonce());
        wrong_scheme.scheme = "upto".to_owned();
        assert_eq!(
            run_local(&encode(&wrong_scheme), &reqs, &store).await,
            VerifyResponse::invalid(InvalidReason::InvalidScheme)
        );

        let mut wrong_network = payload(&from, &pay_to, "1", &fresh_nonce());
        wrong_network.network = "solana".to_owned();
        assert_eq!(
            run_local(&encode(&wrong_network), &reqs, &store).await,
            VerifyResponse::invalid(InvalidReason::InvalidNetwork)
        );
    }

    #[tokio::test]
    async fn malformed_headers_are_invalid_payload() {
        let reqs = requirements(&Pubkey::new_unique().to_string());
        let store = MemoryTtlStore::new();
        for header in ["%%% not base64", &Base64Bytes::encode(b"not json").to_string()] {
            assert_eq!(
                run_local(header, &reqs, &store).await,
                VerifyResponse::invalid(InvalidReason::InvalidPayload)
            );
        }
    }

    #[tokio::test]
    async fn malformed_addresses_are_rejected() {
        let pay_to = Pubkey::new_unique().to_string();
        let reqs = requirements(&pay_to);
        let store = MemoryTtlStore::new();
        let header = encode(&payload("definitely-not-base58", &pay_to, "1", &fresh_nonce()));
        assert_eq!(
            run_local(&header, &reqs, &store).await,
            VerifyResponse::invalid(InvalidReason::InvalidAddressFormat)
        );
    }

    #[tokio::test]
    async fn embedded_native_transfer_is_inspected() {
        let payer = Keypair::new();
        let pay_to = Pubkey::new_unique();
        let reqs = requirements(&pay_to.to_string());
        let store = MemoryTtlStore::new();

        let mut ok = payload(&payer.pubkey().to_string(), &pay_to.to_string(), "1", &fresh_nonce());
        ok.payload.transaction = Some(signed_transfer_b64(&payer, &pay_to, 1));
        assert!(run_local(&encode(&ok), &reqs, &store).await.is_valid());

        let mut wrong_amount =
            payload(&payer.pubkey().to_string(), &pay_to.to_string(), "1", &fresh_nonce());
        wrong_amount.payload.transaction = Some(signed_transfer_b64(&payer, &pay_to, 2));
        assert_eq!(
            run_local(&encode(&wrong_amount), &reqs, &store).await,
            VerifyResponse::invalid(InvalidReason::InvalidAmount)
        );

        let elsewhere = Pubkey::new_unique();
        let mut wrong_recipient =
            payload(&payer.pubkey().to_string(), &pay_to.to_string(), "1", &fresh_nonce());
        wrong_recipient.payload.transaction = Some(signed_transfer_b64(&payer, &elsewhere, 1));
        assert_eq!(
            run_local(&encode(&wrong_recipient), &reqs, &store).await,
            VerifyResponse::invalid(InvalidReason::InvalidRecipient)
        );

        let other_signer = Keypair::new();
        let mut not_signed =
            payload(&payer.pubkey().to_string(), &pay_to.to_string(), "1", &fresh_nonce());
        not_signed.payload.transaction = Some(signed_transfer_b64(&other_signer, &pay_to, 1));
        assert_eq!(
            run_local(&encode(&not_signed), &reqs, &store).await,
            VerifyResponse::invalid(InvalidReason::PayerNotSigned)
        );
    }

    #[tokio::test]
    async fn non_native_instructions_defer_to_settlement() {
        let payer = Keypair::new();
        let pay_to = Pubkey::new_unique();
        let reqs = requirements(&pay_to.to_string());
        let store = MemoryTtlStore::new();

        let opaque = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![],
            data: vec![1, 2, 3],
        };
        let mut p = payload(&payer.pubkey().to_string(), &pay_to.to_string(), "1", &fresh_nonce());
        p.payload.transaction = Some(signed_tx_b64(&payer, &[opaque]));
        assert!(run_local(&encode(&p), &reqs, &store).await.is_valid());
    }

    struct ScriptedDelegate(Result<VerifyResponse, ()>);

    #[async_trait::async_trait]
    impl VerifyDelegate for ScriptedDelegate {
        async fn verify(
            &self,
            _payload: &PaymentPayload,
            _requirements: &PaymentRequirements,
        ) -> Result<VerifyResponse, DelegateError> {
            self.0
                .clone()
                .map_err(|()| DelegateError("connection refused".to_owned()))
        }
    }

    #[tokio::test]
    async fn strict_delegate_verdict_is_returned_verbatim() {
        let pay_to = Pubkey::new_unique().to_string();
        let from = Pubkey::new_unique().to_string();
        let reqs = requirements(&pay_to);
        let header = encode(&payload(&from, &pay_to, "1", &fresh_nonce()));
        let store = MemoryTtlStore::new();

        let strategy = VerificationStrategy::Strict(Arc::new(ScriptedDelegate(Ok(
            VerifyResponse::invalid(InvalidReason::InvalidScheme),
        ))));
        let verdict = verify_payment(&header, &reqs, &strategy, &store, false)
            .await
            .unwrap();
        assert_eq!(verdict, VerifyResponse::invalid(InvalidReason::InvalidScheme));
    }

    #[tokio::test]
    async fn unavailable_delegate_falls_back_to_local_checks() {
        let pay_to = Pubkey::new_unique().to_string();
        let from = Pubkey::new_unique().to_string();
        let reqs = requirements(&pay_to);
        let store = MemoryTtlStore::new();
        let strategy = VerificationStrategy::Strict(Arc::new(ScriptedDelegate(Err(()))));

        let good = encode(&payload(&from, &pay_to, "1", &fresh_nonce()));
        assert!(verify_payment(&good, &reqs, &strategy, &store, false).await.unwrap().is_valid());

        // The fallback keeps full validation strength.
        let bad = encode(&payload(&from, &pay_to, "2", &fresh_nonce()));
        assert_eq!(
            verify_payment(&bad, &reqs, &strategy, &store, false).await.unwrap(),
            VerifyResponse::invalid(InvalidReason::InvalidExactSvmPayloadAuthorizationValue)
        );
    }
}
