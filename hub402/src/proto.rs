//! Wire format types for the hub402 payment protocol.
//!
//! Field names here are protocol, not style: they must serialize exactly as
//! the TypeScript and Go implementations emit them (`x402Version`,
//! `paymentHeader`, `maxAmountRequired`, `txHash`, ...). All types rename to
//! camelCase and amounts stay decimal strings end to end; nothing on the
//! wire is ever parsed as floating point.
//!
//! Verification and settlement outcomes are modeled as enums
//! ([`VerifyResponse`], [`SettleResponse`]) with private wire structs doing
//! the flat `isValid`/`success` JSON representation, so illegal states such
//! as "valid with a failure reason" cannot be constructed.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{VecSkipError, serde_as};

use crate::timestamp::UnixTimestamp;

/// The single payment scheme this protocol revision defines.
pub const EXACT_SCHEME: &str = "exact";

/// A protocol version marker parameterized by its numeric value.
///
/// Serializes as a bare integer and rejects any other value on
/// deserialization, so a decoded [`PaymentRequired`] is version-checked by
/// construction.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Version<const N: u8>;

impl<const N: u8> Version<N> {
    /// The numeric value of this protocol version.
    pub const VALUE: u8 = N;
}

impl<const N: u8> From<Version<N>> for u8 {
    fn from(_: Version<N>) -> Self {
        N
    }
}

impl<const N: u8> std::fmt::Display for Version<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{N}")
    }
}

impl<const N: u8> Serialize for Version<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(N)
    }
}

impl<'de, const N: u8> Deserialize<'de> for Version<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(deserializer)?;
        if v == N {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom(format!("expected version {N}, got {v}")))
        }
    }
}

/// Version marker for protocol version 1, the only version specified here.
pub type X402Version1 = Version<1>;

/// Convenience constant for constructing version-1 messages.
pub const V1: X402Version1 = Version;

/// Payment terms a resource server attaches to one guarded route.
///
/// Issued inside 402 responses and echoed back to the facilitator in
/// verify/settle requests. `resource` is the `"METHOD path"` pair the
/// descriptor applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme identifier; currently always [`EXACT_SCHEME`].
    pub scheme: String,
    /// Ledger network identifier (e.g. `"solana-devnet"`).
    pub network: String,
    /// Required payment amount in atomic units, as a decimal string.
    pub max_amount_required: String,
    /// The `"METHOD path"` this descriptor guards.
    pub resource: String,
    /// Human-readable description of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Optional JSON schema of the resource output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Recipient address for the payment.
    pub pay_to: String,
    /// Maximum seconds a payment authorization may take to settle.
    pub max_timeout_seconds: u64,
    /// Asset (mint) identifier, or the network-native sentinel.
    pub asset: String,
    /// Opaque scheme metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Client-asserted transfer intent, embedded in a [`PaymentPayload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactSvmAuthorization {
    /// Paying address.
    pub from: String,
    /// Receiving address.
    pub to: String,
    /// Transfer amount in atomic units, as a decimal string.
    pub value: String,
    /// Earliest acceptance time.
    pub valid_after: UnixTimestamp,
    /// Latest acceptance time.
    pub valid_before: UnixTimestamp,
    /// Single-use replay-protection value: `0x` + 64 hex characters.
    pub nonce: String,
}

/// Scheme payload of a version-1 exact payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactSvmPayload {
    /// Client signature over the authorization.
    pub signature: String,
    /// The transfer intent.
    pub authorization: ExactSvmAuthorization,
    /// Optional pre-built, partially-signed ledger transaction (base64).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

/// The decoded content of an `x-payment` header.
///
/// `x402_version` is deliberately a plain integer rather than a
/// [`Version`] marker: a wrong version must surface as the
/// `invalid_x402_version` reason from the verifier, not as a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Claimed protocol version.
    pub x402_version: u8,
    /// Claimed payment scheme.
    pub scheme: String,
    /// Claimed ledger network.
    pub network: String,
    /// Scheme payload.
    pub payload: ExactSvmPayload,
}

/// Body of an HTTP `402 Payment Required` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version (always 1).
    pub x402_version: X402Version1,
    /// Why the request was not admitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Acceptable payment terms.
    #[serde(default)]
    pub accepts: Vec<PaymentRequirements>,
}

/// Body of a facilitator `POST /verify` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Protocol version asserted by the caller.
    pub x402_version: u8,
    /// Base64-encoded [`PaymentPayload`] JSON, exactly as received in the
    /// `x-payment` header.
    pub payment_header: String,
    /// The terms the payment must satisfy.
    pub payment_requirements: PaymentRequirements,
}

/// Body of a facilitator `POST /settle` request.
///
/// Same wire shape as [`VerifyRequest`], kept as a distinct type so verify
/// and settle calls cannot be confused in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    /// Protocol version asserted by the caller.
    pub x402_version: u8,
    /// Base64-encoded [`PaymentPayload`] JSON.
    pub payment_header: String,
    /// The terms the payment must satisfy.
    pub payment_requirements: PaymentRequirements,
}

impl From<VerifyRequest> for SettleRequest {
    fn from(request: VerifyRequest) -> Self {
        Self {
            x402_version: request.x402_version,
            payment_header: request.payment_header,
            payment_requirements: request.payment_requirements,
        }
    }
}

/// Machine-readable reasons a payment fails verification.
///
/// These are wire tokens, stable across releases; clients branch on them
/// programmatically. Serialized as `snake_case` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum InvalidReason {
    /// The header is not base64 JSON of the expected shape.
    InvalidPayload,
    /// A pre-signed transaction was expected but absent or not a string.
    MissingTransaction,
    /// The authorization lacks a payer address.
    MissingAuthorizationFrom,
    /// The claimed payer has not signed the embedded transaction.
    PayerNotSigned,
    /// The embedded transaction carries no instructions.
    MissingInstruction,
    /// A native-transfer instruction is too short to decode.
    InvalidInstructionData,
    /// The system-program instruction is not a transfer.
    UnexpectedSystemIx,
    /// The transfer amount differs from the required amount.
    InvalidAmount,
    /// The transfer destination differs from the required recipient.
    InvalidRecipient,
    /// The native transfer could not be decoded.
    InvalidSystemTransfer,
    /// The embedded transaction bytes could not be deserialized.
    TransactionParseFailed,
    /// The payload claims a protocol version other than 1.
    InvalidX402Version,
    /// The payload claims a scheme other than `exact`.
    InvalidScheme,
    /// The payload network differs from the required network.
    InvalidNetwork,
    /// An address failed ledger-side parsing.
    InvalidAddressFormat,
    /// `authorization.to` differs from `payTo`.
    InvalidExactSvmPayloadRecipientMismatch,
    /// `authorization.value` differs from `maxAmountRequired`.
    InvalidExactSvmPayloadAuthorizationValue,
    /// The nonce is not `0x` followed by 64 hex characters.
    InvalidNonceFormat,
    /// The authorization is not yet valid.
    InvalidExactSvmPayloadAuthorizationValidAfter,
    /// The authorization has expired.
    InvalidExactSvmPayloadAuthorizationValidBefore,
    /// The nonce was already accepted within its TTL window.
    NonceReplay,
}

impl InvalidReason {
    /// The wire token for this reason.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPayload => "invalid_payload",
            Self::MissingTransaction => "missing_transaction",
            Self::MissingAuthorizationFrom => "missing_authorization_from",
            Self::PayerNotSigned => "payer_not_signed",
            Self::MissingInstruction => "missing_instruction",
            Self::InvalidInstructionData => "invalid_instruction_data",
            Self::UnexpectedSystemIx => "unexpected_system_ix",
            Self::InvalidAmount => "invalid_amount",
            Self::InvalidRecipient => "invalid_recipient",
            Self::InvalidSystemTransfer => "invalid_system_transfer",
            Self::TransactionParseFailed => "transaction_parse_failed",
            Self::InvalidX402Version => "invalid_x402_version",
            Self::InvalidScheme => "invalid_scheme",
            Self::InvalidNetwork => "invalid_network",
            Self::InvalidAddressFormat => "invalid_address_format",
            Self::InvalidExactSvmPayloadRecipientMismatch => {
                "invalid_exact_svm_payload_recipient_mismatch"
            }
            Self::InvalidExactSvmPayloadAuthorizationValue => {
                "invalid_exact_svm_payload_authorization_value"
            }
            Self::InvalidNonceFormat => "invalid_nonce_format",
            Self::InvalidExactSvmPayloadAuthorizationValidAfter => {
                "invalid_exact_svm_payload_authorization_valid_after"
            }
            Self::InvalidExactSvmPayloadAuthorizationValidBefore => {
                "invalid_exact_svm_payload_authorization_valid_before"
            }
            Self::NonceReplay => "nonce_replay",
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reasons a settlement fails.
///
/// Ledger errors are classified into this closed set at the settlement
/// boundary; raw transport detail stays in server logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SettleErrorReason {
    /// The facilitator operating account cannot cover fees (and amount, in
    /// authorization-only mode), and recovery failed.
    InsufficientFunds,
    /// The transaction referenced a stale or unknown blockhash.
    InvalidBlockhash,
    /// Transaction signing or signature verification failed.
    SignatureError,
    /// The payload carries no payer address.
    MissingPayerAddress,
    /// Settlement requires a pre-signed transaction and none was supplied.
    MissingTransaction,
    /// Any submission failure not matching a more specific class.
    UnknownError,
}

impl SettleErrorReason {
    /// The wire token for this reason.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "insufficient_funds",
            Self::InvalidBlockhash => "invalid_blockhash",
            Self::SignatureError => "signature_error",
            Self::MissingPayerAddress => "missing_payer_address",
            Self::MissingTransaction => "missing_transaction",
            Self::UnknownError => "unknown_error",
        }
    }
}

impl std::fmt::Display for SettleErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of payment verification.
///
/// Serializes flat as `{"isValid": ..., "invalidReason": ...}` with the
/// reason explicitly `null` on success, matching the reference services.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerifyResponse {
    /// The payment satisfies every check.
    Valid,
    /// The payment failed a check.
    Invalid {
        /// Which check failed.
        reason: InvalidReason,
    },
}

impl VerifyResponse {
    /// A passing verification.
    #[must_use]
    pub const fn valid() -> Self {
        Self::Valid
    }

    /// A failed verification with the given reason.
    #[must_use]
    pub const fn invalid(reason: InvalidReason) -> Self {
        Self::Invalid { reason }
    }

    /// Returns `true` for the valid variant.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseWire {
    is_valid: bool,
    invalid_reason: Option<InvalidReason>,
}

impl Serialize for VerifyResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Self::Valid => VerifyResponseWire {
                is_valid: true,
                invalid_reason: None,
            },
            Self::Invalid { reason } => VerifyResponseWire {
                is_valid: false,
                invalid_reason: Some(*reason),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = VerifyResponseWire::deserialize(deserializer)?;
        if wire.is_valid {
            Ok(Self::Valid)
        } else {
            let reason = wire
                .invalid_reason
                .ok_or_else(|| serde::de::Error::missing_field("invalidReason"))?;
            Ok(Self::Invalid { reason })
        }
    }
}

/// Transaction identifier reported for a deduplicated settlement.
pub const DUPLICATE_TX_HASH: &str = "duplicate";

/// Outcome of payment settlement.
///
/// Serializes flat as `{"success": ..., "error": ..., "txHash": ...,
/// "networkId": ..., "payer": ...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettleResponse {
    /// The payment is committed on the ledger (or was already committed,
    /// see [`DUPLICATE_TX_HASH`]).
    Success {
        /// Ledger transaction identifier.
        tx_hash: String,
        /// Network the settlement occurred on.
        network_id: String,
        /// Paying address, when identifiable.
        payer: Option<String>,
    },
    /// The payment could not be committed.
    Failed {
        /// Classified failure reason.
        error: SettleErrorReason,
        /// Network the settlement was attempted on.
        network_id: String,
        /// Facilitator operating address, included to aid manual
        /// remediation on non-production networks.
        fee_payer: Option<String>,
        /// Remediation hint (e.g. a faucet pointer on devnet).
        help: Option<String>,
    },
}

impl SettleResponse {
    /// A successful settlement.
    #[must_use]
    pub fn success(tx_hash: String, network_id: String, payer: Option<String>) -> Self {
        Self::Success {
            tx_hash,
            network_id,
            payer,
        }
    }

    /// The non-failing indicator for a replayed settlement: no new ledger
    /// transaction was produced.
    #[must_use]
    pub fn duplicate(network_id: String, payer: Option<String>) -> Self {
        Self::Success {
            tx_hash: DUPLICATE_TX_HASH.to_owned(),
            network_id,
            payer,
        }
    }

    /// A failed settlement.
    #[must_use]
    pub const fn failed(error: SettleErrorReason, network_id: String) -> Self {
        Self::Failed {
            error,
            network_id,
            fee_payer: None,
            help: None,
        }
    }

    /// Returns `true` for the success variant.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponseWire {
    success: bool,
    error: Option<SettleErrorReason>,
    tx_hash: Option<String>,
    network_id: String,
    payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fee_payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    help: Option<String>,
}

impl Serialize for SettleResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Self::Success {
                tx_hash,
                network_id,
                payer,
            } => SettleResponseWire {
                success: true,
                error: None,
                tx_hash: Some(tx_hash.clone()),
                network_id: network_id.clone(),
                payer: payer.clone(),
                fee_payer: None,
                help: None,
            },
            Self::Failed {
                error,
                network_id,
                fee_payer,
                help,
            } => SettleResponseWire {
                success: false,
                error: Some(*error),
                tx_hash: None,
                network_id: network_id.clone(),
                payer: None,
                fee_payer: fee_payer.clone(),
                help: help.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettleResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = SettleResponseWire::deserialize(deserializer)?;
        if wire.success {
            let tx_hash = wire
                .tx_hash
                .ok_or_else(|| serde::de::Error::missing_field("txHash"))?;
            Ok(Self::Success {
                tx_hash,
                network_id: wire.network_id,
                payer: wire.payer,
            })
        } else {
            let error = wire
                .error
                .ok_or_else(|| serde::de::Error::missing_field("error"))?;
            Ok(Self::Failed {
                error,
                network_id: wire.network_id,
                fee_payer: wire.fee_payer,
                help: wire.help,
            })
        }
    }
}

/// One payment kind a facilitator can process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    /// Payment scheme identifier.
    pub scheme: String,
    /// Network identifier.
    pub network: String,
}

/// Response from a facilitator's `GET /supported` endpoint.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    /// Supported payment kinds; unknown entries from newer peers are
    /// skipped rather than failing the whole response.
    #[serde_as(as = "VecSkipError<_>")]
    pub kinds: Vec<SupportedPaymentKind>,
}
