//! Type definitions for the facilitator's wire protocol.
//!
//! The key objects are [`PaymentRequirements`] (merchant-stated acceptable
//! payments), [`PaymentPayload`] (the client-supplied proof, base64-enveloped),
//! and the [`VerifyResponse`]/[`SettleResponse`] outcome objects. Payloads come
//! in two shapes: a signed payment intent, and the legacy transaction-based
//! forms distinguished by which fields are present.

use alloy_primitives::{Address, U256};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;

use crate::timestamp::UnixTimestamp;

/// Bytes holding base64-encoded data, as carried in the `paymentPayload`
/// field of verify and settle requests. Copy-on-write so request bodies can
/// be decoded without an extra allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes<'a>(pub Cow<'a, [u8]>);

impl Base64Bytes<'_> {
    /// Decodes the base64 string bytes to raw binary data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Encodes raw binary data into base64 string bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Base64Bytes<'static> {
        let encoded = b64.encode(input.as_ref());
        Base64Bytes(Cow::Owned(encoded.into_bytes()))
    }
}

impl<'a> From<&'a str> for Base64Bytes<'a> {
    fn from(s: &'a str) -> Self {
        Base64Bytes(Cow::Borrowed(s.as_bytes()))
    }
}

impl Display for Base64Bytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.0.as_ref()))
    }
}

/// Enumerates payment schemes. Only "exact" is supported: the payload must
/// state the precise transfer being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// A 20-byte account address, serialized as a lowercased 0x-prefixed hex
/// string. Equality is over the raw bytes, which makes every comparison
/// case-insensitive by construction.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub struct VetAddress(pub Address);

impl VetAddress {
    /// Lowercased hex form, the canonical wire and storage representation.
    pub fn to_lowercase_string(&self) -> String {
        format!("{:#x}", self.0)
    }
}

impl Display for VetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to decode address")]
pub struct VetAddressDecodingError;

impl FromStr for VetAddress {
    type Err = VetAddressDecodingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Address::from_str(s).map_err(|_| VetAddressDecodingError)?;
        Ok(Self(address))
    }
}

impl From<Address> for VetAddress {
    fn from(address: Address) -> Self {
        VetAddress(address)
    }
}

impl From<VetAddress> for Address {
    fn from(address: VetAddress) -> Self {
        address.0
    }
}

impl Serialize for VetAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_lowercase_string())
    }
}

impl<'de> Deserialize<'de> for VetAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VetAddress::from_str(&s)
            .map_err(|_| serde::de::Error::custom("Invalid address: expected 0x-prefixed 40 hex chars"))
    }
}

/// A 65-byte recoverable secp256k1 signature, serialized as a 0x-prefixed
/// hex string with 130 characters.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct HexSignature(pub [u8; 65]);

impl Debug for HexSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexSignature(0x{})", hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for HexSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        static SIG_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{130}$").expect("Invalid regex for signature"));

        if !SIG_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom(
                "Invalid signature format: must be 0x-prefixed and 130 hex chars",
            ));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| serde::de::Error::custom("Failed to decode signature hex string"))?;
        let array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Signature must be exactly 65 bytes"))?;
        Ok(HexSignature(array))
    }
}

impl Serialize for HexSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// A 32-byte transaction hash, encoded as a 0x-prefixed hex string.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TransactionHash(pub [u8; 32]);

impl Debug for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionHash(0x{})", hex::encode(self.0))
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for TransactionHash {
    type Err = TransactionHashDecodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static TX_HASH_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid regex"));
        if !TX_HASH_REGEX.is_match(s) {
            return Err(TransactionHashDecodingError);
        }
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|_| TransactionHashDecodingError)?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| TransactionHashDecodingError)?;
        Ok(TransactionHash(array))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid transaction hash format")]
pub struct TransactionHashDecodingError;

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TransactionHash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// A precise on-chain token amount in base units (wei). Represented as a
/// decimal string in JSON to prevent precision loss; never routed through
/// floating point.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub fn from_u64(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // U256 displays in decimal.
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid amount: expected an unsigned decimal integer")]
pub struct TokenAmountDecodingError;

impl FromStr for TokenAmount {
    type Err = TokenAmountDecodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TokenAmountDecodingError);
        }
        let value = U256::from_str_radix(s, 10).map_err(|_| TokenAmountDecodingError)?;
        Ok(TokenAmount(value))
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        TokenAmount(value)
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TokenAmount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// One acceptable payment, stated by the merchant. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOption {
    /// CAIP-2 network identifier, canonical or alias form.
    pub network: String,
    /// Token symbol, contract address, or the literal `"native"`.
    pub asset: String,
    /// Minimum acceptable amount in base units.
    pub amount: TokenAmount,
    /// Payment recipient.
    pub recipient: VetAddress,
}

/// The merchant-stated set of acceptable payments.
///
/// Invariant: at least one option; `expiresAt`, if present, must be in the
/// future at verification time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub payment_options: Vec<PaymentOption>,
    pub merchant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<UnixTimestamp>,
}

/// The body of a signed payment intent.
///
/// Field order is a wire contract: the signature digest is computed over the
/// compact JSON serialization of exactly these seven fields in exactly this
/// order. Reordering fields here breaks every client signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub scheme: Scheme,
    pub network: String,
    pub pay_to: VetAddress,
    pub amount: TokenAmount,
    pub asset: String,
    pub nonce: String,
    pub valid_until: UnixTimestamp,
}

/// A signed payment intent: the intent body plus the payer's signature over
/// its canonical digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedIntentPayload {
    pub signature: HexSignature,
    pub payload: PaymentIntent,
}

/// Legacy transaction-based payment proofs. Three settlement entry points,
/// distinguished by which fields are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LegacyPayload {
    /// A sender-signed, fee-delegation-flagged transaction awaiting a gas
    /// payer signature.
    #[serde(rename_all = "camelCase")]
    Delegated {
        sender_signed_transaction: String,
        sender_address: VetAddress,
    },
    /// A fully signed raw transaction ready for broadcast.
    #[serde(rename_all = "camelCase")]
    Raw { signed_transaction: String },
    /// A transaction already broadcast by the client.
    #[serde(rename_all = "camelCase")]
    Broadcast { transaction_hash: TransactionHash },
}

/// The decoded content of the base64 `paymentPayload` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PaymentPayload {
    SignedIntent(SignedIntentPayload),
    Legacy(LegacyPayload),
}

/// Error returned when decoding a base64-encoded [`PaymentPayload`] fails.
#[derive(Debug, thiserror::Error)]
pub enum PaymentPayloadB64DecodingError {
    /// The input bytes were not valid base64.
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
    /// The JSON structure was invalid or did not conform to [`PaymentPayload`].
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TryFrom<Base64Bytes<'_>> for PaymentPayload {
    type Error = PaymentPayloadB64DecodingError;

    fn try_from(value: Base64Bytes) -> Result<Self, Self::Error> {
        let decoded = value.decode()?;
        serde_json::from_slice(&decoded).map_err(PaymentPayloadB64DecodingError::from)
    }
}

/// Request body shared by `POST /verify` and `POST /settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Base64-encoded JSON [`PaymentPayload`].
    pub payment_payload: String,
    pub payment_requirements: PaymentRequirements,
}

/// Request body for `POST /settle`; identical shape to [`VerifyRequest`].
pub type SettleRequest = VerifyRequest;

/// Result returned after verifying a payment payload against requirements.
///
/// Either fully valid with a signer address, or invalid with exactly one
/// reason; never partially filled.
#[derive(Debug, Clone)]
pub enum VerifyResponse {
    /// The payload matches the requirements and passes all checks.
    Valid { payer: VetAddress },
    /// The payload failed verification for the given reason.
    Invalid {
        reason: String,
        payer: Option<VetAddress>,
    },
}

impl VerifyResponse {
    pub fn valid(payer: VetAddress) -> Self {
        VerifyResponse::Valid { payer }
    }

    pub fn invalid(reason: impl Into<String>, payer: Option<VetAddress>) -> Self {
        VerifyResponse::Invalid {
            reason: reason.into(),
            payer,
        }
    }
}

impl Serialize for VerifyResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VerifyResponse::Valid { payer } => {
                let mut s = serializer.serialize_struct("VerifyResponse", 2)?;
                s.serialize_field("isValid", &true)?;
                s.serialize_field("payer", payer)?;
                s.end()
            }
            VerifyResponse::Invalid { reason, payer } => {
                let fields = if payer.is_some() { 3 } else { 2 };
                let mut s = serializer.serialize_struct("VerifyResponse", fields)?;
                s.serialize_field("isValid", &false)?;
                s.serialize_field("invalidReason", reason)?;
                if let Some(payer) = payer {
                    s.serialize_field("payer", payer)?;
                }
                s.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            is_valid: bool,
            #[serde(default)]
            payer: Option<VetAddress>,
            #[serde(default)]
            invalid_reason: Option<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        match (raw.is_valid, raw.invalid_reason) {
            (true, None) => {
                let payer = raw
                    .payer
                    .ok_or_else(|| serde::de::Error::custom("`payer` must be present when valid"))?;
                Ok(VerifyResponse::Valid { payer })
            }
            (false, Some(reason)) => Ok(VerifyResponse::Invalid {
                reason,
                payer: raw.payer,
            }),
            (true, Some(_)) => Err(serde::de::Error::custom(
                "`invalidReason` must be absent when `isValid` is true",
            )),
            (false, None) => Err(serde::de::Error::custom(
                "`invalidReason` must be present when `isValid` is false",
            )),
        }
    }
}

/// Result returned after attempting to settle a payment on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TransactionHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<VetAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SettleResponse {
    pub fn settled(
        transaction_hash: TransactionHash,
        network_id: impl Into<String>,
        payer: Option<VetAddress>,
    ) -> Self {
        SettleResponse {
            success: true,
            transaction_hash: Some(transaction_hash),
            network_id: Some(network_id.into()),
            payer,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, transaction_hash: Option<TransactionHash>) -> Self {
        SettleResponse {
            success: false,
            transaction_hash,
            network_id: None,
            payer: None,
            error: Some(error.into()),
        }
    }
}

/// One entry of the `GET /supported` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedNetwork {
    pub network: String,
    pub assets: Vec<String>,
}

/// Response of `GET /supported`; pure and deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    pub networks: Vec<SupportedNetwork>,
    pub schemes: Vec<String>,
}

/// A simple error structure returned on unexpected or fatal server errors.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(tail: u8) -> VetAddress {
        let mut bytes = [0u8; 20];
        bytes[19] = tail;
        VetAddress(Address::from(bytes))
    }

    #[test]
    fn base64_encode_then_decode() {
        let encoded = Base64Bytes::encode(b"hello world");
        assert_eq!(encoded.to_string(), "aGVsbG8gd29ybGQ=");
        assert_eq!(encoded.decode().unwrap(), b"hello world");
        assert!(Base64Bytes::from("not!!base64").decode().is_err());
    }

    #[test]
    fn address_serializes_lowercased() {
        let addr: VetAddress = "0xAbC0000000000000000000000000000000000001".parse().unwrap();
        assert_eq!(
            serde_json::to_string(&addr).unwrap(),
            "\"0xabc0000000000000000000000000000000000001\""
        );
    }

    #[test]
    fn address_equality_is_case_insensitive() {
        let upper: VetAddress = "0xABC0000000000000000000000000000000000001".parse().unwrap();
        let lower: VetAddress = "0xabc0000000000000000000000000000000000001".parse().unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn token_amount_decimal_roundtrip() {
        let amount: TokenAmount = "1000000000000000000".parse().unwrap();
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"1000000000000000000\"");
        assert!("".parse::<TokenAmount>().is_err());
        assert!("-5".parse::<TokenAmount>().is_err());
        assert!("1.5".parse::<TokenAmount>().is_err());
        assert!("0x10".parse::<TokenAmount>().is_err());
    }

    #[test]
    fn signature_rejects_wrong_length() {
        let short = format!("\"0x{}\"", "ab".repeat(64));
        assert!(serde_json::from_str::<HexSignature>(&short).is_err());
        let ok = format!("\"0x{}\"", "ab".repeat(65));
        assert!(serde_json::from_str::<HexSignature>(&ok).is_ok());
    }

    #[test]
    fn payment_payload_distinguishes_shapes() {
        let hash = format!("{{\"transactionHash\":\"0x{}\"}}", "11".repeat(32));
        match serde_json::from_str::<PaymentPayload>(&hash).unwrap() {
            PaymentPayload::Legacy(LegacyPayload::Broadcast { .. }) => {}
            other => panic!("expected broadcast payload, got {other:?}"),
        }

        let raw = "{\"signedTransaction\":\"0xf8651234\"}";
        match serde_json::from_str::<PaymentPayload>(raw).unwrap() {
            PaymentPayload::Legacy(LegacyPayload::Raw { .. }) => {}
            other => panic!("expected raw payload, got {other:?}"),
        }

        let delegated = format!(
            "{{\"senderSignedTransaction\":\"0xf8651234\",\"senderAddress\":\"{}\"}}",
            address(9)
        );
        match serde_json::from_str::<PaymentPayload>(&delegated).unwrap() {
            PaymentPayload::Legacy(LegacyPayload::Delegated { .. }) => {}
            other => panic!("expected delegated payload, got {other:?}"),
        }
    }

    #[test]
    fn intent_serializes_in_digest_field_order() {
        let intent = PaymentIntent {
            scheme: Scheme::Exact,
            network: "eip155:100009".to_string(),
            pay_to: address(1),
            amount: TokenAmount::from_u64(1000),
            asset: "VET".to_string(),
            nonce: "abc".to_string(),
            valid_until: UnixTimestamp::from_secs(1700000000),
        };
        let json = serde_json::to_string(&intent).unwrap();
        assert_eq!(
            json,
            "{\"scheme\":\"exact\",\"network\":\"eip155:100009\",\
             \"payTo\":\"0x0000000000000000000000000000000000000001\",\
             \"amount\":\"1000\",\"asset\":\"VET\",\"nonce\":\"abc\",\
             \"validUntil\":1700000000}"
        );
    }

    #[test]
    fn verify_response_wire_shape() {
        let valid = VerifyResponse::valid(address(7));
        let json = serde_json::to_value(&valid).unwrap();
        assert_eq!(json["isValid"], true);
        assert_eq!(json["payer"], "0x0000000000000000000000000000000000000007");

        let invalid = VerifyResponse::invalid("Payment payload expired", None);
        let json = serde_json::to_value(&invalid).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["invalidReason"], "Payment payload expired");
        assert!(json.get("payer").is_none());
    }

    #[test]
    fn settle_response_failure_keeps_hash_when_known() {
        let hash = TransactionHash([0x22; 32]);
        let failed = SettleResponse::failed("Transaction reverted on-chain", Some(hash));
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["transactionHash"], hash.to_string());
        assert!(json.get("networkId").is_none());
    }
}
