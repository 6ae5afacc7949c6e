//! x402 HTTP 402 payment protocol: challenge generation, payload
//! verification, and the v2 header codec.
//!
//! The server answers an unpaid request with `402` and a `PaymentRequired`
//! header carrying a base64(JSON) challenge. The client replies with a
//! `PAYMENT-SIGNATURE` header carrying a signed payload; on settlement the
//! server returns `PAYMENT-RESPONSE`. Amounts travel as strings in smallest
//! units for precision.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sardis_types::{RejectReason, UnixSeconds};

use crate::verifier::unix_now;

/// Header names, v2 standardized.
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";
pub const PAYMENT_RESPONSE_HEADER: &str = "PAYMENT-RESPONSE";
pub const PAYMENT_REQUIRED_HEADER: &str = "PaymentRequired";

pub const X402_VERSION_1: &str = "1.0";
pub const X402_VERSION_2: &str = "2.0";
pub const SUPPORTED_VERSIONS: [&str; 2] = [X402_VERSION_1, X402_VERSION_2];

const DEFAULT_CHALLENGE_TTL_SECS: u64 = 300;

/// Server-generated payment challenge (the 402 response body).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct X402Challenge {
    pub payment_id: String,
    pub resource_uri: String,
    /// Amount in smallest units, as a string for precision.
    pub amount: String,
    pub currency: String,
    pub payee_address: String,
    pub network: String,
    pub token_address: String,
    pub expires_at: UnixSeconds,
    /// Unique per challenge.
    pub nonce: String,
}

/// Client-constructed payment payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct X402Payload {
    pub payment_id: String,
    pub payer_address: String,
    pub amount: String,
    /// Must match the challenge nonce.
    pub nonce: String,
    /// Signature over the canonical payload string.
    pub signature: String,
    /// Optional ERC-3009 authorization fields, passed through opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Value>,
}

/// Result of payload verification.
#[derive(Debug, Clone)]
pub struct X402Verification {
    pub accepted: bool,
    pub reason: Option<RejectReason>,
}

impl X402Verification {
    fn rejected(reason: RejectReason) -> Self {
        Self { accepted: false, reason: Some(reason) }
    }

    fn accepted() -> Self {
        Self { accepted: true, reason: None }
    }
}

/// Signature verification callback: `(canonical_bytes, signature, payer) -> bool`.
pub type SignatureCheck<'a> = &'a dyn Fn(&[u8], &str, &str) -> bool;

/// Generate a fresh challenge for a priced resource.
pub fn generate_challenge(
    resource_uri: &str,
    amount: &str,
    currency: &str,
    payee_address: &str,
    network: &str,
    token_address: &str,
    ttl_seconds: Option<u64>,
) -> X402Challenge {
    X402Challenge {
        payment_id: format!("x402_{}", uuid::Uuid::new_v4().simple()),
        resource_uri: resource_uri.to_string(),
        amount: amount.to_string(),
        currency: currency.to_string(),
        payee_address: payee_address.to_string(),
        network: network.to_string(),
        token_address: token_address.to_string(),
        expires_at: unix_now() + ttl_seconds.unwrap_or(DEFAULT_CHALLENGE_TTL_SECS),
        nonce: uuid::Uuid::new_v4().simple().to_string(),
    }
}

/// Canonical string the client signature commits to:
/// `payment_id|payer|amount|nonce|payee|network`.
pub fn canonical_payload(challenge: &X402Challenge, payer_address: &str) -> String {
    [
        challenge.payment_id.as_str(),
        payer_address,
        challenge.amount.as_str(),
        challenge.nonce.as_str(),
        challenge.payee_address.as_str(),
        challenge.network.as_str(),
    ]
    .join("|")
}

/// Verify a payment payload against its challenge.
///
/// All checks are fail-closed; the signature callback is consulted only when
/// supplied (simulated environments omit it), and a panicking or erroring
/// callback counts as invalid.
pub fn verify_payload(
    payload: &X402Payload,
    challenge: &X402Challenge,
    now: Option<UnixSeconds>,
    verify_signature: Option<SignatureCheck<'_>>,
) -> X402Verification {
    let current = now.unwrap_or_else(unix_now);

    if challenge.expires_at <= current {
        return X402Verification::rejected(RejectReason::X402ChallengeExpired);
    }
    if payload.nonce != challenge.nonce {
        return X402Verification::rejected(RejectReason::X402NonceMismatch);
    }
    if payload.amount != challenge.amount {
        return X402Verification::rejected(RejectReason::X402AmountMismatch);
    }
    if payload.payment_id != challenge.payment_id {
        return X402Verification::rejected(RejectReason::X402PaymentIdMismatch);
    }

    if let Some(check) = verify_signature {
        let canonical = canonical_payload(challenge, &payload.payer_address);
        let verified = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            check(canonical.as_bytes(), &payload.signature, &payload.payer_address)
        }))
        .unwrap_or(false);
        if !verified {
            return X402Verification::rejected(RejectReason::X402SignatureInvalid);
        }
    }

    X402Verification::accepted()
}

/// Validate an x402 protocol version string. Empty means "unversioned
/// legacy client" and is accepted.
pub fn validate_version(version: &str) -> Result<(), RejectReason> {
    if version.is_empty() || SUPPORTED_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(RejectReason::X402VersionUnsupported)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("invalid base64 in header: {0}")]
    InvalidBase64(String),

    #[error("invalid JSON in header: {0}")]
    InvalidJson(String),
}

fn encode_header<T: Serialize>(value: &T) -> String {
    // Serialization of these plain structs cannot fail.
    let json = serde_json::to_vec(value).expect("x402 header serialization");
    base64::engine::general_purpose::STANDARD.encode(json)
}

fn decode_header<T: for<'de> Deserialize<'de>>(header_value: &str) -> Result<T, HeaderError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(header_value.trim())
        .map_err(|e| HeaderError::InvalidBase64(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| HeaderError::InvalidJson(e.to_string()))
}

/// Serialize a challenge for the `PaymentRequired` header.
pub fn serialize_challenge_header(challenge: &X402Challenge) -> String {
    encode_header(challenge)
}

/// Parse a `PaymentRequired` header back into a challenge.
pub fn parse_challenge_header(header_value: &str) -> Result<X402Challenge, HeaderError> {
    decode_header(header_value)
}

/// Serialize a payload for the `PAYMENT-SIGNATURE` header.
pub fn serialize_payment_signature_header(payload: &X402Payload) -> String {
    encode_header(payload)
}

/// Parse a `PAYMENT-SIGNATURE` header.
pub fn parse_payment_signature_header(header_value: &str) -> Result<X402Payload, HeaderError> {
    decode_header(header_value)
}

/// Serialize settlement data for the `PAYMENT-RESPONSE` header.
pub fn serialize_payment_response_header(settlement_data: &Value) -> String {
    encode_header(settlement_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge() -> X402Challenge {
        X402Challenge {
            payment_id: "x402_abc".to_string(),
            resource_uri: "/api/data".to_string(),
            amount: "2500000".to_string(),
            currency: "USDC".to_string(),
            payee_address: "0xPayee".to_string(),
            network: "base".to_string(),
            token_address: "0xToken".to_string(),
            expires_at: 1_700_000_300,
            nonce: "nonce-1".to_string(),
        }
    }

    fn payload() -> X402Payload {
        X402Payload {
            payment_id: "x402_abc".to_string(),
            payer_address: "0xPayer".to_string(),
            amount: "2500000".to_string(),
            nonce: "nonce-1".to_string(),
            signature: "sig".to_string(),
            authorization: None,
        }
    }

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn happy_path_accepts() {
        let result = verify_payload(&payload(), &challenge(), Some(NOW), None);
        assert!(result.accepted);
    }

    #[test]
    fn expired_challenge_rejected() {
        let result = verify_payload(&payload(), &challenge(), Some(1_700_000_301), None);
        assert_eq!(result.reason, Some(RejectReason::X402ChallengeExpired));
    }

    #[test]
    fn nonce_mismatch_rejected() {
        let mut p = payload();
        p.nonce = "wrong".to_string();
        let result = verify_payload(&p, &challenge(), Some(NOW), None);
        assert_eq!(result.reason, Some(RejectReason::X402NonceMismatch));
    }

    #[test]
    fn amount_mismatch_rejected() {
        let mut p = payload();
        p.amount = "1".to_string();
        let result = verify_payload(&p, &challenge(), Some(NOW), None);
        assert_eq!(result.reason, Some(RejectReason::X402AmountMismatch));
    }

    #[test]
    fn payment_id_mismatch_rejected() {
        let mut p = payload();
        p.payment_id = "x402_other".to_string();
        let result = verify_payload(&p, &challenge(), Some(NOW), None);
        assert_eq!(result.reason, Some(RejectReason::X402PaymentIdMismatch));
    }

    #[test]
    fn signature_callback_sees_canonical_payload() {
        let c = challenge();
        let expected = "x402_abc|0xPayer|2500000|nonce-1|0xPayee|base".to_string();
        let check = |bytes: &[u8], sig: &str, payer: &str| {
            bytes == expected.as_bytes() && sig == "sig" && payer == "0xPayer"
        };
        let result = verify_payload(&payload(), &c, Some(NOW), Some(&check));
        assert!(result.accepted);
    }

    #[test]
    fn failing_signature_callback_rejects() {
        let check = |_: &[u8], _: &str, _: &str| false;
        let result = verify_payload(&payload(), &challenge(), Some(NOW), Some(&check));
        assert_eq!(result.reason, Some(RejectReason::X402SignatureInvalid));
    }

    #[test]
    fn panicking_signature_callback_rejects() {
        let check = |_: &[u8], _: &str, _: &str| -> bool { panic!("provider exploded") };
        let result = verify_payload(&payload(), &challenge(), Some(NOW), Some(&check));
        assert_eq!(result.reason, Some(RejectReason::X402SignatureInvalid));
    }

    #[test]
    fn version_validation() {
        assert!(validate_version("1.0").is_ok());
        assert!(validate_version("2.0").is_ok());
        assert!(validate_version("").is_ok());
        assert_eq!(validate_version("3.0"), Err(RejectReason::X402VersionUnsupported));
    }

    #[test]
    fn challenge_header_roundtrip() {
        let c = challenge();
        let header = serialize_challenge_header(&c);
        let parsed = parse_challenge_header(&header).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn payment_signature_header_roundtrip() {
        let p = payload();
        let header = serialize_payment_signature_header(&p);
        let parsed = parse_payment_signature_header(&header).unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn malformed_headers_error() {
        assert!(parse_challenge_header("!!!not-base64!!!").is_err());
        let junk = base64::engine::general_purpose::STANDARD.encode(b"not json");
        assert!(parse_challenge_header(&junk).is_err());
    }

    #[test]
    fn generated_challenges_are_unique() {
        let a = generate_challenge("/r", "100", "USDC", "0xP", "base", "0xT", Some(60));
        let b = generate_challenge("/r", "100", "USDC", "0xP", "base", "0xT", Some(60));
        assert_ne!(a.payment_id, b.payment_id);
        assert_ne!(a.nonce, b.nonce);
        assert!(a.payment_id.starts_with("x402_"));
    }
}
