//! AP2 mandate chain verification.
//!
//! [`MandateVerifier::verify_chain`] accepts a raw `{intent, cart, payment}`
//! bundle and runs the full check pipeline in order. The pipeline is
//! fail-closed: the first failing step rejects the bundle with its reason
//! code and nothing downstream runs. Replay-cache writes happen only after
//! every check has passed, so a rejected bundle never burns its mandate ids.

use std::sync::Arc;

use serde_json::Value;

use sardis_types::{RejectReason, TransactionModality};

use crate::canonical;
use crate::crypto::{self, VerificationMethod, VerifyOutcome};
use crate::error::MandateError;
use crate::identity::IdentityRegistry;
use crate::mandates::{CartMandate, IntentMandate, MandateChain, PaymentMandate};
use crate::replay::{ReplayCache, ReplayCheck};

/// Deployment environment. Production hard-requires an identity registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Staging,
    Development,
}

impl Environment {
    pub fn parse(s: &str) -> Self {
        match s {
            "production" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

/// Verifier configuration, read from `SARDIS_*` settings by the embedding
/// service.
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// Domains mandates may bind to (`SARDIS_ALLOWED_DOMAINS`).
    pub allowed_domains: Vec<String>,
    pub environment: Environment,
}

impl VerifierSettings {
    fn domain_allowed(&self, domain: &str) -> bool {
        self.allowed_domains.iter().any(|d| d.eq_ignore_ascii_case(domain))
    }
}

/// Outcome of chain verification.
#[derive(Debug)]
pub struct ChainVerification {
    pub accepted: bool,
    pub reason: Option<RejectReason>,
    /// Present only when accepted.
    pub chain: Option<MandateChain>,
}

impl ChainVerification {
    fn rejected(reason: RejectReason) -> Self {
        Self { accepted: false, reason: Some(reason), chain: None }
    }

    fn accepted(chain: MandateChain) -> Self {
        Self { accepted: true, reason: None, chain: Some(chain) }
    }
}

/// Verifies AP2 mandate chains against settings, identity, and the replay
/// cache.
pub struct MandateVerifier {
    settings: VerifierSettings,
    replay: Arc<dyn ReplayCache>,
    registry: Option<Arc<dyn IdentityRegistry>>,
}

impl MandateVerifier {
    pub fn new(settings: VerifierSettings, replay: Arc<dyn ReplayCache>) -> Self {
        Self { settings, replay, registry: None }
    }

    pub fn with_registry(mut self, registry: Arc<dyn IdentityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Verify a raw AP2 bundle at the current wall clock.
    pub fn verify_chain(
        &self,
        intent: &Value,
        cart: &Value,
        payment: &Value,
    ) -> Result<ChainVerification, MandateError> {
        self.verify_chain_at(intent, cart, payment, unix_now())
    }

    /// Verify a raw AP2 bundle at an explicit time (tests, reconciliation).
    pub fn verify_chain_at(
        &self,
        intent_raw: &Value,
        cart_raw: &Value,
        payment_raw: &Value,
        now: u64,
    ) -> Result<ChainVerification, MandateError> {
        // 1. Payload shape: required fields present with correct types.
        let Ok(intent) = serde_json::from_value::<IntentMandate>(intent_raw.clone()) else {
            return Ok(ChainVerification::rejected(RejectReason::InvalidPayload));
        };
        let Ok(cart) = serde_json::from_value::<CartMandate>(cart_raw.clone()) else {
            return Ok(ChainVerification::rejected(RejectReason::InvalidPayload));
        };
        let Ok(payment) = serde_json::from_value::<PaymentMandate>(payment_raw.clone()) else {
            return Ok(ChainVerification::rejected(RejectReason::InvalidPayload));
        };

        // 2. Type match.
        if intent.envelope.mandate_type != "intent" {
            return Ok(ChainVerification::rejected(RejectReason::IntentInvalidType));
        }
        if cart.envelope.mandate_type != "cart" {
            return Ok(ChainVerification::rejected(RejectReason::CartInvalidType));
        }
        if payment.envelope.mandate_type != "payment" || payment.purpose != "checkout" {
            return Ok(ChainVerification::rejected(RejectReason::PaymentInvalidType));
        }

        // 3. Expiration.
        for envelope in [&intent.envelope, &cart.envelope, &payment.envelope] {
            if envelope.is_expired(now) {
                return Ok(ChainVerification::rejected(RejectReason::MandateExpired));
            }
        }

        // 4. Domain authorization.
        for envelope in [&intent.envelope, &cart.envelope, &payment.envelope] {
            if !self.settings.domain_allowed(&envelope.domain) {
                return Ok(ChainVerification::rejected(RejectReason::DomainNotAuthorized));
            }
        }

        // 5. Signatures over the raw canonical bytes.
        for (raw, issuer, method, proof_value) in [
            (
                intent_raw,
                intent.envelope.issuer.as_str(),
                intent.envelope.proof.verification_method.as_str(),
                intent.envelope.proof.proof_value.as_str(),
            ),
            (
                cart_raw,
                cart.envelope.issuer.as_str(),
                cart.envelope.proof.verification_method.as_str(),
                cart.envelope.proof.proof_value.as_str(),
            ),
            (
                payment_raw,
                payment.envelope.issuer.as_str(),
                payment.envelope.proof.verification_method.as_str(),
                payment.envelope.proof.proof_value.as_str(),
            ),
        ] {
            match self.verify_signature(raw, issuer, method, proof_value)? {
                None => {}
                Some(reason) => return Ok(ChainVerification::rejected(reason)),
            }
        }

        // 6. Replay probe. Non-mutating here; ids are claimed only after
        // the remaining checks pass, so a later rejection leaves no trace.
        for envelope in [&intent.envelope, &cart.envelope, &payment.envelope] {
            if self.replay.contains(envelope.mandate_id.as_str())? {
                tracing::warn!(
                    mandate_id = %envelope.mandate_id,
                    subject = %envelope.subject,
                    "replayed mandate rejected"
                );
                return Ok(ChainVerification::rejected(RejectReason::ReplayDetected));
            }
        }

        // 7. Subject consistency.
        if intent.envelope.subject != cart.envelope.subject
            || cart.envelope.subject != payment.envelope.subject
        {
            return Ok(ChainVerification::rejected(RejectReason::SubjectMismatch));
        }

        // 8. Merchant binding.
        let Some(payment_merchant) = payment.merchant_domain.as_deref() else {
            return Ok(ChainVerification::rejected(RejectReason::PaymentMissingMerchantDomain));
        };
        if payment_merchant != cart.merchant_domain {
            return Ok(ChainVerification::rejected(RejectReason::MerchantDomainMismatch));
        }

        // 9. Amount binding.
        if payment.amount_minor > cart.total_minor() {
            return Ok(ChainVerification::rejected(RejectReason::PaymentExceedsCartTotal));
        }

        // 10. Agent presence and modality.
        if !payment.ai_agent_presence {
            return Ok(ChainVerification::rejected(RejectReason::PaymentAgentPresenceRequired));
        }
        if TransactionModality::parse(&payment.transaction_modality).is_none() {
            return Ok(ChainVerification::rejected(RejectReason::PaymentInvalidModality));
        }

        // All checks passed: atomically claim all three ids. A concurrent
        // bundle racing on any id loses here; ids claimed before the race
        // was detected stay claimed (replay-safe, never replay-prone).
        for envelope in [&payment.envelope, &cart.envelope, &intent.envelope] {
            match self
                .replay
                .check_and_insert(envelope.mandate_id.as_str(), envelope.expires_at)?
            {
                ReplayCheck::Fresh => {}
                ReplayCheck::Replay => {
                    tracing::warn!(
                        mandate_id = %envelope.mandate_id,
                        "mandate id claimed by concurrent verification"
                    );
                    return Ok(ChainVerification::rejected(RejectReason::ReplayDetected));
                }
            }
        }

        tracing::info!(
            subject = %payment.envelope.subject,
            amount_minor = payment.amount_minor,
            chain = %payment.chain,
            merchant = %cart.merchant_domain,
            "mandate chain accepted"
        );

        Ok(ChainVerification::accepted(MandateChain { intent, cart, payment }))
    }

    /// Check one mandate signature. Returns `Ok(None)` on success, a reject
    /// reason on domain failure, or `Err` on fatal configuration faults.
    fn verify_signature(
        &self,
        raw: &Value,
        issuer: &str,
        verification_method: &str,
        proof_value: &str,
    ) -> Result<Option<RejectReason>, MandateError> {
        let Some(method) = VerificationMethod::parse(verification_method) else {
            return Ok(Some(RejectReason::SignatureMalformed));
        };
        if proof_value.is_empty() {
            return Ok(Some(RejectReason::SignatureMalformed));
        }

        // In production the key must resolve through the identity registry;
        // a missing registry is a deployment fault, not a rejection.
        if self.settings.environment == Environment::Production {
            let Some(registry) = self.registry.as_deref() else {
                return Err(MandateError::RegistryRequired);
            };
            if !registry.is_authorized(issuer, method.algorithm, &method.pubkey_hex) {
                return Ok(Some(RejectReason::SignatureInvalid));
            }
        }

        let message = signing_bytes_of_raw(raw)?;
        match crypto::verify(method.algorithm, &method.pubkey_hex, &message, proof_value) {
            VerifyOutcome::Valid => Ok(None),
            VerifyOutcome::Malformed => Ok(Some(RejectReason::SignatureMalformed)),
            VerifyOutcome::Mismatch => Ok(Some(RejectReason::SignatureInvalid)),
        }
    }
}

/// Canonical signing bytes of a raw mandate value: `proof_value` cleared,
/// keys sorted, no whitespace. Operates on the wire value so the signature
/// covers exactly the bytes the issuer signed.
fn signing_bytes_of_raw(raw: &Value) -> Result<Vec<u8>, MandateError> {
    let mut value = raw.clone();
    if let Some(proof) = value.get_mut("proof").and_then(Value::as_object_mut) {
        proof.insert("proof_value".to_string(), Value::String(String::new()));
    }
    canonical::canonicalize(&value)
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Verify an already-typed chain by reserializing. Convenience for callers
/// holding typed mandates (the x402 settler does not use this path).
pub fn to_bundle(
    intent: &IntentMandate,
    cart: &CartMandate,
    payment: &PaymentMandate,
) -> Result<(Value, Value, Value), MandateError> {
    Ok((
        serde_json::to_value(intent)?,
        serde_json::to_value(cart)?,
        serde_json::to_value(payment)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{RegisteredKey, StaticIdentityRegistry};
    use crate::mandates::test_fixtures::{signed_bundle, TestSigner};
    use crate::replay::InMemoryReplayCache;

    const NOW: u64 = 1_700_000_000;

    fn verifier(replay: Arc<InMemoryReplayCache>) -> MandateVerifier {
        MandateVerifier::new(
            VerifierSettings {
                allowed_domains: vec!["example.com".to_string()],
                environment: Environment::Development,
            },
            replay,
        )
    }

    fn raw_bundle(signer: &TestSigner) -> (Value, Value, Value) {
        let (intent, cart, payment) = signed_bundle(signer, NOW);
        to_bundle(&intent, &cart, &payment).unwrap()
    }

    #[test]
    fn happy_path_accepts_and_claims_ids() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(Arc::clone(&replay));
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, payment) = raw_bundle(&signer);

        let result = verifier.verify_chain_at(&intent, &cart, &payment, NOW).unwrap();
        assert!(result.accepted, "rejected: {:?}", result.reason);
        let chain = result.chain.unwrap();
        assert_eq!(chain.amount_minor(), 5_500);
        assert_eq!(chain.subject(), "agent-001");
        assert!(replay.contains("payment-1").unwrap());
        assert!(replay.contains("cart-1").unwrap());
        assert!(replay.contains("intent-1").unwrap());
    }

    #[test]
    fn empty_intent_is_invalid_payload_with_no_replay_insert() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(Arc::clone(&replay));
        let signer = TestSigner::new("did:sardis:agent-001");
        let (_, cart, payment) = raw_bundle(&signer);

        let result = verifier
            .verify_chain_at(&serde_json::json!({}), &cart, &payment, NOW)
            .unwrap();
        assert!(!result.accepted);
        assert_eq!(result.reason, Some(RejectReason::InvalidPayload));
        assert!(!replay.contains("cart-1").unwrap());
        assert!(!replay.contains("payment-1").unwrap());
    }

    #[test]
    fn second_submission_is_replay() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(Arc::clone(&replay));
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, payment) = raw_bundle(&signer);

        assert!(verifier.verify_chain_at(&intent, &cart, &payment, NOW).unwrap().accepted);
        let second = verifier.verify_chain_at(&intent, &cart, &payment, NOW).unwrap();
        assert!(!second.accepted);
        assert_eq!(second.reason, Some(RejectReason::ReplayDetected));
    }

    #[test]
    fn payment_over_cart_total_rejected() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(Arc::clone(&replay));
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, mut payment) = signed_bundle(&signer, NOW);
        payment.amount_minor = 10_000; // cart total is 5_500
        payment.envelope.proof.proof_value = signer.sign_mandate(&payment);
        let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();

        let result = verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::PaymentExceedsCartTotal));
        assert!(!replay.contains("payment-1").unwrap());
    }

    #[test]
    fn expired_mandate_rejected() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(replay);
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, payment) = raw_bundle(&signer);

        let result = verifier
            .verify_chain_at(&intent, &cart, &payment, NOW + 10_000)
            .unwrap();
        assert_eq!(result.reason, Some(RejectReason::MandateExpired));
    }

    #[test]
    fn unauthorized_domain_rejected() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = MandateVerifier::new(
            VerifierSettings {
                allowed_domains: vec!["other.example".to_string()],
                environment: Environment::Development,
            },
            replay,
        );
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, payment) = raw_bundle(&signer);
        let result = verifier.verify_chain_at(&intent, &cart, &payment, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::DomainNotAuthorized));
    }

    #[test]
    fn tampered_amount_breaks_signature() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(replay);
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, mut payment_raw) = raw_bundle(&signer);
        payment_raw["amount_minor"] = serde_json::json!(1);

        let result = verifier.verify_chain_at(&intent, &cart, &payment_raw, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::SignatureInvalid));
    }

    #[test]
    fn garbage_verification_method_is_malformed() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(replay);
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, mut payment_raw) = raw_bundle(&signer);
        payment_raw["proof"]["verification_method"] = serde_json::json!("not-a-method");

        let result = verifier.verify_chain_at(&intent, &cart, &payment_raw, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::SignatureMalformed));
    }

    #[test]
    fn subject_mismatch_rejected() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(replay);
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, mut payment) = signed_bundle(&signer, NOW);
        payment.envelope.subject = "agent-999".to_string();
        payment.envelope.proof.proof_value = signer.sign_mandate(&payment);
        let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();

        let result = verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::SubjectMismatch));
    }

    #[test]
    fn missing_merchant_domain_rejected() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(replay);
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, mut payment) = signed_bundle(&signer, NOW);
        payment.merchant_domain = None;
        payment.envelope.proof.proof_value = signer.sign_mandate(&payment);
        let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();

        let result = verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::PaymentMissingMerchantDomain));
    }

    #[test]
    fn merchant_domain_mismatch_rejected() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(replay);
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, mut payment) = signed_bundle(&signer, NOW);
        payment.merchant_domain = Some("evil.example.com".to_string());
        payment.envelope.proof.proof_value = signer.sign_mandate(&payment);
        let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();

        let result = verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::MerchantDomainMismatch));
    }

    #[test]
    fn agent_presence_required() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(replay);
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, mut payment) = signed_bundle(&signer, NOW);
        payment.ai_agent_presence = false;
        payment.envelope.proof.proof_value = signer.sign_mandate(&payment);
        let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();

        let result = verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::PaymentAgentPresenceRequired));
    }

    #[test]
    fn unknown_modality_rejected() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(replay);
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, mut payment) = signed_bundle(&signer, NOW);
        payment.transaction_modality = "telepathic".to_string();
        payment.envelope.proof.proof_value = signer.sign_mandate(&payment);
        let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();

        let result = verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::PaymentInvalidModality));
    }

    #[test]
    fn wrong_mandate_types_rejected() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = verifier(replay);
        let signer = TestSigner::new("did:sardis:agent-001");

        let (mut intent, cart, payment) = signed_bundle(&signer, NOW);
        intent.envelope.mandate_type = "cart".to_string();
        intent.envelope.proof.proof_value = signer.sign_mandate(&intent);
        let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();
        let result = verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::IntentInvalidType));

        let (intent, cart, mut payment) = signed_bundle(&signer, NOW);
        payment.purpose = "subscription".to_string();
        payment.envelope.proof.proof_value = signer.sign_mandate(&payment);
        let (i, c, p) = to_bundle(&intent, &cart, &payment).unwrap();
        let result = verifier.verify_chain_at(&i, &c, &p, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::PaymentInvalidType));
    }

    #[test]
    fn production_without_registry_is_fatal() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = MandateVerifier::new(
            VerifierSettings {
                allowed_domains: vec!["example.com".to_string()],
                environment: Environment::Production,
            },
            replay,
        );
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, payment) = raw_bundle(&signer);

        let err = verifier.verify_chain_at(&intent, &cart, &payment, NOW).unwrap_err();
        assert!(matches!(err, MandateError::RegistryRequired));
    }

    #[test]
    fn production_unregistered_key_is_signature_invalid() {
        let replay = Arc::new(InMemoryReplayCache::new());
        let registry = Arc::new(StaticIdentityRegistry::new());
        let verifier = MandateVerifier::new(
            VerifierSettings {
                allowed_domains: vec!["example.com".to_string()],
                environment: Environment::Production,
            },
            replay,
        )
        .with_registry(registry.clone());

        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, cart, payment) = raw_bundle(&signer);
        let result = verifier.verify_chain_at(&intent, &cart, &payment, NOW).unwrap();
        assert_eq!(result.reason, Some(RejectReason::SignatureInvalid));

        // Registering the key makes the same bundle verifiable.
        registry.register(
            "did:sardis:agent-001",
            RegisteredKey {
                algorithm: crate::crypto::SigAlgorithm::Ed25519,
                pubkey_hex: signer.pubkey_hex(),
            },
        );
        let result = verifier.verify_chain_at(&intent, &cart, &payment, NOW).unwrap();
        assert!(result.accepted);
    }
}
