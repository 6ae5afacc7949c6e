//! AP2 mandate types: the signed envelope plus the intent, cart, and
//! payment variants.
//!
//! A mandate is created by agent or merchant signing, verified exactly once,
//! recorded in the replay cache until expiry, and never mutated. The
//! canonical signing bytes of a mandate are its deterministic JSON with
//! `proof.proof_value` cleared.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sardis_types::{AmountMinor, MandateId, UnixSeconds};

use crate::canonical;
use crate::error::MandateError;

/// Verifiable-credential style proof attached to every mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcProof {
    /// `did#alg:pubkey_hex`
    pub verification_method: String,
    /// RFC 3339 creation time of the proof.
    pub created: String,
    /// Hex-encoded signature over the mandate's canonical bytes.
    pub proof_value: String,
    #[serde(default = "default_proof_purpose")]
    pub proof_purpose: String,
}

fn default_proof_purpose() -> String {
    "assertionMethod".to_string()
}

/// Fields shared by all three mandate variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MandateEnvelope {
    pub mandate_id: MandateId,
    pub mandate_type: String,
    pub issuer: String,
    /// The agent the mandate speaks for.
    pub subject: String,
    pub domain: String,
    pub nonce: String,
    pub expires_at: UnixSeconds,
    pub proof: VcProof,
}

impl MandateEnvelope {
    pub fn is_expired(&self, now: UnixSeconds) -> bool {
        self.expires_at <= now
    }
}

/// A single line item in a cart mandate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub description: String,
    pub quantity: u32,
    pub unit_price_minor: AmountMinor,
}

/// Intent mandate: what the agent was asked to accomplish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentMandate {
    #[serde(flatten)]
    pub envelope: MandateEnvelope,
    pub requested_amount: AmountMinor,
    pub merchant_domain: String,
    pub scope: String,
}

/// Cart mandate: the merchant-signed cart contents the payment binds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartMandate {
    #[serde(flatten)]
    pub envelope: MandateEnvelope,
    pub line_items: Vec<LineItem>,
    pub subtotal_minor: AmountMinor,
    pub taxes_minor: AmountMinor,
    pub currency: String,
    pub merchant_domain: String,
}

impl CartMandate {
    /// Ceiling the payment amount must not exceed.
    pub fn total_minor(&self) -> AmountMinor {
        self.subtotal_minor.saturating_add(self.taxes_minor)
    }
}

/// Payment mandate: the final authorization to move funds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMandate {
    #[serde(flatten)]
    pub envelope: MandateEnvelope,
    /// Must be "checkout" for AP2 chains.
    pub purpose: String,
    pub amount_minor: AmountMinor,
    pub token: String,
    pub chain: String,
    pub destination: String,
    pub audit_hash: String,
    pub ai_agent_presence: bool,
    pub transaction_modality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_domain: Option<String>,
}

/// A fully verified `(intent, cart, payment)` tuple. Constructed only by
/// the verifier; downstream components treat its invariants as established.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MandateChain {
    pub intent: IntentMandate,
    pub cart: CartMandate,
    pub payment: PaymentMandate,
}

impl MandateChain {
    pub fn subject(&self) -> &str {
        &self.payment.envelope.subject
    }

    pub fn amount_minor(&self) -> AmountMinor {
        self.payment.amount_minor
    }
}

/// Canonical signing bytes: the mandate's JSON with `proof_value` cleared,
/// keys sorted, no whitespace.
pub fn signing_bytes<T: Serialize>(mandate: &T) -> Result<Vec<u8>, MandateError> {
    let mut value = serde_json::to_value(mandate)?;
    if let Some(proof) = value.get_mut("proof") {
        if let Some(obj) = proof.as_object_mut() {
            obj.insert("proof_value".to_string(), Value::String(String::new()));
        }
    }
    canonical::canonicalize(&value)
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::*;
    use super::*;
    use crate::crypto::{self, SigAlgorithm, VerifyOutcome};

    #[test]
    fn signing_bytes_clear_proof_value() {
        let signer = TestSigner::new("did:sardis:agent-001");
        let (intent, _, _) = signed_bundle(&signer, 1_700_000_000);
        let bytes = signing_bytes(&intent).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(r#""proof_value":"""#));
        // The signature is over the cleared form, so re-signing verifies.
        assert_eq!(
            crypto::verify(
                SigAlgorithm::Ed25519,
                &signer.pubkey_hex(),
                &signing_bytes(&intent).unwrap(),
                &intent.envelope.proof.proof_value,
            ),
            VerifyOutcome::Valid
        );
    }

    #[test]
    fn cart_total_saturates() {
        let signer = TestSigner::new("did:sardis:x");
        let (_, mut cart, _) = signed_bundle(&signer, 1_700_000_000);
        cart.subtotal_minor = u64::MAX;
        cart.taxes_minor = 10;
        assert_eq!(cart.total_minor(), u64::MAX);
    }

    #[test]
    fn envelope_expiry() {
        let signer = TestSigner::new("did:sardis:x");
        let env = envelope("m-1", "intent", "agent-001", &signer, 100);
        assert!(!env.is_expired(99));
        assert!(env.is_expired(100));
        assert!(env.is_expired(101));
    }

    #[test]
    fn mandate_envelope_flattens_on_wire() {
        let signer = TestSigner::new("did:sardis:x");
        let (intent, _, _) = signed_bundle(&signer, 1_700_000_000);
        let json = serde_json::to_value(&intent).unwrap();
        // Envelope fields sit at the top level, not nested.
        assert_eq!(json["mandate_id"], "intent-1");
        assert_eq!(json["mandate_type"], "intent");
        assert_eq!(json["requested_amount"], 10_000);
    }
}
