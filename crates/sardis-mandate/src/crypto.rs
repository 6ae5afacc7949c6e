//! Signature verification primitives for mandate proofs.
//!
//! A mandate proof names its key as `did#alg:pubkey_hex`. Two algorithms are
//! supported: Ed25519 (ed25519-dalek) and secp256k1 ECDSA (k256). All
//! failure modes collapse into two rejection-shaped outcomes: a key or
//! signature that cannot be decoded is `malformed`, a decodable pair that
//! does not verify is `mismatch`.

use ed25519_dalek::Verifier as _;
use k256::ecdsa::signature::Verifier as _;

/// Signature algorithm named in a `verification_method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigAlgorithm {
    Ed25519,
    Secp256k1,
}

impl SigAlgorithm {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ed25519" => Some(SigAlgorithm::Ed25519),
            "secp256k1" => Some(SigAlgorithm::Secp256k1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SigAlgorithm::Ed25519 => "ed25519",
            SigAlgorithm::Secp256k1 => "secp256k1",
        }
    }
}

/// Outcome of a signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    /// Key or signature bytes could not be decoded.
    Malformed,
    /// Well-formed inputs, cryptographic mismatch.
    Mismatch,
}

/// Parsed `did#alg:pubkey_hex` verification method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationMethod {
    pub did: String,
    pub algorithm: SigAlgorithm,
    pub pubkey_hex: String,
}

impl VerificationMethod {
    /// Parse `did#alg:pubkey_hex`. Returns `None` on any structural fault;
    /// the verifier maps that to `signature_malformed`.
    pub fn parse(s: &str) -> Option<Self> {
        let (did, rest) = s.split_once('#')?;
        let (alg, pubkey_hex) = rest.split_once(':')?;
        if did.is_empty() || pubkey_hex.is_empty() {
            return None;
        }
        Some(Self {
            did: did.to_string(),
            algorithm: SigAlgorithm::parse(alg)?,
            pubkey_hex: pubkey_hex.to_string(),
        })
    }
}

impl std::fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}:{}", self.did, self.algorithm.as_str(), self.pubkey_hex)
    }
}

/// Verify `signature` over `message` with a hex-encoded public key.
pub fn verify(
    algorithm: SigAlgorithm,
    pubkey_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> VerifyOutcome {
    let Ok(pubkey_bytes) = hex::decode(pubkey_hex) else {
        return VerifyOutcome::Malformed;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex.strip_prefix("0x").unwrap_or(signature_hex))
    else {
        return VerifyOutcome::Malformed;
    };

    match algorithm {
        SigAlgorithm::Ed25519 => verify_ed25519(&pubkey_bytes, message, &sig_bytes),
        SigAlgorithm::Secp256k1 => verify_secp256k1(&pubkey_bytes, message, &sig_bytes),
    }
}

fn verify_ed25519(pubkey: &[u8], message: &[u8], signature: &[u8]) -> VerifyOutcome {
    let Ok(key_bytes) = <[u8; 32]>::try_from(pubkey) else {
        return VerifyOutcome::Malformed;
    };
    let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes) else {
        return VerifyOutcome::Malformed;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return VerifyOutcome::Malformed;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    match verifying_key.verify(message, &sig) {
        Ok(()) => VerifyOutcome::Valid,
        Err(_) => VerifyOutcome::Mismatch,
    }
}

fn verify_secp256k1(pubkey: &[u8], message: &[u8], signature: &[u8]) -> VerifyOutcome {
    let Ok(verifying_key) = k256::ecdsa::VerifyingKey::from_sec1_bytes(pubkey) else {
        return VerifyOutcome::Malformed;
    };
    let Ok(sig) = k256::ecdsa::Signature::from_slice(signature) else {
        return VerifyOutcome::Malformed;
    };
    match verifying_key.verify(message, &sig) {
        Ok(()) => VerifyOutcome::Valid,
        Err(_) => VerifyOutcome::Mismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Signer as _;
    use k256::ecdsa::signature::Signer as _;

    fn ed25519_pair() -> (ed25519_dalek::SigningKey, String) {
        let key = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        let pubkey_hex = hex::encode(key.verifying_key().to_bytes());
        (key, pubkey_hex)
    }

    #[test]
    fn ed25519_valid_signature() {
        let (key, pubkey_hex) = ed25519_pair();
        let msg = b"canonical mandate bytes";
        let sig = hex::encode(key.sign(msg).to_bytes());
        assert_eq!(verify(SigAlgorithm::Ed25519, &pubkey_hex, msg, &sig), VerifyOutcome::Valid);
    }

    #[test]
    fn ed25519_wrong_message_is_mismatch() {
        let (key, pubkey_hex) = ed25519_pair();
        let sig = hex::encode(key.sign(b"original").to_bytes());
        assert_eq!(
            verify(SigAlgorithm::Ed25519, &pubkey_hex, b"tampered", &sig),
            VerifyOutcome::Mismatch
        );
    }

    #[test]
    fn ed25519_garbage_key_is_malformed() {
        assert_eq!(
            verify(SigAlgorithm::Ed25519, "zz-not-hex", b"m", &"00".repeat(64)),
            VerifyOutcome::Malformed
        );
        // hex, but wrong length
        assert_eq!(
            verify(SigAlgorithm::Ed25519, "abcd", b"m", &"00".repeat(64)),
            VerifyOutcome::Malformed
        );
    }

    #[test]
    fn secp256k1_valid_signature() {
        let key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let pubkey_hex = hex::encode(key.verifying_key().to_sec1_bytes());
        let msg = b"payment payload";
        let sig: k256::ecdsa::Signature = key.sign(msg);
        let sig_hex = hex::encode(sig.to_bytes());
        assert_eq!(verify(SigAlgorithm::Secp256k1, &pubkey_hex, msg, &sig_hex), VerifyOutcome::Valid);
    }

    #[test]
    fn secp256k1_wrong_key_is_mismatch() {
        let key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let other = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let pubkey_hex = hex::encode(other.verifying_key().to_sec1_bytes());
        let msg = b"payment payload";
        let sig: k256::ecdsa::Signature = key.sign(msg);
        assert_eq!(
            verify(SigAlgorithm::Secp256k1, &pubkey_hex, msg, &hex::encode(sig.to_bytes())),
            VerifyOutcome::Mismatch
        );
    }

    #[test]
    fn verification_method_parses() {
        let vm = VerificationMethod::parse("did:sardis:agent-001#ed25519:ab12cd").unwrap();
        assert_eq!(vm.did, "did:sardis:agent-001");
        assert_eq!(vm.algorithm, SigAlgorithm::Ed25519);
        assert_eq!(vm.pubkey_hex, "ab12cd");
        assert_eq!(vm.to_string(), "did:sardis:agent-001#ed25519:ab12cd");
    }

    #[test]
    fn verification_method_rejects_structural_faults() {
        assert!(VerificationMethod::parse("no-fragment").is_none());
        assert!(VerificationMethod::parse("did#rsa:abcd").is_none());
        assert!(VerificationMethod::parse("did#ed25519:").is_none());
        assert!(VerificationMethod::parse("#ed25519:abcd").is_none());
    }

    #[test]
    fn signature_hex_prefix_is_tolerated() {
        let (key, pubkey_hex) = ed25519_pair();
        let msg = b"prefixed";
        let sig = format!("0x{}", hex::encode(key.sign(msg).to_bytes()));
        assert_eq!(verify(SigAlgorithm::Ed25519, &pubkey_hex, msg, &sig), VerifyOutcome::Valid);
    }
}
