//! Identity registry: resolves a DID to the public keys authorized to sign
//! for it.
//!
//! In production (`SARDIS_ENVIRONMENT=production`) the verifier refuses to
//! run without a registry; outside production the key embedded in the
//! `verification_method` is trusted directly (self-certifying mode for
//! development and tests).

use std::collections::HashMap;

use dashmap::DashMap;

use crate::crypto::SigAlgorithm;

/// A registered public key for a DID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredKey {
    pub algorithm: SigAlgorithm,
    pub pubkey_hex: String,
}

/// Resolves DIDs to their authorized keys. Implementations must be
/// thread-safe; resolution may be backed by a directory service.
pub trait IdentityRegistry: Send + Sync {
    /// All keys currently authorized for `did`, or `None` if unknown.
    fn resolve(&self, did: &str) -> Option<Vec<RegisteredKey>>;

    /// Whether `pubkey_hex` is an authorized key for `did`.
    fn is_authorized(&self, did: &str, algorithm: SigAlgorithm, pubkey_hex: &str) -> bool {
        self.resolve(did)
            .map(|keys| {
                keys.iter().any(|k| {
                    k.algorithm == algorithm && k.pubkey_hex.eq_ignore_ascii_case(pubkey_hex)
                })
            })
            .unwrap_or(false)
    }
}

/// Registry with a fixed key set, loaded at startup.
#[derive(Default)]
pub struct StaticIdentityRegistry {
    keys: DashMap<String, Vec<RegisteredKey>>,
}

impl StaticIdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: HashMap<String, Vec<RegisteredKey>>) -> Self {
        let registry = Self::new();
        for (did, keys) in map {
            registry.keys.insert(did, keys);
        }
        registry
    }

    pub fn register(&self, did: impl Into<String>, key: RegisteredKey) {
        self.keys.entry(did.into()).or_default().push(key);
    }

    pub fn revoke(&self, did: &str, pubkey_hex: &str) {
        if let Some(mut keys) = self.keys.get_mut(did) {
            keys.retain(|k| !k.pubkey_hex.eq_ignore_ascii_case(pubkey_hex));
        }
    }
}

impl IdentityRegistry for StaticIdentityRegistry {
    fn resolve(&self, did: &str) -> Option<Vec<RegisteredKey>> {
        self.keys.get(did).map(|keys| keys.clone())
    }
}
