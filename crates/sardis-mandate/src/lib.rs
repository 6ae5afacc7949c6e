//! AP2 mandate chain and x402 challenge verification for the Sardis
//! payment core.
//!
//! # Two intake protocols
//!
//! - **AP2** ([`MandateVerifier`]) — verifies a signed `{intent, cart,
//!   payment}` mandate chain with fail-closed semantics and replay
//!   protection.
//! - **x402** ([`x402`]) — verifies a signed client payload against a
//!   server-issued HTTP 402 challenge.
//!
//! Both paths yield stable rejection codes
//! ([`RejectReason`](sardis_types::RejectReason)) as data; errors are
//! reserved for storage and configuration faults.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod mandates;
pub mod replay;
pub mod verifier;
pub mod x402;

pub use canonical::{canonical_hash_hex, canonicalize, hash_sha256};
pub use crypto::{SigAlgorithm, VerificationMethod, VerifyOutcome};
pub use error::MandateError;
pub use identity::{IdentityRegistry, RegisteredKey, StaticIdentityRegistry};
pub use mandates::{
    CartMandate, IntentMandate, LineItem, MandateChain, MandateEnvelope, PaymentMandate, VcProof,
};
pub use replay::{InMemoryReplayCache, ReplayCache, ReplayCheck, SqliteReplayCache};
pub use verifier::{ChainVerification, Environment, MandateVerifier, VerifierSettings};
