//! Shared domain types for the Sardis payment orchestration core.
//!
//! Monetary amounts are integer **minor units** throughout (cents for fiat,
//! token base units for stablecoins). Conversion to human-readable decimals
//! happens only at the API boundary, never inside the core.

pub mod agent;
pub mod receipt;
pub mod reject;

pub use agent::{Agent, KyaLevel, SpendingLimits, Wallet, WalletStatus};
pub use receipt::{Receipt, ReceiptStatus, TransactionModality};
pub use reject::RejectReason;

use serde::{Deserialize, Serialize};

/// Amount in minor units. Signed arithmetic is never needed; spends are
/// always non-negative and checked against limits before recording.
pub type AmountMinor = u64;

/// Unix timestamp in seconds.
pub type UnixSeconds = u64;

/// Stable identifier newtypes. Kept as strings because every store in the
/// core addresses entities by opaque id (spec: identifiers with repository
/// lookups, no in-memory graph ownership).
macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh random id with the conventional prefix.
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), uuid::Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

id_type!(
    /// Identifier of an autonomous agent.
    AgentId,
    "agent"
);
id_type!(
    /// Identifier of a custodial wallet.
    WalletId,
    "wallet"
);
id_type!(
    /// Identifier of an agent group.
    GroupId,
    "group"
);
id_type!(
    /// Identifier of a signed mandate.
    MandateId,
    "mandate"
);
id_type!(
    /// Identifier of a ledger transaction row.
    TxId,
    "tx"
);
id_type!(
    /// Identifier of an approval request.
    ApprovalId,
    "approval"
);
id_type!(
    /// Identifier of a compliance audit entry.
    AuditId,
    "audit"
);
id_type!(
    /// Identifier of a ledger anchor batch.
    AnchorId,
    "anchor"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix_and_are_unique() {
        let a = AgentId::generate();
        let b = AgentId::generate();
        assert!(a.as_str().starts_with("agent_"));
        assert_ne!(a, b);
    }

    #[test]
    fn id_serde_is_transparent() {
        let id = WalletId::from("wallet-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"wallet-7\"");
        let back: WalletId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
