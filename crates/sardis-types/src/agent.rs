//! Agent and wallet domain entities.
//!
//! Agents are created by an organization admin, mutated only through
//! versioned updates, and never deleted — deactivation flips `active`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, AmountMinor, WalletId};

/// Know-Your-Agent verification level, analogous to KYC for autonomous agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KyaLevel {
    None,
    Basic,
    Verified,
    Attested,
}

impl KyaLevel {
    /// Confidence factor contribution for this level.
    pub fn confidence_factor(self) -> f64 {
        match self {
            KyaLevel::None => 0.0,
            KyaLevel::Basic => 0.5,
            KyaLevel::Verified => 0.8,
            KyaLevel::Attested => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KyaLevel::None => "none",
            KyaLevel::Basic => "basic",
            KyaLevel::Verified => "verified",
            KyaLevel::Attested => "attested",
        }
    }
}

/// Hard spending ceilings configured at agent creation. These are the
/// outer bounds; the live policy (sardis-policy) tracks spend against them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingLimits {
    pub per_tx: AmountMinor,
    pub daily: AmountMinor,
    pub weekly: AmountMinor,
    pub monthly: AmountMinor,
    pub total: AmountMinor,
}

impl Default for SpendingLimits {
    fn default() -> Self {
        Self {
            per_tx: 100_00,
            daily: 500_00,
            weekly: 2_000_00,
            monthly: 5_000_00,
            total: 10_000_00,
        }
    }
}

/// An autonomous agent bound to custodial wallets and a signed policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub owner_id: String,
    pub name: String,
    pub spending_limits: SpendingLimits,
    /// Reference to the active policy version in the policy store.
    pub policy_ref: String,
    pub wallet_ids: Vec<WalletId>,
    pub kya_level: KyaLevel,
    pub active: bool,
    /// Bumped on every mutation; updates carry the expected version.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: AgentId::generate(),
            owner_id: owner_id.into(),
            name: name.into(),
            spending_limits: SpendingLimits::default(),
            policy_ref: String::new(),
            wallet_ids: Vec::new(),
            kya_level: KyaLevel::None,
            active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Agents are never deleted, only deactivated.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Frozen,
}

/// Custodial wallet owned by an agent. One wallet may hold addresses on
/// multiple chains; the MPC provider custodies the key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: WalletId,
    pub agent_id: AgentId,
    /// chain name -> address on that chain.
    pub chain_addresses: std::collections::BTreeMap<String, String>,
    pub mpc_provider: String,
    pub currency: String,
    pub status: WalletStatus,
}

impl Wallet {
    pub fn address_on(&self, chain: &str) -> Option<&str> {
        self.chain_addresses.get(chain).map(String::as_str)
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kya_levels_are_ordered() {
        assert!(KyaLevel::None < KyaLevel::Basic);
        assert!(KyaLevel::Verified < KyaLevel::Attested);
        assert_eq!(KyaLevel::Attested.confidence_factor(), 1.0);
    }

    #[test]
    fn deactivation_bumps_version() {
        let mut agent = Agent::new("org-1", "proc-bot");
        assert!(agent.active);
        agent.deactivate();
        assert!(!agent.active);
        assert_eq!(agent.version, 2);
    }

    #[test]
    fn wallet_resolves_chain_address() {
        let mut addresses = std::collections::BTreeMap::new();
        addresses.insert("base".to_string(), "0xabc".to_string());
        let wallet = Wallet {
            wallet_id: WalletId::from("w-1"),
            agent_id: AgentId::from("a-1"),
            chain_addresses: addresses,
            mpc_provider: "turnkey".to_string(),
            currency: "USDC".to_string(),
            status: WalletStatus::Active,
        };
        assert_eq!(wallet.address_on("base"), Some("0xabc"));
        assert_eq!(wallet.address_on("solana"), None);
    }
}
