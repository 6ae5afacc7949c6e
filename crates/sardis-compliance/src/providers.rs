//! Provider seams for compliance checks.
//!
//! The real deployments plug HTTP-backed providers (Elliptic for sanctions,
//! Persona for KYC) in behind these traits; the static implementations here
//! serve simulated mode and tests. Provider internals are out of core scope.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use sardis_types::AmountMinor;

use crate::error::ComplianceError;

/// The payment facts a provider sees.
#[derive(Debug, Clone)]
pub struct PaymentContext {
    pub mandate_id: String,
    /// The agent subject (DID or agent id) originating the payment.
    pub subject: String,
    pub destination: String,
    pub token: String,
    pub chain: String,
    pub amount_minor: AmountMinor,
    pub tenant: Option<String>,
}

/// Result of a sanctions screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanctionsResult {
    pub hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_name: Option<String>,
}

#[async_trait]
pub trait SanctionsProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Screen a destination address. `Err` means the screen could not be
    /// completed; the gate treats that as a block.
    async fn screen_address(&self, address: &str) -> Result<SanctionsResult, ComplianceError>;
}

/// KYC verification state for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    Verified,
    Pending,
    Unverified,
    Rejected,
}

#[async_trait]
pub trait KycProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn verify_subject(&self, subject: &str) -> Result<KycStatus, ComplianceError>;
}

/// Outcome of the base rule check.
#[derive(Debug, Clone)]
pub struct RuleCheck {
    pub allowed: bool,
    pub rule_id: Option<String>,
    pub detail: Option<String>,
}

impl RuleCheck {
    pub fn allow() -> Self {
        Self { allowed: true, rule_id: None, detail: None }
    }

    pub fn deny(rule_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { allowed: false, rule_id: Some(rule_id.into()), detail: Some(detail.into()) }
    }
}

/// Base rule provider: token/chain permissibility and per-tenant rules,
/// evaluated before the external screens.
#[async_trait]
pub trait BaseRuleProvider: Send + Sync {
    async fn check(&self, payment: &PaymentContext) -> Result<RuleCheck, ComplianceError>;
}

/// Sanctions list held in memory. Addresses compare case-insensitively.
#[derive(Default)]
pub struct StaticSanctionsList {
    addresses: DashSet<String>,
}

impl StaticSanctionsList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, address: &str) {
        self.addresses.insert(address.to_ascii_lowercase());
    }
}

#[async_trait]
impl SanctionsProvider for StaticSanctionsList {
    fn provider_name(&self) -> &'static str {
        "elliptic"
    }

    async fn screen_address(&self, address: &str) -> Result<SanctionsResult, ComplianceError> {
        let hit = self.addresses.contains(&address.to_ascii_lowercase());
        Ok(SanctionsResult { hit, list_name: hit.then(|| "ofac_sdn".to_string()) })
    }
}

/// KYC directory held in memory; unknown subjects are unverified.
#[derive(Default)]
pub struct StaticKycDirectory {
    statuses: DashMap<String, KycStatus>,
}

impl StaticKycDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, subject: &str, status: KycStatus) {
        self.statuses.insert(subject.to_string(), status);
    }
}

#[async_trait]
impl KycProvider for StaticKycDirectory {
    fn provider_name(&self) -> &'static str {
        "persona"
    }

    async fn verify_subject(&self, subject: &str) -> Result<KycStatus, ComplianceError> {
        Ok(self.statuses.get(subject).map(|s| *s).unwrap_or(KycStatus::Unverified))
    }
}

/// Base rules: allowed token and chain sets, plus a per-payment amount
/// ceiling. Empty sets allow everything.
#[derive(Default)]
pub struct TokenChainRuleProvider {
    pub allowed_tokens: Vec<String>,
    pub allowed_chains: Vec<String>,
    pub max_amount_minor: Option<AmountMinor>,
}

#[async_trait]
impl BaseRuleProvider for TokenChainRuleProvider {
    async fn check(&self, payment: &PaymentContext) -> Result<RuleCheck, ComplianceError> {
        if !self.allowed_tokens.is_empty()
            && !self
                .allowed_tokens
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&payment.token))
        {
            return Ok(RuleCheck::deny(
                "token_not_permitted",
                format!("token {} is not permitted", payment.token),
            ));
        }
        if !self.allowed_chains.is_empty()
            && !self
                .allowed_chains
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&payment.chain))
        {
            return Ok(RuleCheck::deny(
                "chain_not_permitted",
                format!("chain {} is not permitted", payment.chain),
            ));
        }
        if let Some(max) = self.max_amount_minor {
            if payment.amount_minor > max {
                return Ok(RuleCheck::deny(
                    "amount_ceiling",
                    format!("amount {} exceeds tenant ceiling {max}", payment.amount_minor),
                ));
            }
        }
        Ok(RuleCheck::allow())
    }
}
