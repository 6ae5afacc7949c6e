//! Per-agent spending policy: per-transaction and lifetime caps, rolling
//! time-window limits, scopes, and merchant allow/deny rules.
//!
//! A window auto-resets when its duration has elapsed since `window_start`;
//! the reset happens lazily on the next evaluation or spend, so an idle
//! policy never needs a background job.

use serde::{Deserialize, Serialize};

use sardis_types::{AgentId, AmountMinor, RejectReason, UnixSeconds};

/// Evaluation outcome: `(allowed, reason)` as data, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    pub fn deny(reason: RejectReason) -> Self {
        Self { allowed: false, reason: Some(reason) }
    }
}

/// Trust tier an agent's policy was provisioned at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Sandbox,
    Low,
    Standard,
    High,
    Unlimited,
}

/// Rolling time window kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Daily,
    Weekly,
    Monthly,
}

impl WindowKind {
    pub fn duration_secs(self) -> u64 {
        match self {
            WindowKind::Daily => 86_400,
            WindowKind::Weekly => 7 * 86_400,
            WindowKind::Monthly => 30 * 86_400,
        }
    }
}

/// One rolling spend window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindowLimit {
    pub window: WindowKind,
    pub limit_amount: AmountMinor,
    pub current_spent: AmountMinor,
    pub window_start: UnixSeconds,
}

impl TimeWindowLimit {
    pub fn new(window: WindowKind, limit_amount: AmountMinor, now: UnixSeconds) -> Self {
        Self { window, limit_amount, current_spent: 0, window_start: now }
    }

    /// Reset the window if its duration has elapsed. Returns whether a
    /// reset occurred.
    pub fn reset_if_expired(&mut self, now: UnixSeconds) -> bool {
        if now.saturating_sub(self.window_start) >= self.window.duration_secs() {
            self.current_spent = 0;
            self.window_start = now;
            true
        } else {
            false
        }
    }

    pub fn remaining(&mut self, now: UnixSeconds) -> AmountMinor {
        self.reset_if_expired(now);
        self.limit_amount.saturating_sub(self.current_spent)
    }

    pub fn can_spend(&mut self, amount: AmountMinor, now: UnixSeconds) -> bool {
        self.reset_if_expired(now);
        self.current_spent.saturating_add(amount) <= self.limit_amount
    }

    pub fn record_spend(&mut self, amount: AmountMinor, now: UnixSeconds) {
        self.reset_if_expired(now);
        self.current_spent = self.current_spent.saturating_add(amount);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Allow,
    Deny,
}

/// A merchant allow/deny rule. A rule with neither `merchant_id` nor
/// `category` matches nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantRule {
    pub rule_type: RuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_tx: Option<AmountMinor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<AmountMinor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<UnixSeconds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MerchantRule {
    pub fn is_active(&self, now: UnixSeconds) -> bool {
        self.expires_at.map(|e| e > now).unwrap_or(true)
    }

    pub fn matches(&self, merchant_id: Option<&str>, category: Option<&str>) -> bool {
        let id_match = match (&self.merchant_id, merchant_id) {
            (Some(rule_id), Some(id)) => rule_id.eq_ignore_ascii_case(id),
            (Some(_), None) => false,
            (None, _) => true,
        };
        let category_match = match (&self.category, category) {
            (Some(rule_cat), Some(cat)) => rule_cat.eq_ignore_ascii_case(cat),
            (Some(_), None) => false,
            (None, _) => true,
        };
        // A fully wildcard rule matches nothing; it would be a footgun.
        if self.merchant_id.is_none() && self.category.is_none() {
            return false;
        }
        id_match && category_match
    }
}

/// Scope wildcard accepted in `allowed_scopes`.
pub const SCOPE_ALL: &str = "*";

/// The live spending policy for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendingPolicy {
    pub policy_id: String,
    pub agent_id: AgentId,
    pub trust_level: TrustLevel,
    pub limit_per_tx: AmountMinor,
    pub limit_total: AmountMinor,
    pub spent_total: AmountMinor,
    pub daily: TimeWindowLimit,
    pub weekly: TimeWindowLimit,
    pub monthly: TimeWindowLimit,
    /// `["*"]` means all scopes permitted.
    pub allowed_scopes: Vec<String>,
    /// Evaluated in recorded order, deny rules first.
    pub merchant_rules: Vec<MerchantRule>,
    /// Violations recorded against this agent (feeds confidence scoring).
    pub violation_count: u32,
}

impl SpendingPolicy {
    /// Evaluate an `(amount + fee)` spend. Steps follow the documented
    /// order; the first failing step decides the reason.
    pub fn evaluate(
        &mut self,
        amount: AmountMinor,
        fee: AmountMinor,
        merchant_id: Option<&str>,
        merchant_category: Option<&str>,
        scope: Option<&str>,
        now: UnixSeconds,
    ) -> PolicyDecision {
        let total_cost = amount.saturating_add(fee);

        // Scope.
        if !self.scope_allowed(scope) {
            return PolicyDecision::deny(RejectReason::ScopeNotAllowed);
        }

        // Per-transaction cap.
        if total_cost > self.limit_per_tx {
            return PolicyDecision::deny(RejectReason::PerTransactionLimit);
        }

        // Lifetime cap.
        if self.spent_total.saturating_add(total_cost) > self.limit_total {
            return PolicyDecision::deny(RejectReason::TotalLimitExceeded);
        }

        // Rolling windows.
        for window in [&mut self.daily, &mut self.weekly, &mut self.monthly] {
            if !window.can_spend(total_cost, now) {
                return PolicyDecision::deny(RejectReason::TimeWindowLimit);
            }
        }

        // Merchant rules.
        self.evaluate_merchant_rules(amount, merchant_id, merchant_category, now)
    }

    fn scope_allowed(&self, scope: Option<&str>) -> bool {
        if self.allowed_scopes.iter().any(|s| s == SCOPE_ALL) {
            return true;
        }
        match scope {
            Some(scope) => self.allowed_scopes.iter().any(|s| s.eq_ignore_ascii_case(scope)),
            // Unscoped requests are only allowed under the wildcard.
            None => false,
        }
    }

    fn evaluate_merchant_rules(
        &self,
        amount: AmountMinor,
        merchant_id: Option<&str>,
        merchant_category: Option<&str>,
        now: UnixSeconds,
    ) -> PolicyDecision {
        let active: Vec<&MerchantRule> =
            self.merchant_rules.iter().filter(|r| r.is_active(now)).collect();

        // Deny rules first, in recorded order.
        for rule in active.iter().filter(|r| r.rule_type == RuleType::Deny) {
            if rule.matches(merchant_id, merchant_category) {
                return PolicyDecision::deny(RejectReason::MerchantDenied);
            }
        }

        let allow_rules: Vec<&&MerchantRule> =
            active.iter().filter(|r| r.rule_type == RuleType::Allow).collect();
        if allow_rules.is_empty() {
            return PolicyDecision::allow();
        }

        // Allowlist mode: a matching allow rule is required.
        let matched = allow_rules
            .iter()
            .find(|r| r.matches(merchant_id, merchant_category));
        match matched {
            None => PolicyDecision::deny(RejectReason::MerchantNotAllowlisted),
            Some(rule) => {
                if let Some(cap) = rule.max_per_tx {
                    if amount > cap {
                        return PolicyDecision::deny(RejectReason::MerchantCapExceeded);
                    }
                }
                PolicyDecision::allow()
            }
        }
    }

    /// Atomically account a confirmed spend against the lifetime total and
    /// every window.
    pub fn record_spend(&mut self, amount: AmountMinor, now: UnixSeconds) {
        self.spent_total = self.spent_total.saturating_add(amount);
        for window in [&mut self.daily, &mut self.weekly, &mut self.monthly] {
            window.record_spend(amount, now);
        }
    }

    pub fn remaining_total(&self) -> AmountMinor {
        self.limit_total.saturating_sub(self.spent_total)
    }

    /// Budget utilization in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        if self.limit_total == 0 {
            return 1.0;
        }
        (self.spent_total as f64 / self.limit_total as f64).min(1.0)
    }
}

/// Provision a policy with the defaults for a trust level.
pub fn create_default_policy(
    agent_id: AgentId,
    trust_level: TrustLevel,
    now: UnixSeconds,
) -> SpendingPolicy {
    let (per_tx, daily, weekly, monthly, total) = match trust_level {
        TrustLevel::Sandbox => (10_00, 50_00, 200_00, 500_00, 1_000_00),
        TrustLevel::Low => (50_00, 250_00, 1_000_00, 2_500_00, 5_000_00),
        TrustLevel::Standard => (100_00, 500_00, 2_000_00, 5_000_00, 10_000_00),
        TrustLevel::High => (1_000_00, 5_000_00, 20_000_00, 50_000_00, 100_000_00),
        TrustLevel::Unlimited => (u64::MAX, u64::MAX, u64::MAX, u64::MAX, u64::MAX),
    };
    SpendingPolicy {
        policy_id: format!("policy_{}", uuid::Uuid::new_v4().simple()),
        agent_id,
        trust_level,
        limit_per_tx: per_tx,
        limit_total: total,
        spent_total: 0,
        daily: TimeWindowLimit::new(WindowKind::Daily, daily, now),
        weekly: TimeWindowLimit::new(WindowKind::Weekly, weekly, now),
        monthly: TimeWindowLimit::new(WindowKind::Monthly, monthly, now),
        allowed_scopes: vec![SCOPE_ALL.to_string()],
        merchant_rules: Vec::new(),
        violation_count: 0,
    }
}
