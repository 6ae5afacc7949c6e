//! Group-level spending governance.
//!
//! An agent may belong to several groups. Evaluation rules: deny always wins
//! for merchant policy, the most restrictive numerical limit wins, and any
//! failure to fetch groups or group spend fails closed.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use sardis_types::{AgentId, AmountMinor, GroupId, RejectReason};

use crate::error::PolicyError;
use crate::policy::PolicyDecision;

/// Aggregate budget for a group, across all member agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBudget {
    pub per_transaction: AmountMinor,
    pub daily: AmountMinor,
    pub monthly: AmountMinor,
    pub total: AmountMinor,
}

/// Merchant policy applied to every member of the group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMerchantPolicy {
    pub blocked_merchants: Vec<String>,
    pub blocked_categories: Vec<String>,
    /// `Some` switches the group into whitelist mode.
    pub allowed_merchants: Option<Vec<String>>,
    pub allowed_categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentGroup {
    pub group_id: GroupId,
    pub owner_id: String,
    pub name: String,
    pub agent_ids: Vec<AgentId>,
    pub budget: GroupBudget,
    pub merchant_policy: GroupMerchantPolicy,
}

/// Aggregate spend snapshot for a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpending {
    pub daily: AmountMinor,
    pub monthly: AmountMinor,
    pub total: AmountMinor,
}

/// Repository of group membership.
#[async_trait]
pub trait AgentGroupRepository: Send + Sync {
    async fn groups_for_agent(&self, agent_id: &AgentId) -> Result<Vec<AgentGroup>, PolicyError>;
}

/// Aggregate group spend tracking.
#[async_trait]
pub trait GroupSpendingTracker: Send + Sync {
    async fn group_spending(&self, group_id: &GroupId) -> Result<GroupSpending, PolicyError>;
    async fn record_spend(&self, group_id: &GroupId, amount: AmountMinor)
        -> Result<(), PolicyError>;
}

/// In-memory membership repository.
#[derive(Default)]
pub struct InMemoryGroupRepository {
    groups: DashMap<GroupId, AgentGroup>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, group: AgentGroup) {
        self.groups.insert(group.group_id.clone(), group);
    }
}

#[async_trait]
impl AgentGroupRepository for InMemoryGroupRepository {
    async fn groups_for_agent(&self, agent_id: &AgentId) -> Result<Vec<AgentGroup>, PolicyError> {
        Ok(self
            .groups
            .iter()
            .filter(|entry| entry.agent_ids.contains(agent_id))
            .map(|entry| entry.clone())
            .collect())
    }
}

/// In-memory spend tracker. Daily/monthly roll-over is handled by the
/// sweeping job that zeroes the counters; tests manipulate them directly.
#[derive(Default)]
pub struct InMemoryGroupSpendingTracker {
    spending: DashMap<GroupId, GroupSpending>,
}

impl InMemoryGroupSpendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, group_id: GroupId, spending: GroupSpending) {
        self.spending.insert(group_id, spending);
    }
}

#[async_trait]
impl GroupSpendingTracker for InMemoryGroupSpendingTracker {
    async fn group_spending(&self, group_id: &GroupId) -> Result<GroupSpending, PolicyError> {
        Ok(self.spending.get(group_id).map(|s| *s).unwrap_or_default())
    }

    async fn record_spend(
        &self,
        group_id: &GroupId,
        amount: AmountMinor,
    ) -> Result<(), PolicyError> {
        let mut entry = self.spending.entry(group_id.clone()).or_default();
        entry.daily = entry.daily.saturating_add(amount);
        entry.monthly = entry.monthly.saturating_add(amount);
        entry.total = entry.total.saturating_add(amount);
        Ok(())
    }
}

/// Result of group policy evaluation, carrying the blocking group if any.
#[derive(Debug, Clone)]
pub struct GroupPolicyResult {
    pub decision: PolicyDecision,
    pub group_id: Option<GroupId>,
    pub group_name: Option<String>,
}

impl GroupPolicyResult {
    fn allow() -> Self {
        Self { decision: PolicyDecision::allow(), group_id: None, group_name: None }
    }

    fn deny(reason: RejectReason, group: &AgentGroup) -> Self {
        Self {
            decision: PolicyDecision::deny(reason),
            group_id: Some(group.group_id.clone()),
            group_name: Some(group.name.clone()),
        }
    }
}

/// Evaluates group policy across every group an agent belongs to.
pub struct GroupPolicyEvaluator {
    repo: std::sync::Arc<dyn AgentGroupRepository>,
    spending: std::sync::Arc<dyn GroupSpendingTracker>,
}

impl GroupPolicyEvaluator {
    pub fn new(
        repo: std::sync::Arc<dyn AgentGroupRepository>,
        spending: std::sync::Arc<dyn GroupSpendingTracker>,
    ) -> Self {
        Self { repo, spending }
    }

    /// Allow only if every group the agent belongs to permits the spend.
    pub async fn evaluate(
        &self,
        agent_id: &AgentId,
        amount: AmountMinor,
        fee: AmountMinor,
        merchant_id: Option<&str>,
        merchant_category: Option<&str>,
    ) -> GroupPolicyResult {
        let groups = match self.repo.groups_for_agent(agent_id).await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::error!(agent_id = %agent_id, error = %e, "failed to fetch groups");
                return GroupPolicyResult {
                    decision: PolicyDecision::deny(RejectReason::GroupPolicyError),
                    group_id: None,
                    group_name: None,
                };
            }
        };

        if groups.is_empty() {
            return GroupPolicyResult::allow();
        }

        let total_cost = amount.saturating_add(fee);

        for group in &groups {
            if let Some(reason) = check_merchant_policy(group, merchant_id, merchant_category) {
                return GroupPolicyResult::deny(reason, group);
            }

            if total_cost > group.budget.per_transaction {
                return GroupPolicyResult::deny(RejectReason::GroupPerTransactionLimit, group);
            }

            let spending = match self.spending.group_spending(&group.group_id).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(
                        group_id = %group.group_id,
                        error = %e,
                        "failed to fetch group spending"
                    );
                    return GroupPolicyResult::deny(RejectReason::GroupSpendingLookupError, group);
                }
            };

            if spending.daily.saturating_add(total_cost) > group.budget.daily {
                return GroupPolicyResult::deny(RejectReason::GroupDailyLimit, group);
            }
            if spending.monthly.saturating_add(total_cost) > group.budget.monthly {
                return GroupPolicyResult::deny(RejectReason::GroupMonthlyLimit, group);
            }
            if spending.total.saturating_add(total_cost) > group.budget.total {
                return GroupPolicyResult::deny(RejectReason::GroupTotalLimit, group);
            }
        }

        GroupPolicyResult::allow()
    }

    /// Record a confirmed spend against every group the agent belongs to.
    pub async fn record_spend(&self, agent_id: &AgentId, amount: AmountMinor) {
        let groups = match self.repo.groups_for_agent(agent_id).await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::error!(agent_id = %agent_id, error = %e, "failed to record group spend");
                return;
            }
        };
        for group in groups {
            if let Err(e) = self.spending.record_spend(&group.group_id, amount).await {
                tracing::error!(
                    group_id = %group.group_id,
                    error = %e,
                    "failed to record group spend"
                );
            }
        }
    }
}

fn check_merchant_policy(
    group: &AgentGroup,
    merchant_id: Option<&str>,
    merchant_category: Option<&str>,
) -> Option<RejectReason> {
    let merchant_id = merchant_id?;
    let mp = &group.merchant_policy;

    if mp
        .blocked_merchants
        .iter()
        .any(|m| m.eq_ignore_ascii_case(merchant_id))
    {
        return Some(RejectReason::GroupMerchantBlocked);
    }

    if let Some(category) = merchant_category {
        if mp
            .blocked_categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
        {
            return Some(RejectReason::GroupCategoryBlocked);
        }
    }

    if let Some(allowed) = &mp.allowed_merchants {
        if !allowed.iter().any(|m| m.eq_ignore_ascii_case(merchant_id)) {
            return Some(RejectReason::GroupMerchantNotAllowed);
        }
    }

    if let (Some(category), Some(allowed)) = (merchant_category, &mp.allowed_categories) {
        if !allowed.iter().any(|c| c.eq_ignore_ascii_case(category)) {
            return Some(RejectReason::GroupCategoryNotAllowed);
        }
    }

    None
}
