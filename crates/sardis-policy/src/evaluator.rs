//! Composed policy evaluation: per-agent policy, then group policy, with
//! atomic spend recording across both.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::instrument;

use sardis_types::{AgentId, AmountMinor, RejectReason};

use crate::error::PolicyError;
use crate::group::GroupPolicyEvaluator;
use crate::policy::{PolicyDecision, SpendingPolicy};

/// Persistence seam for per-agent policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get(&self, agent_id: &AgentId) -> Result<Option<SpendingPolicy>, PolicyError>;
    async fn put(&self, policy: SpendingPolicy) -> Result<(), PolicyError>;
}

/// In-memory policy store.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: DashMap<AgentId, SpendingPolicy>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get(&self, agent_id: &AgentId) -> Result<Option<SpendingPolicy>, PolicyError> {
        Ok(self.policies.get(agent_id).map(|p| p.clone()))
    }

    async fn put(&self, policy: SpendingPolicy) -> Result<(), PolicyError> {
        self.policies.insert(policy.agent_id.clone(), policy);
        Ok(())
    }
}

/// The spend being evaluated.
#[derive(Debug, Clone)]
pub struct SpendRequest<'a> {
    pub amount: AmountMinor,
    pub fee: AmountMinor,
    pub merchant_id: Option<&'a str>,
    pub merchant_category: Option<&'a str>,
    pub scope: Option<&'a str>,
}

/// Evaluates the full policy stack for an agent.
pub struct PolicyEvaluator {
    store: Arc<dyn PolicyStore>,
    groups: GroupPolicyEvaluator,
}

impl PolicyEvaluator {
    pub fn new(store: Arc<dyn PolicyStore>, groups: GroupPolicyEvaluator) -> Self {
        Self { store, groups }
    }

    /// Evaluate in documented order: agent policy (scope, per-tx, total,
    /// windows, merchant rules), then every group the agent belongs to.
    #[instrument(skip(self, request), fields(agent_id = %agent_id, amount = request.amount))]
    pub async fn evaluate(
        &self,
        agent_id: &AgentId,
        request: &SpendRequest<'_>,
        now: u64,
    ) -> Result<PolicyDecision, PolicyError> {
        let Some(mut policy) = self.store.get(agent_id).await? else {
            return Ok(PolicyDecision::deny(RejectReason::PolicyNotFound));
        };

        let decision = policy.evaluate(
            request.amount,
            request.fee,
            request.merchant_id,
            request.merchant_category,
            request.scope,
            now,
        );
        // Persist lazy window resets observed during evaluation.
        self.store.put(policy).await?;
        if !decision.allowed {
            tracing::info!(reason = ?decision.reason, "agent policy denied spend");
            return Ok(decision);
        }

        let group_result = self
            .groups
            .evaluate(
                agent_id,
                request.amount,
                request.fee,
                request.merchant_id,
                request.merchant_category,
            )
            .await;
        if !group_result.decision.allowed {
            tracing::info!(
                reason = ?group_result.decision.reason,
                group_id = ?group_result.group_id,
                "group policy denied spend"
            );
            return Ok(group_result.decision);
        }

        Ok(PolicyDecision::allow())
    }

    /// Record a confirmed spend against the agent policy and every group
    /// tracker. Called only after on-chain confirmation.
    pub async fn record_spend(
        &self,
        agent_id: &AgentId,
        amount: AmountMinor,
        now: u64,
    ) -> Result<(), PolicyError> {
        let Some(mut policy) = self.store.get(agent_id).await? else {
            return Err(PolicyError::PolicyNotFound(agent_id.to_string()));
        };
        policy.record_spend(amount, now);
        self.store.put(policy).await?;
        self.groups.record_spend(agent_id, amount).await;
        Ok(())
    }

    /// Current policy snapshot, for confidence scoring.
    pub async fn policy_for(&self, agent_id: &AgentId) -> Result<Option<SpendingPolicy>, PolicyError> {
        self.store.get(agent_id).await
    }
}
