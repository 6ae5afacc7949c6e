//! Confidence scoring and routing.
//!
//! Combines KYA level, merchant familiarity, amount-vs-history deviation,
//! budget headroom, and violation history into a score in `[0, 1]`, then
//! maps the score to one of four routing tiers.

use serde::{Deserialize, Serialize};

use sardis_types::{AgentId, AmountMinor, KyaLevel};

use crate::policy::SpendingPolicy;

/// Routing tier for a scored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    AutoApprove,
    ManagerApproval,
    MultiSig,
    HumanRewrite,
}

/// Tier thresholds; overridable per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub auto_approve: f64,
    pub manager_approval: f64,
    pub multi_sig: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self { auto_approve: 0.95, manager_approval: 0.85, multi_sig: 0.70 }
    }
}

impl ConfidenceThresholds {
    pub fn level_for(&self, score: f64) -> ConfidenceLevel {
        if score >= self.auto_approve {
            ConfidenceLevel::AutoApprove
        } else if score >= self.manager_approval {
            ConfidenceLevel::ManagerApproval
        } else if score >= self.multi_sig {
            ConfidenceLevel::MultiSig
        } else {
            ConfidenceLevel::HumanRewrite
        }
    }
}

/// Factor weights. They sum to 1.0 so the score is a weighted mean.
const WEIGHT_KYA: f64 = 0.25;
const WEIGHT_MERCHANT: f64 = 0.20;
const WEIGHT_AMOUNT: f64 = 0.20;
const WEIGHT_BUDGET: f64 = 0.20;
const WEIGHT_VIOLATIONS: f64 = 0.15;

/// One prior transaction, as seen by the scorer.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub amount: AmountMinor,
    pub merchant_id: String,
}

/// The transaction being scored.
#[derive(Debug, Clone)]
pub struct ScoredTransaction {
    pub amount: AmountMinor,
    pub merchant_id: String,
}

/// Individual factor values, kept for audit trails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub kya: f64,
    pub merchant_familiarity: f64,
    pub amount_typicality: f64,
    pub budget_headroom: f64,
    pub violation_penalty: f64,
}

/// Score plus routing decision inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub agent_id: AgentId,
    pub score: f64,
    pub level: ConfidenceLevel,
    pub factors: ConfidenceFactors,
}

/// What the router demands for each non-auto tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRequirements {
    pub level: ConfidenceLevel,
    /// Number of approvers that must be assigned.
    pub required_approvers: usize,
    /// Distinct approvals needed.
    pub quorum: usize,
    /// Seconds before a pending request expires.
    pub timeout_secs: u64,
}

pub struct ConfidenceRouter {
    thresholds: ConfidenceThresholds,
}

impl Default for ConfidenceRouter {
    fn default() -> Self {
        Self::new(ConfidenceThresholds::default())
    }
}

impl ConfidenceRouter {
    pub fn new(thresholds: ConfidenceThresholds) -> Self {
        Self { thresholds }
    }

    /// Compute the confidence score for a transaction.
    pub fn calculate_confidence(
        &self,
        agent_id: &AgentId,
        transaction: &ScoredTransaction,
        policy: &SpendingPolicy,
        history: &[HistoryEntry],
        kya_level: KyaLevel,
        violation_count: u32,
    ) -> ConfidenceScore {
        let factors = ConfidenceFactors {
            kya: kya_level.confidence_factor(),
            merchant_familiarity: merchant_familiarity(&transaction.merchant_id, history),
            amount_typicality: amount_typicality(transaction.amount, history),
            budget_headroom: 1.0 - policy.utilization(),
            violation_penalty: 1.0 / (1.0 + violation_count as f64),
        };

        let score = (WEIGHT_KYA * factors.kya
            + WEIGHT_MERCHANT * factors.merchant_familiarity
            + WEIGHT_AMOUNT * factors.amount_typicality
            + WEIGHT_BUDGET * factors.budget_headroom
            + WEIGHT_VIOLATIONS * factors.violation_penalty)
            .clamp(0.0, 1.0);

        let level = self.thresholds.level_for(score);
        tracing::debug!(
            agent_id = %agent_id,
            score,
            level = ?level,
            "confidence computed"
        );

        ConfidenceScore { agent_id: agent_id.clone(), score, level, factors }
    }

    /// Routing requirements for a confidence level.
    pub fn requirements_for(&self, level: ConfidenceLevel) -> RoutingRequirements {
        match level {
            ConfidenceLevel::AutoApprove => RoutingRequirements {
                level,
                required_approvers: 0,
                quorum: 0,
                timeout_secs: 0,
            },
            ConfidenceLevel::ManagerApproval => RoutingRequirements {
                level,
                required_approvers: 1,
                quorum: 1,
                timeout_secs: 3_600,
            },
            ConfidenceLevel::MultiSig => RoutingRequirements {
                level,
                required_approvers: 2,
                quorum: 2,
                timeout_secs: 24 * 3_600,
            },
            ConfidenceLevel::HumanRewrite => RoutingRequirements {
                level,
                required_approvers: 0,
                quorum: 0,
                timeout_secs: 0,
            },
        }
    }
}

/// Share of history involving this merchant. An empty history carries no
/// evidence either way; the KYA and violation factors carry the risk for
/// fresh agents.
fn merchant_familiarity(merchant_id: &str, history: &[HistoryEntry]) -> f64 {
    if history.is_empty() {
        return 1.0;
    }
    let seen = history
        .iter()
        .filter(|h| h.merchant_id.eq_ignore_ascii_case(merchant_id))
        .count();
    seen as f64 / history.len() as f64
}

/// Decreasing function of the amount's z-score against history; with zero
/// deviation the ratio to the mean substitutes. An empty history carries no
/// evidence.
fn amount_typicality(amount: AmountMinor, history: &[HistoryEntry]) -> f64 {
    if history.is_empty() {
        return 1.0;
    }
    let amounts: Vec<f64> = history.iter().map(|h| h.amount as f64).collect();
    let mean = amounts.iter().sum::<f64>() / amounts.len() as f64;
    let variance = amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / amounts.len() as f64;
    let std_dev = variance.sqrt();

    let z = if std_dev > 0.0 {
        (amount as f64 - mean).abs() / std_dev
    } else {
        (amount as f64 - mean).abs() / mean.max(1.0)
    };
    1.0 / (1.0 + z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{create_default_policy, TrustLevel};

    const NOW: u64 = 1_700_000_000;

    fn agent() -> AgentId {
        AgentId::from("agent-001")
    }

    fn policy() -> SpendingPolicy {
        create_default_policy(agent(), TrustLevel::Standard, NOW)
    }

    fn history_of(amount: AmountMinor, merchant: &str, n: usize) -> Vec<HistoryEntry> {
        (0..n)
            .map(|_| HistoryEntry { amount, merchant_id: merchant.to_string() })
            .collect()
    }

    #[test]
    fn pristine_agent_auto_approves() {
        let router = ConfidenceRouter::default();
        let score = router.calculate_confidence(
            &agent(),
            &ScoredTransaction { amount: 50, merchant_id: "aws".to_string() },
            &policy(),
            &history_of(50, "aws", 20),
            KyaLevel::Attested,
            0,
        );
        assert!(score.score >= 0.95, "score {}", score.score);
        assert_eq!(score.level, ConfidenceLevel::AutoApprove);
    }

    #[test]
    fn one_violation_routes_to_manager() {
        let router = ConfidenceRouter::default();
        let score = router.calculate_confidence(
            &agent(),
            &ScoredTransaction { amount: 50, merchant_id: "aws".to_string() },
            &policy(),
            &history_of(50, "aws", 20),
            KyaLevel::Attested,
            1,
        );
        assert!((0.85..0.95).contains(&score.score), "score {}", score.score);
        assert_eq!(score.level, ConfidenceLevel::ManagerApproval);
    }

    #[test]
    fn worn_budget_and_violations_route_to_multi_sig() {
        let router = ConfidenceRouter::default();
        let mut policy = policy();
        policy.spent_total = policy.limit_total / 2;
        let score = router.calculate_confidence(
            &agent(),
            &ScoredTransaction { amount: 50, merchant_id: "aws".to_string() },
            &policy,
            &history_of(50, "aws", 20),
            KyaLevel::Attested,
            2,
        );
        assert!((0.70..0.85).contains(&score.score), "score {}", score.score);
        assert_eq!(score.level, ConfidenceLevel::MultiSig);
    }

    #[test]
    fn fresh_unverified_agent_lands_in_multi_sig() {
        let router = ConfidenceRouter::default();
        let score = router.calculate_confidence(
            &agent(),
            &ScoredTransaction { amount: 100, merchant_id: "first-merchant".to_string() },
            &policy(),
            &[],
            KyaLevel::None,
            0,
        );
        assert!((score.score - 0.75).abs() < 1e-9, "score {}", score.score);
        assert_eq!(score.level, ConfidenceLevel::MultiSig);
    }

    #[test]
    fn untrusted_agent_routes_to_human_rewrite() {
        let router = ConfidenceRouter::default();
        let mut policy = policy();
        policy.spent_total = policy.limit_total - 1;
        let score = router.calculate_confidence(
            &agent(),
            &ScoredTransaction { amount: 50, merchant_id: "unknown".to_string() },
            &policy,
            &[],
            KyaLevel::None,
            5,
        );
        assert!(score.score < 0.70, "score {}", score.score);
        assert_eq!(score.level, ConfidenceLevel::HumanRewrite);
    }

    #[test]
    fn kya_levels_are_monotone() {
        let router = ConfidenceRouter::default();
        let tx = ScoredTransaction { amount: 100, merchant_id: "aws".to_string() };
        let history = history_of(100, "aws", 10);
        let p = policy();
        let scores: Vec<f64> = [KyaLevel::None, KyaLevel::Basic, KyaLevel::Verified, KyaLevel::Attested]
            .into_iter()
            .map(|kya| router.calculate_confidence(&agent(), &tx, &p, &history, kya, 0).score)
            .collect();
        assert!(scores.windows(2).all(|w| w[0] < w[1]), "scores {scores:?}");
    }

    #[test]
    fn familiar_merchant_scores_higher() {
        let router = ConfidenceRouter::default();
        let p = policy();
        let familiar = router.calculate_confidence(
            &agent(),
            &ScoredTransaction { amount: 100, merchant_id: "familiar".to_string() },
            &p,
            &history_of(100, "familiar", 15),
            KyaLevel::Basic,
            0,
        );
        let unfamiliar = router.calculate_confidence(
            &agent(),
            &ScoredTransaction { amount: 100, merchant_id: "stranger".to_string() },
            &p,
            &history_of(100, "familiar", 15),
            KyaLevel::Basic,
            0,
        );
        assert!(familiar.score > unfamiliar.score);
    }

    #[test]
    fn outlier_amount_scores_lower() {
        let router = ConfidenceRouter::default();
        let p = policy();
        let history = history_of(100, "aws", 10);
        let typical = router.calculate_confidence(
            &agent(),
            &ScoredTransaction { amount: 100, merchant_id: "aws".to_string() },
            &p,
            &history,
            KyaLevel::Verified,
            0,
        );
        let outlier = router.calculate_confidence(
            &agent(),
            &ScoredTransaction { amount: 100_000, merchant_id: "aws".to_string() },
            &p,
            &history,
            KyaLevel::Verified,
            0,
        );
        assert!(outlier.score < typical.score);
    }

    #[test]
    fn requirements_per_tier() {
        let router = ConfidenceRouter::default();
        let manager = router.requirements_for(ConfidenceLevel::ManagerApproval);
        assert_eq!((manager.required_approvers, manager.quorum, manager.timeout_secs), (1, 1, 3_600));
        let multi = router.requirements_for(ConfidenceLevel::MultiSig);
        assert_eq!((multi.required_approvers, multi.quorum, multi.timeout_secs), (2, 2, 86_400));
    }

    #[test]
    fn custom_thresholds_shift_tiers() {
        let router = ConfidenceRouter::new(ConfidenceThresholds {
            auto_approve: 0.5,
            manager_approval: 0.3,
            multi_sig: 0.1,
        });
        let score = router.calculate_confidence(
            &agent(),
            &ScoredTransaction { amount: 100, merchant_id: "aws".to_string() },
            &policy(),
            &history_of(100, "aws", 5),
            KyaLevel::Basic,
            0,
        );
        assert_eq!(score.level, ConfidenceLevel::AutoApprove);
    }
}
