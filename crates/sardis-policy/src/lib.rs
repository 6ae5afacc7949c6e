//! Layered spending controls for the Sardis payment core.
//!
//! - [`policy`] — per-agent limits, windows, scopes, merchant rules
//! - [`group`] — aggregate budgets across agent groups (deny wins, tightest
//!   limit wins, fail closed)
//! - [`velocity`] — sliding-window rate caps
//! - [`behavior`] — statistical drift monitoring feeding alerts
//! - [`confidence`] — scoring and tier routing
//! - [`approval`] — quorum-gated approval workflow
//! - [`evaluator`] — the composed agent+group evaluation entry point

pub mod approval;
pub mod behavior;
pub mod confidence;
pub mod error;
pub mod evaluator;
pub mod group;
pub mod policy;
pub mod velocity;

pub use approval::{
    ApprovalError, ApprovalOutcome, ApprovalParams, ApprovalRepository, ApprovalRequest,
    ApprovalStatus, ApprovalVote, ApprovalWorkflow, InMemoryApprovalRepository,
    SqliteApprovalRepository, Urgency,
};
pub use behavior::{
    AlertSeverity, BehavioralAlert, BehavioralMonitor, SensitivityLevel, SpendingPattern,
    TransactionFacts,
};
pub use confidence::{
    ConfidenceLevel, ConfidenceRouter, ConfidenceScore, ConfidenceThresholds, HistoryEntry,
    RoutingRequirements, ScoredTransaction,
};
pub use error::PolicyError;
pub use evaluator::{InMemoryPolicyStore, PolicyEvaluator, PolicyStore, SpendRequest};
pub use group::{
    AgentGroup, AgentGroupRepository, GroupBudget, GroupMerchantPolicy, GroupPolicyEvaluator,
    GroupPolicyResult, GroupSpending, GroupSpendingTracker, InMemoryGroupRepository,
    InMemoryGroupSpendingTracker,
};
pub use policy::{
    create_default_policy, MerchantRule, PolicyDecision, RuleType, SpendingPolicy,
    TimeWindowLimit, TrustLevel, WindowKind, SCOPE_ALL,
};
pub use velocity::{VelocityLimiter, VelocityLimits};
