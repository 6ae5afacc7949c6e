//! Fail-closed compliance controls for the Sardis payment core.
//!
//! [`ComplianceGate::preflight`] runs base rules, sanctions screening, and
//! KYC verification in order, blocking on any hit or provider failure and
//! appending an audit entry for every outcome. Risk scoring ([`risk`]) and
//! PEP screening ([`pep`]) feed routing decisions without short-circuiting
//! the gate.

pub mod audit;
pub mod error;
pub mod gate;
pub mod pep;
pub mod providers;
pub mod risk;

pub use audit::{
    AuditOutcome, ComplianceAuditEntry, ComplianceAuditStore, FanoutAuditStore,
    InMemoryAuditStore, SqliteAuditStore,
};
pub use error::ComplianceError;
pub use gate::{ComplianceGate, PreflightOutcome};
pub use pep::{
    PepCategory, PepMatch, PepProvider, PepRiskLevel, PepScreeningResult, PepStatus,
    StaticPepDatabase,
};
pub use providers::{
    BaseRuleProvider, KycProvider, KycStatus, PaymentContext, RuleCheck, SanctionsProvider,
    SanctionsResult, StaticKycDirectory, StaticSanctionsList, TokenChainRuleProvider,
};
pub use risk::{RiskAction, RiskAssessment, RiskCategory, RiskConfig, RiskFactor, RiskLevel};
