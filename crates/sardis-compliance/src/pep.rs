//! PEP (politically exposed persons) screening.
//!
//! A PEP match never blocks by itself; it contributes a risk factor to the
//! assessment (§risk). External databases (Dow Jones, World-Check,
//! ComplyAdvantage) plug in behind [`PepProvider`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::ComplianceError;
use crate::risk::{RiskCategory, RiskFactor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PepCategory {
    ForeignPep,
    DomesticPep,
    InternationalOrg,
    /// Relatives and close associates.
    Rca,
    /// State-owned enterprise executives.
    Soe,
    NotPep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PepRiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PepStatus {
    Current,
    Former,
    Unknown,
}

/// A single match from the PEP database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PepMatch {
    pub match_id: String,
    pub name: String,
    pub category: PepCategory,
    pub status: PepStatus,
    pub position: String,
    pub country: String,
    /// Match confidence in `[0, 1]`.
    pub confidence_score: f64,
    pub risk_level: PepRiskLevel,
    pub source: String,
}

impl PepMatch {
    pub fn is_high_risk(&self) -> bool {
        self.risk_level >= PepRiskLevel::High
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PepScreeningResult {
    pub is_pep: bool,
    pub subject_id: String,
    pub subject_name: String,
    pub screened_at: DateTime<Utc>,
    pub matches: Vec<PepMatch>,
    pub highest_risk: PepRiskLevel,
    pub provider: String,
    pub requires_enhanced_due_diligence: bool,
}

impl PepScreeningResult {
    pub fn clear(subject_id: &str, subject_name: &str, provider: &str) -> Self {
        Self {
            is_pep: false,
            subject_id: subject_id.to_string(),
            subject_name: subject_name.to_string(),
            screened_at: Utc::now(),
            matches: Vec::new(),
            highest_risk: PepRiskLevel::Low,
            provider: provider.to_string(),
            requires_enhanced_due_diligence: false,
        }
    }

    /// Convert the screening outcome into a risk factor for the assessment.
    pub fn to_risk_factor(&self) -> Option<RiskFactor> {
        if !self.is_pep {
            return None;
        }
        let score = match self.highest_risk {
            PepRiskLevel::Low => 25.0,
            PepRiskLevel::Medium => 50.0,
            PepRiskLevel::High => 75.0,
            PepRiskLevel::VeryHigh => 95.0,
        };
        Some(
            RiskFactor::new(RiskCategory::Pep, "pep_match", score, 1.0).with_description(format!(
                "{} PEP match(es), highest risk {:?}",
                self.matches.len(),
                self.highest_risk
            )),
        )
    }
}

#[async_trait]
pub trait PepProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn screen(
        &self,
        subject_id: &str,
        subject_name: &str,
    ) -> Result<PepScreeningResult, ComplianceError>;
}

/// In-memory PEP database for simulated mode and tests.
#[derive(Default)]
pub struct StaticPepDatabase {
    matches: DashMap<String, Vec<PepMatch>>,
}

impl StaticPepDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register matches under a lowercase name key.
    pub fn add_matches(&self, name: &str, matches: Vec<PepMatch>) {
        self.matches.insert(name.to_ascii_lowercase(), matches);
    }
}

#[async_trait]
impl PepProvider for StaticPepDatabase {
    fn provider_name(&self) -> &'static str {
        "static"
    }

    async fn screen(
        &self,
        subject_id: &str,
        subject_name: &str,
    ) -> Result<PepScreeningResult, ComplianceError> {
        let Some(matches) = self
            .matches
            .get(&subject_name.to_ascii_lowercase())
            .map(|m| m.clone())
        else {
            return Ok(PepScreeningResult::clear(subject_id, subject_name, self.provider_name()));
        };

        let highest_risk = matches
            .iter()
            .map(|m| m.risk_level)
            .max()
            .unwrap_or(PepRiskLevel::Low);
        let requires_edd = matches.iter().any(PepMatch::is_high_risk)
            || matches.iter().any(|m| m.status == PepStatus::Current);

        Ok(PepScreeningResult {
            is_pep: !matches.is_empty(),
            subject_id: subject_id.to_string(),
            subject_name: subject_name.to_string(),
            screened_at: Utc::now(),
            matches,
            highest_risk,
            provider: self.provider_name().to_string(),
            requires_enhanced_due_diligence: requires_edd,
        })
    }
}
