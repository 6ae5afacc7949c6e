//! Multi-factor risk scoring.
//!
//! Factors carry a score in `[0, 100]` and a weight; the weighted score is
//! capped at 100. An assessment aggregates per-category factors, maps the
//! overall score to a risk level through configurable thresholds, and
//! recommends an action. Risk scoring informs routing; it never
//! short-circuits the compliance gate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Transaction,
    Counterparty,
    Geographic,
    Behavioral,
    Regulatory,
    Sanctions,
    Pep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskAction {
    #[serde(rename = "approve")]
    Approve,
    #[serde(rename = "review")]
    Review,
    #[serde(rename = "edd")]
    EnhancedDueDiligence,
    #[serde(rename = "block")]
    Block,
    #[serde(rename = "escalate")]
    Escalate,
}

/// One scored risk signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub category: RiskCategory,
    pub name: String,
    /// Raw score in `[0, 100]`.
    pub score: f64,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RiskFactor {
    pub fn new(category: RiskCategory, name: impl Into<String>, score: f64, weight: f64) -> Self {
        Self {
            category,
            name: name.into(),
            score: score.clamp(0.0, 100.0),
            weight,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// `min(score * weight, 100)`.
    pub fn weighted_score(&self) -> f64 {
        (self.score * self.weight).min(100.0)
    }
}

/// Level thresholds: a score `<=` a threshold maps to its level, checked in
/// ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub minimal_max: f64,
    pub low_max: f64,
    pub medium_max: f64,
    pub high_max: f64,
    pub critical_max: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self { minimal_max: 20.0, low_max: 40.0, medium_max: 60.0, high_max: 80.0, critical_max: 100.0 }
    }
}

impl RiskConfig {
    pub fn level_for(&self, score: f64) -> RiskLevel {
        if score <= self.minimal_max {
            RiskLevel::Minimal
        } else if score <= self.low_max {
            RiskLevel::Low
        } else if score <= self.medium_max {
            RiskLevel::Medium
        } else if score <= self.high_max {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    pub fn action_for(&self, level: RiskLevel, has_sanctions_factor: bool) -> RiskAction {
        if has_sanctions_factor {
            return RiskAction::Escalate;
        }
        match level {
            RiskLevel::Minimal | RiskLevel::Low => RiskAction::Approve,
            RiskLevel::Medium => RiskAction::Review,
            RiskLevel::High => RiskAction::EnhancedDueDiligence,
            RiskLevel::Critical => RiskAction::Block,
        }
    }
}

/// Aggregated assessment over a set of factors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub subject_id: String,
    pub factors: Vec<RiskFactor>,
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub recommended_action: RiskAction,
    /// Mean weighted score per category.
    pub category_scores: BTreeMap<RiskCategory, f64>,
}

impl RiskAssessment {
    /// Aggregate factors: overall score is the mean of weighted factor
    /// scores (0 with no factors).
    pub fn from_factors(
        subject_id: impl Into<String>,
        factors: Vec<RiskFactor>,
        config: &RiskConfig,
    ) -> Self {
        let mut category_totals: BTreeMap<RiskCategory, (f64, usize)> = BTreeMap::new();
        for factor in &factors {
            let entry = category_totals.entry(factor.category).or_insert((0.0, 0));
            entry.0 += factor.weighted_score();
            entry.1 += 1;
        }
        let category_scores: BTreeMap<RiskCategory, f64> = category_totals
            .into_iter()
            .map(|(cat, (sum, count))| (cat, sum / count as f64))
            .collect();

        let overall_score = if factors.is_empty() {
            0.0
        } else {
            factors.iter().map(RiskFactor::weighted_score).sum::<f64>() / factors.len() as f64
        };

        let risk_level = config.level_for(overall_score);
        let has_sanctions_factor = factors
            .iter()
            .any(|f| f.category == RiskCategory::Sanctions && f.score > 0.0);
        let recommended_action = config.action_for(risk_level, has_sanctions_factor);

        Self {
            subject_id: subject_id.into(),
            factors,
            overall_score,
            risk_level,
            recommended_action,
            category_scores,
        }
    }
}
