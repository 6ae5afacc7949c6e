//! Behavioral drift monitoring.
//!
//! Builds a statistical profile of each agent's spending (recent amount
//! mean/deviation, hour-of-day histogram, merchant/token/chain frequencies)
//! and emits alerts when a transaction deviates from the baseline. Alerts
//! never block by themselves; the confidence router consumes them.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use sardis_types::{AgentId, AmountMinor, UnixSeconds};

/// Severity of a behavioral alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Detection sensitivity, expressed as the sigma threshold for amount
/// anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityLevel {
    Relaxed,
    Normal,
    Strict,
    Paranoid,
}

impl SensitivityLevel {
    pub fn sigma_threshold(self) -> f64 {
        match self {
            SensitivityLevel::Relaxed => 3.0,
            SensitivityLevel::Normal => 2.5,
            SensitivityLevel::Strict => 2.0,
            SensitivityLevel::Paranoid => 1.5,
        }
    }
}

/// How many recent amounts feed the running statistics.
const MAX_RECENT_HISTORY: usize = 100;

/// Baseline size before anomaly detection engages.
const DEFAULT_MIN_BASELINE: u64 = 10;

/// History depth required before first-seen-merchant alerts fire.
const NEW_MERCHANT_HISTORY_FLOOR: u64 = 50;

/// History depth required before first-seen-token/chain alerts fire.
const NEW_RAIL_HISTORY_FLOOR: u64 = 20;

/// Statistical profile of an agent's spending behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpendingPattern {
    pub total_transactions: u64,
    pub total_amount: u128,
    pub mean_amount: f64,
    pub std_dev_amount: f64,
    pub min_amount: AmountMinor,
    pub max_amount: AmountMinor,
    /// Hour of day (0-23) -> count.
    pub hourly_distribution: HashMap<u8, u64>,
    pub merchant_frequencies: HashMap<String, u64>,
    pub token_frequencies: HashMap<String, u64>,
    pub chain_frequencies: HashMap<String, u64>,
    pub recent_amounts: Vec<AmountMinor>,
    pub last_updated: UnixSeconds,
}

impl SpendingPattern {
    fn update_amount_statistics(&mut self) {
        if self.recent_amounts.is_empty() {
            return;
        }
        let count = self.recent_amounts.len() as f64;
        let sum: f64 = self.recent_amounts.iter().map(|a| *a as f64).sum();
        self.mean_amount = sum / count;

        if self.recent_amounts.len() > 1 {
            let variance: f64 = self
                .recent_amounts
                .iter()
                .map(|a| {
                    let d = *a as f64 - self.mean_amount;
                    d * d
                })
                .sum::<f64>()
                / count;
            self.std_dev_amount = variance.sqrt();
        } else {
            self.std_dev_amount = 0.0;
        }

        self.min_amount = *self.recent_amounts.iter().min().unwrap_or(&0);
        self.max_amount = *self.recent_amounts.iter().max().unwrap_or(&0);
    }
}

/// A detected behavioral anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralAlert {
    pub agent_id: AgentId,
    pub severity: AlertSeverity,
    pub anomaly_type: String,
    pub description: String,
    /// Number of standard deviations (1.0 for categorical anomalies).
    pub deviation_score: f64,
    pub timestamp: UnixSeconds,
}

/// Transaction facts fed to the monitor.
#[derive(Debug, Clone)]
pub struct TransactionFacts {
    pub amount: AmountMinor,
    pub merchant: String,
    pub token: String,
    pub chain: String,
    pub timestamp: UnixSeconds,
}

impl TransactionFacts {
    fn hour_of_day(&self) -> u8 {
        ((self.timestamp % 86_400) / 3_600) as u8
    }
}

/// Per-agent behavioral monitor.
pub struct BehavioralMonitor {
    agent_id: AgentId,
    sensitivity: SensitivityLevel,
    min_baseline: u64,
    pattern: Mutex<SpendingPattern>,
}

impl BehavioralMonitor {
    pub fn new(agent_id: AgentId, sensitivity: SensitivityLevel) -> Self {
        Self {
            agent_id,
            sensitivity,
            min_baseline: DEFAULT_MIN_BASELINE,
            pattern: Mutex::new(SpendingPattern::default()),
        }
    }

    pub fn with_min_baseline(mut self, min_baseline: u64) -> Self {
        self.min_baseline = min_baseline;
        self
    }

    /// Fold a confirmed transaction into the profile.
    pub fn record_transaction(&self, tx: &TransactionFacts) {
        let mut pattern = self.pattern.lock();
        pattern.total_transactions += 1;
        pattern.total_amount += tx.amount as u128;

        pattern.recent_amounts.push(tx.amount);
        if pattern.recent_amounts.len() > MAX_RECENT_HISTORY {
            pattern.recent_amounts.remove(0);
        }
        pattern.update_amount_statistics();

        *pattern.hourly_distribution.entry(tx.hour_of_day()).or_insert(0) += 1;
        *pattern.merchant_frequencies.entry(tx.merchant.clone()).or_insert(0) += 1;
        *pattern.token_frequencies.entry(tx.token.clone()).or_insert(0) += 1;
        *pattern.chain_frequencies.entry(tx.chain.clone()).or_insert(0) += 1;
        pattern.last_updated = tx.timestamp;
    }

    /// Check a candidate transaction against the baseline. Returns any
    /// alerts; an empty vec means no anomaly or not enough baseline.
    pub fn check_transaction(&self, tx: &TransactionFacts) -> Vec<BehavioralAlert> {
        let pattern = self.pattern.lock();
        if pattern.total_transactions < self.min_baseline {
            return Vec::new();
        }

        let mut alerts = Vec::new();
        let threshold = self.sensitivity.sigma_threshold();

        // Amount anomaly.
        if pattern.std_dev_amount > 0.0 {
            let deviation = (tx.amount as f64 - pattern.mean_amount).abs() / pattern.std_dev_amount;
            if deviation > threshold {
                alerts.push(BehavioralAlert {
                    agent_id: self.agent_id.clone(),
                    severity: severity_for(deviation, threshold),
                    anomaly_type: "amount_anomaly".to_string(),
                    description: format!(
                        "amount {} deviates from typical {:.0}",
                        tx.amount, pattern.mean_amount
                    ),
                    deviation_score: deviation,
                    timestamp: tx.timestamp,
                });
            }
        }

        // Time-of-day anomaly: the hour is far quieter than the hourly
        // average. Requires at least one expected transaction per hour so a
        // thin history cannot flag every hour.
        let hour = tx.hour_of_day();
        let hour_frequency = pattern.hourly_distribution.get(&hour).copied().unwrap_or(0) as f64;
        let avg_hourly = pattern.total_transactions as f64 / 24.0;
        if avg_hourly >= 1.0 && hour_frequency < avg_hourly * 0.3 {
            alerts.push(BehavioralAlert {
                agent_id: self.agent_id.clone(),
                severity: AlertSeverity::Low,
                anomaly_type: "time_anomaly".to_string(),
                description: format!("transaction at unusual hour {hour}"),
                deviation_score: (avg_hourly - hour_frequency) / avg_hourly,
                timestamp: tx.timestamp,
            });
        }

        // First-seen merchant after substantial history.
        if !pattern.merchant_frequencies.contains_key(&tx.merchant)
            && pattern.total_transactions > NEW_MERCHANT_HISTORY_FLOOR
        {
            alerts.push(BehavioralAlert {
                agent_id: self.agent_id.clone(),
                severity: AlertSeverity::Medium,
                anomaly_type: "new_merchant".to_string(),
                description: format!("first transaction with merchant {}", tx.merchant),
                deviation_score: 1.0,
                timestamp: tx.timestamp,
            });
        }

        // First-seen token or chain.
        let token_seen = pattern.token_frequencies.contains_key(&tx.token);
        let chain_seen = pattern.chain_frequencies.contains_key(&tx.chain);
        if (!token_seen || !chain_seen) && pattern.total_transactions > NEW_RAIL_HISTORY_FLOOR {
            alerts.push(BehavioralAlert {
                agent_id: self.agent_id.clone(),
                severity: AlertSeverity::Medium,
                anomaly_type: "new_token_or_chain".to_string(),
                description: format!("first transaction on {}/{}", tx.token, tx.chain),
                deviation_score: 1.0,
                timestamp: tx.timestamp,
            });
        }

        alerts
    }

    /// Snapshot of the current profile.
    pub fn pattern(&self) -> SpendingPattern {
        self.pattern.lock().clone()
    }

    pub fn reset(&self) {
        *self.pattern.lock() = SpendingPattern::default();
    }

    pub fn set_sensitivity(&mut self, sensitivity: SensitivityLevel) {
        self.sensitivity = sensitivity;
    }
}

fn severity_for(deviation: f64, threshold: f64) -> AlertSeverity {
    if deviation > threshold * 3.0 {
        AlertSeverity::Critical
    } else if deviation > threshold * 2.0 {
        AlertSeverity::High
    } else if deviation > threshold * 1.5 {
        AlertSeverity::Medium
    } else {
        AlertSeverity::Low
    }
}
