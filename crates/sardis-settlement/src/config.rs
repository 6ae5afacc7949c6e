//! Environment-driven configuration for the settlement core.
//!
//! The embedding service owns process startup; the core reads `SARDIS_*`
//! variables once and validates them here. Secrets never appear in Debug
//! output.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use sardis_chain::ChainMode;
use sardis_mandate::Environment;

const DEFAULT_ALLOWED_DOMAINS: &str = "sardis.network";
const DEFAULT_LOCK_TTL_SECS: u64 = 60;
const DEFAULT_SETTLEMENT_BUDGET_SECS: u64 = 60;

#[derive(Clone)]
pub struct SardisConfig {
    pub environment: Environment,
    pub chain_mode: ChainMode,
    /// Domains mandates may bind to.
    pub allowed_domains: Vec<String>,
    /// Tolerated canonicalization drift when comparing amounts across
    /// representations, in minor units.
    pub canonical_drift_tolerance_minor: u64,
    /// Per-chain RPC URL overrides, from `SARDIS_RPC_URL_<CHAIN>`.
    pub rpc_overrides: HashMap<String, String>,
    /// HMAC secret for webhook signing.
    pub webhook_secret: Option<Vec<u8>>,
    pub lock_ttl: Duration,
    pub settlement_budget: Duration,
}

impl std::fmt::Debug for SardisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SardisConfig")
            .field("environment", &self.environment)
            .field("chain_mode", &self.chain_mode)
            .field("allowed_domains", &self.allowed_domains)
            .field("canonical_drift_tolerance_minor", &self.canonical_drift_tolerance_minor)
            .field("rpc_overrides", &self.rpc_overrides.keys().collect::<Vec<_>>())
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .field("lock_ttl", &self.lock_ttl)
            .field("settlement_budget", &self.settlement_budget)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {variable}: {value}")]
    InvalidValue { variable: &'static str, value: String },

    #[error("SARDIS_ALLOWED_DOMAINS must not be empty")]
    EmptyAllowedDomains,
}

impl SardisConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::parse(
            &env::var("SARDIS_ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        );
        let chain_mode = ChainMode::parse(
            &env::var("SARDIS_CHAIN_MODE").unwrap_or_else(|_| "simulated".to_string()),
        );

        let allowed_domains: Vec<String> = env::var("SARDIS_ALLOWED_DOMAINS")
            .unwrap_or_else(|_| DEFAULT_ALLOWED_DOMAINS.to_string())
            .split(',')
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if allowed_domains.is_empty() {
            return Err(ConfigError::EmptyAllowedDomains);
        }

        let canonical_drift_tolerance_minor =
            match env::var("SARDIS_CANONICAL_DRIFT_TOLERANCE_MINOR") {
                Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                    variable: "SARDIS_CANONICAL_DRIFT_TOLERANCE_MINOR",
                    value: raw,
                })?,
                Err(_) => 0,
            };

        // SARDIS_RPC_URL_BASE=https://... -> ("base", url)
        let rpc_overrides: HashMap<String, String> = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix("SARDIS_RPC_URL_")
                    .map(|chain| (chain.to_ascii_lowercase(), value))
            })
            .collect();

        let webhook_secret = env::var("SARDIS_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(String::into_bytes);
        if let Some(ref secret) = webhook_secret {
            if secret.len() < 32 {
                tracing::warn!(
                    "SARDIS_WEBHOOK_SECRET is short ({} bytes); use at least 32 random bytes",
                    secret.len()
                );
            }
        }

        let lock_ttl = Duration::from_secs(parse_secs("SARDIS_LOCK_TTL_SECS", DEFAULT_LOCK_TTL_SECS)?);
        let settlement_budget = Duration::from_secs(parse_secs(
            "SARDIS_SETTLEMENT_BUDGET_SECS",
            DEFAULT_SETTLEMENT_BUDGET_SECS,
        )?);

        Ok(Self {
            environment,
            chain_mode,
            allowed_domains,
            canonical_drift_tolerance_minor,
            rpc_overrides,
            webhook_secret,
            lock_ttl,
            settlement_budget,
        })
    }

    /// Simulated-mode defaults for tests and local runs.
    pub fn simulated(allowed_domains: Vec<String>) -> Self {
        Self {
            environment: Environment::Development,
            chain_mode: ChainMode::Simulated,
            allowed_domains,
            canonical_drift_tolerance_minor: 0,
            rpc_overrides: HashMap::new(),
            webhook_secret: None,
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            settlement_budget: Duration::from_secs(DEFAULT_SETTLEMENT_BUDGET_SECS),
        }
    }
}

fn parse_secs(variable: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue { variable, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_defaults() {
        let config = SardisConfig::simulated(vec!["example.com".to_string()]);
        assert_eq!(config.chain_mode, ChainMode::Simulated);
        assert_eq!(config.lock_ttl, Duration::from_secs(60));
        assert_eq!(config.settlement_budget, Duration::from_secs(60));
    }

    #[test]
    fn debug_redacts_webhook_secret() {
        let mut config = SardisConfig::simulated(vec!["example.com".to_string()]);
        config.webhook_secret = Some(b"super-secret-value-of-enough-len".to_vec());
        let rendered = format!("{config:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("super-secret"));
    }
}
