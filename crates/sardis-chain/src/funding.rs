//! Fiat funding rail with ordered failover.
//!
//! Wallet top-ups route through an ordered list of funding adapters
//! (Stripe Treasury first, then alternates). Each provider attempt is
//! recorded; when every provider fails the caller receives the full
//! attempt trail instead of an exception chain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use sardis_types::{AmountMinor, WalletId};

use crate::error::ChainError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRequest {
    pub wallet_id: WalletId,
    pub amount_minor: AmountMinor,
    pub currency: String,
    /// Bank reference or payment method token supplied by the tenant.
    pub source_ref: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingStatus {
    Succeeded,
    Failed,
}

/// One provider attempt, recorded whether or not it succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingAttempt {
    pub provider: String,
    pub rail: String,
    pub status: FundingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingResult {
    pub provider: String,
    pub provider_ref: String,
    pub amount_minor: AmountMinor,
    pub attempts: Vec<FundingAttempt>,
}

#[async_trait]
pub trait FundingAdapter: Send + Sync {
    fn provider_name(&self) -> &str;

    /// The rail this adapter settles over (ach, wire, sepa, ...).
    fn rail_name(&self) -> &str;

    /// Execute the top-up; returns a provider reference on success.
    async fn execute(&self, request: &FundingRequest) -> Result<String, ChainError>;
}

/// Try each adapter in order until one succeeds. Records one attempt row
/// per provider tried; if all fail the attempts ride the error.
pub async fn execute_funding_with_failover(
    adapters: &[Arc<dyn FundingAdapter>],
    request: &FundingRequest,
) -> Result<FundingResult, ChainError> {
    let mut attempts = Vec::new();

    for adapter in adapters {
        match adapter.execute(request).await {
            Ok(provider_ref) => {
                attempts.push(FundingAttempt {
                    provider: adapter.provider_name().to_string(),
                    rail: adapter.rail_name().to_string(),
                    status: FundingStatus::Succeeded,
                    error: None,
                    attempted_at: Utc::now(),
                });
                tracing::info!(
                    provider = adapter.provider_name(),
                    wallet_id = %request.wallet_id,
                    amount = request.amount_minor,
                    "funding executed"
                );
                return Ok(FundingResult {
                    provider: adapter.provider_name().to_string(),
                    provider_ref,
                    amount_minor: request.amount_minor,
                    attempts,
                });
            }
            Err(e) => {
                tracing::warn!(
                    provider = adapter.provider_name(),
                    error = %e,
                    "funding provider failed, trying next"
                );
                attempts.push(FundingAttempt {
                    provider: adapter.provider_name().to_string(),
                    rail: adapter.rail_name().to_string(),
                    status: FundingStatus::Failed,
                    error: Some(e.to_string()),
                    attempted_at: Utc::now(),
                });
            }
        }
    }

    Err(ChainError::FundingRoutingFailed(attempts))
}

/// Scripted adapter for tests and simulated mode.
pub struct ScriptedFundingAdapter {
    name: String,
    rail: String,
    fail: bool,
}

impl ScriptedFundingAdapter {
    pub fn succeeding(name: impl Into<String>, rail: impl Into<String>) -> Self {
        Self { name: name.into(), rail: rail.into(), fail: false }
    }

    pub fn failing(name: impl Into<String>, rail: impl Into<String>) -> Self {
        Self { name: name.into(), rail: rail.into(), fail: true }
    }
}

#[async_trait]
impl FundingAdapter for ScriptedFundingAdapter {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn rail_name(&self) -> &str {
        &self.rail
    }

    async fn execute(&self, request: &FundingRequest) -> Result<String, ChainError> {
        if self.fail {
            return Err(ChainError::Rpc(format!("{} unavailable", self.name)));
        }
        Ok(format!("{}_{}", self.name, request.idempotency_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> FundingRequest {
        FundingRequest {
            wallet_id: WalletId::from("w-1"),
            amount_minor: 100_00,
            currency: "USD".to_string(),
            source_ref: "ba_123".to_string(),
            idempotency_key: "fund-1".to_string(),
        }
    }

    #[tokio::test]
    async fn first_provider_wins() {
        let adapters: Vec<Arc<dyn FundingAdapter>> = vec![
            Arc::new(ScriptedFundingAdapter::succeeding("stripe_treasury", "ach")),
            Arc::new(ScriptedFundingAdapter::succeeding("alt_bank", "wire")),
        ];
        let result = execute_funding_with_failover(&adapters, &request()).await.unwrap();
        assert_eq!(result.provider, "stripe_treasury");
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.attempts[0].status, FundingStatus::Succeeded);
    }

    #[tokio::test]
    async fn failover_records_failed_attempt() {
        let adapters: Vec<Arc<dyn FundingAdapter>> = vec![
            Arc::new(ScriptedFundingAdapter::failing("stripe_treasury", "ach")),
            Arc::new(ScriptedFundingAdapter::succeeding("alt_bank", "wire")),
        ];
        let result = execute_funding_with_failover(&adapters, &request()).await.unwrap();
        assert_eq!(result.provider, "alt_bank");
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[0].status, FundingStatus::Failed);
        assert!(result.attempts[0].error.as_deref().unwrap().contains("stripe_treasury"));
        assert_eq!(result.attempts[1].status, FundingStatus::Succeeded);
    }

    #[tokio::test]
    async fn all_failing_returns_attempt_trail() {
        let adapters: Vec<Arc<dyn FundingAdapter>> = vec![
            Arc::new(ScriptedFundingAdapter::failing("stripe_treasury", "ach")),
            Arc::new(ScriptedFundingAdapter::failing("alt_bank", "wire")),
        ];
        let err = execute_funding_with_failover(&adapters, &request()).await.unwrap_err();
        match err {
            ChainError::FundingRoutingFailed(attempts) => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts.iter().all(|a| a.status == FundingStatus::Failed));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_adapter_list_fails() {
        let err = execute_funding_with_failover(&[], &request()).await.unwrap_err();
        assert!(matches!(err, ChainError::FundingRoutingFailed(attempts) if attempts.is_empty()));
    }
}
