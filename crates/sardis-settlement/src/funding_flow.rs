//! Idempotent wallet funding.
//!
//! Fiat top-ups run the ordered-failover funding rail under an idempotency
//! record with a 7-day TTL, so a client retrying a funding call days later
//! still receives the original result instead of double-funding the
//! wallet. A run where every provider failed marks the record failed, so a
//! later retry may try again; nothing was debited.

use std::sync::Arc;

use serde_json::Value;

use sardis_chain::{execute_funding_with_failover, FundingAdapter, FundingRequest, FundingResult};

use crate::engine::unix_now;
use crate::idempotency::{run_idempotent, IdempotencyError, IdempotencyStore};

/// Funding and card operations keep their records for 7 days.
pub const FUNDING_TTL_SECS: u64 = 7 * 86_400;

/// Outcome of an idempotent funding call.
#[derive(Debug)]
pub enum FundingOutcome {
    /// The top-up executed (now or on the original attempt).
    Funded(FundingResult),
    /// Every provider failed this run; the attempt trail rides along and a
    /// retry is permitted.
    AllProvidersFailed(Value),
}

/// Execute a funding request exactly once per idempotency key.
pub async fn fund_wallet_idempotent(
    store: &dyn IdempotencyStore,
    adapters: &[Arc<dyn FundingAdapter>],
    request: &FundingRequest,
) -> Result<FundingOutcome, IdempotencyError> {
    let payload = serde_json::to_value(request)
        .map_err(|e| IdempotencyError::Storage(e.to_string()))?;

    let result = run_idempotent(
        store,
        "fund",
        &request.idempotency_key,
        &payload,
        FUNDING_TTL_SECS,
        unix_now(),
        || async {
            match execute_funding_with_failover(adapters, request).await {
                Ok(result) => serde_json::to_value(&result)
                    .map_err(|e| serde_json::json!({ "error": e.to_string() })),
                Err(sardis_chain::ChainError::FundingRoutingFailed(attempts)) => {
                    Err(serde_json::json!({
                        "routing_failed": true,
                        "attempts": attempts,
                    }))
                }
                Err(e) => Err(serde_json::json!({ "error": e.to_string() })),
            }
        },
    )
    .await?;

    match result {
        Ok(value) => {
            let funded: FundingResult = serde_json::from_value(value)
                .map_err(|e| IdempotencyError::Storage(e.to_string()))?;
            Ok(FundingOutcome::Funded(funded))
        }
        Err(detail) => {
            if detail
                .get("routing_failed")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                Ok(FundingOutcome::AllProvidersFailed(
                    detail.get("attempts").cloned().unwrap_or(Value::Null),
                ))
            } else {
                Err(IdempotencyError::Storage(detail.to_string()))
            }
        }
    }
}
