//! JSON-RPC 2.0 client with bounded retries.
//!
//! Used by the EVM and Solana rails and by CCTP attestation polling. Every
//! call carries a timeout; transport failures and 429s are retried with
//! exponential backoff up to the configured budget, then surface as
//! transient [`ChainError`]s for the caller's own retry policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::ChainError;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl RpcConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), timeout: Duration::from_secs(30), max_retries: 3 }
    }
}

pub struct JsonRpcClient {
    config: RpcConfig,
    client: reqwest::Client,
    request_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(config: RpcConfig) -> Self {
        Self { config, client: reqwest::Client::new(), request_id: AtomicU64::new(0) }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Issue one JSON-RPC call, retrying transport-level failures.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let mut backoff = Duration::from_millis(250);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            match self.call_once(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::warn!(method, attempt, error = %e, "rpc call failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ChainError::Rpc("retries exhausted".to_string())))
    }

    async fn call_once(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.config.url)
            .timeout(self.config.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainError::RpcTimeout(e.to_string())
                } else {
                    ChainError::RpcTimeout(format!("transport: {e}"))
                }
            })?;

        if response.status().as_u16() == 429 {
            return Err(ChainError::RateLimited(self.config.url.clone()));
        }
        if !response.status().is_success() {
            return Err(ChainError::Rpc(format!("http {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ChainError::Rpc(format!("invalid json: {e}")))?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error");
            // Nonce races are retryable with a fresh nonce.
            if message.contains("nonce too low") || message.contains("already known") {
                return Err(ChainError::NonceStale(message.to_string()));
            }
            return Err(ChainError::Rpc(message.to_string()));
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Parse a 0x-prefixed hex quantity into u64.
pub fn parse_hex_u64(value: &Value) -> Result<u64, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::Rpc(format!("expected hex string, got {value}")))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Rpc(format!("bad hex quantity {s}: {e}")))
}

/// Parse a 0x-prefixed hex quantity into u128 (fee values).
pub fn parse_hex_u128(value: &Value) -> Result<u128, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::Rpc(format!("expected hex string, got {value}")))?;
    u128::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Rpc(format!("bad hex quantity {s}: {e}")))
}
