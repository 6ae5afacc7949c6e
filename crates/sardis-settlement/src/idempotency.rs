//! Idempotency store: key -> outcome with an in-flight claim.
//!
//! `run_idempotent` canonicalizes the payload, claims the `(operation,
//! key)` pair with a compare-and-set insert, runs the operation, and
//! persists its outcome. Replays with the same request hash return the
//! stored response; a different hash under the same key is a conflict; a
//! concurrent in-flight run is awaited with bounded backoff.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sardis_mandate::canonical;
use sardis_types::{RejectReason, UnixSeconds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub operation: String,
    pub request_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    pub status: IdempotencyStatus,
    pub expires_at: UnixSeconds,
}

/// Outcome of attempting to claim a key.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The caller owns the run.
    Claimed,
    /// Another run already exists.
    Existing(IdempotencyRecord),
}

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    /// Same key, different request hash.
    #[error("idempotency_conflict")]
    Conflict,

    /// Another run is in flight and did not finish within the wait budget.
    #[error("idempotency_in_progress")]
    InProgress,

    #[error("idempotency storage error: {0}")]
    Storage(String),
}

impl IdempotencyError {
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            IdempotencyError::Conflict => Some(RejectReason::IdempotencyConflict),
            IdempotencyError::InProgress => Some(RejectReason::IdempotencyInProgress),
            IdempotencyError::Storage(_) => None,
        }
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claim `(operation, key)`: insert a pending record unless
    /// one exists.
    async fn claim(
        &self,
        operation: &str,
        key: &str,
        request_hash: &str,
        expires_at: UnixSeconds,
    ) -> Result<ClaimOutcome, IdempotencyError>;

    async fn get(
        &self,
        operation: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError>;

    async fn complete(
        &self,
        operation: &str,
        key: &str,
        response: Value,
    ) -> Result<(), IdempotencyError>;

    async fn fail(&self, operation: &str, key: &str) -> Result<(), IdempotencyError>;

    /// Compare-and-set a failed record back to pending for a re-run.
    /// Returns false when the record is no longer failed (someone else
    /// claimed the retry).
    async fn retry_failed(&self, operation: &str, key: &str) -> Result<bool, IdempotencyError>;

    async fn purge_expired(&self, now: UnixSeconds) -> Result<usize, IdempotencyError>;
}

/// In-memory store keyed by `(operation, key)`.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: DashMap<(String, String), IdempotencyRecord>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(
        &self,
        operation: &str,
        key: &str,
        request_hash: &str,
        expires_at: UnixSeconds,
    ) -> Result<ClaimOutcome, IdempotencyError> {
        use dashmap::mapref::entry::Entry;
        match self.records.entry((operation.to_string(), key.to_string())) {
            Entry::Occupied(entry) => Ok(ClaimOutcome::Existing(entry.get().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(IdempotencyRecord {
                    key: key.to_string(),
                    operation: operation.to_string(),
                    request_hash: request_hash.to_string(),
                    response: None,
                    status: IdempotencyStatus::Pending,
                    expires_at,
                });
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn get(
        &self,
        operation: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        Ok(self
            .records
            .get(&(operation.to_string(), key.to_string()))
            .map(|r| r.clone()))
    }

    async fn complete(
        &self,
        operation: &str,
        key: &str,
        response: Value,
    ) -> Result<(), IdempotencyError> {
        let mut record = self
            .records
            .get_mut(&(operation.to_string(), key.to_string()))
            .ok_or_else(|| IdempotencyError::Storage(format!("missing record {operation}/{key}")))?;
        record.status = IdempotencyStatus::Completed;
        record.response = Some(response);
        Ok(())
    }

    async fn fail(&self, operation: &str, key: &str) -> Result<(), IdempotencyError> {
        let mut record = self
            .records
            .get_mut(&(operation.to_string(), key.to_string()))
            .ok_or_else(|| IdempotencyError::Storage(format!("missing record {operation}/{key}")))?;
        record.status = IdempotencyStatus::Failed;
        Ok(())
    }

    async fn retry_failed(&self, operation: &str, key: &str) -> Result<bool, IdempotencyError> {
        let Some(mut record) = self
            .records
            .get_mut(&(operation.to_string(), key.to_string()))
        else {
            return Ok(false);
        };
        if record.status != IdempotencyStatus::Failed {
            return Ok(false);
        }
        record.status = IdempotencyStatus::Pending;
        record.response = None;
        Ok(true)
    }

    async fn purge_expired(&self, now: UnixSeconds) -> Result<usize, IdempotencyError> {
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        Ok(before - self.records.len())
    }
}

/// SQLite-backed store. The primary key on `(operation, key)` makes the
/// claim atomic across processes.
pub struct SqliteIdempotencyStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteIdempotencyStore {
    pub fn open(path: &str) -> Result<Self, IdempotencyError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| IdempotencyError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS idempotency_records (
                operation TEXT NOT NULL,
                key TEXT NOT NULL,
                request_hash TEXT NOT NULL,
                response TEXT,
                status TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (operation, key)
            );
            PRAGMA journal_mode=WAL;",
        )
        .map_err(|e| IdempotencyError::Storage(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, IdempotencyError> {
        self.conn
            .lock()
            .map_err(|_| IdempotencyError::Storage("idempotency mutex poisoned".to_string()))
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdempotencyRecord> {
        let status: String = row.get("status")?;
        let response: Option<String> = row.get("response")?;
        Ok(IdempotencyRecord {
            operation: row.get("operation")?,
            key: row.get("key")?,
            request_hash: row.get("request_hash")?,
            response: response.and_then(|r| serde_json::from_str(&r).ok()),
            status: match status.as_str() {
                "completed" => IdempotencyStatus::Completed,
                "failed" => IdempotencyStatus::Failed,
                _ => IdempotencyStatus::Pending,
            },
            expires_at: row.get::<_, i64>("expires_at")? as u64,
        })
    }
}

#[async_trait]
impl IdempotencyStore for SqliteIdempotencyStore {
    async fn claim(
        &self,
        operation: &str,
        key: &str,
        request_hash: &str,
        expires_at: UnixSeconds,
    ) -> Result<ClaimOutcome, IdempotencyError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO idempotency_records (operation, key, request_hash, status, expires_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            rusqlite::params![operation, key, request_hash, expires_at as i64],
        );
        match inserted {
            Ok(_) => Ok(ClaimOutcome::Claimed),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let mut stmt = conn
                    .prepare(
                        "SELECT * FROM idempotency_records WHERE operation = ?1 AND key = ?2",
                    )
                    .map_err(|e| IdempotencyError::Storage(e.to_string()))?;
                let record = stmt
                    .query_row([operation, key], Self::row_to_record)
                    .map_err(|e| IdempotencyError::Storage(e.to_string()))?;
                Ok(ClaimOutcome::Existing(record))
            }
            Err(e) => Err(IdempotencyError::Storage(e.to_string())),
        }
    }

    async fn get(
        &self,
        operation: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM idempotency_records WHERE operation = ?1 AND key = ?2")
            .map_err(|e| IdempotencyError::Storage(e.to_string()))?;
        match stmt.query_row([operation, key], Self::row_to_record) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(IdempotencyError::Storage(e.to_string())),
        }
    }

    async fn complete(
        &self,
        operation: &str,
        key: &str,
        response: Value,
    ) -> Result<(), IdempotencyError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE idempotency_records SET status = 'completed', response = ?3
             WHERE operation = ?1 AND key = ?2",
            rusqlite::params![operation, key, serde_json::to_string(&response).ok()],
        )
        .map_err(|e| IdempotencyError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn fail(&self, operation: &str, key: &str) -> Result<(), IdempotencyError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE idempotency_records SET status = 'failed' WHERE operation = ?1 AND key = ?2",
            [operation, key],
        )
        .map_err(|e| IdempotencyError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn retry_failed(&self, operation: &str, key: &str) -> Result<bool, IdempotencyError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE idempotency_records SET status = 'pending', response = NULL
                 WHERE operation = ?1 AND key = ?2 AND status = 'failed'",
                [operation, key],
            )
            .map_err(|e| IdempotencyError::Storage(e.to_string()))?;
        Ok(updated > 0)
    }

    async fn purge_expired(&self, now: UnixSeconds) -> Result<usize, IdempotencyError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM idempotency_records WHERE expires_at <= ?1",
            [now as i64],
        )
        .map_err(|e| IdempotencyError::Storage(e.to_string()))
    }
}

/// Wait/backoff parameters for in-flight runs.
const IN_FLIGHT_POLLS: u32 = 20;
const IN_FLIGHT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Run `f` at most once per `(operation, key, payload)`.
///
/// The error type of `f` must carry the operation's own failures;
/// idempotency-layer failures surface as [`IdempotencyError`] through the
/// outer `Result`.
pub async fn run_idempotent<F, Fut, E>(
    store: &dyn IdempotencyStore,
    operation: &str,
    key: &str,
    payload: &Value,
    ttl_secs: u64,
    now: UnixSeconds,
    f: F,
) -> Result<Result<Value, E>, IdempotencyError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Value, E>>,
{
    let request_hash = hex::encode(canonical::hash_sha256(
        &canonical::canonicalize(payload)
            .map_err(|e| IdempotencyError::Storage(e.to_string()))?,
    ));
    let expires_at = now + ttl_secs;

    loop {
        match store.claim(operation, key, &request_hash, expires_at).await? {
            ClaimOutcome::Claimed => {
                return execute(store, operation, key, &f).await;
            }
            ClaimOutcome::Existing(record) => {
                if record.request_hash != request_hash {
                    tracing::warn!(operation, key, "idempotency key reused with different payload");
                    return Err(IdempotencyError::Conflict);
                }
                match record.status {
                    IdempotencyStatus::Completed => {
                        let response = record.response.unwrap_or(Value::Null);
                        tracing::debug!(operation, key, "returning stored idempotent response");
                        return Ok(Ok(response));
                    }
                    IdempotencyStatus::Failed => {
                        if store.retry_failed(operation, key).await? {
                            return execute(store, operation, key, &f).await;
                        }
                        // Someone else claimed the retry; fall through to wait.
                    }
                    IdempotencyStatus::Pending => {}
                }

                // In-flight elsewhere: wait with bounded backoff.
                for _ in 0..IN_FLIGHT_POLLS {
                    tokio::time::sleep(IN_FLIGHT_POLL_INTERVAL).await;
                    if let Some(current) = store.get(operation, key).await? {
                        match current.status {
                            IdempotencyStatus::Completed => {
                                return Ok(Ok(current.response.unwrap_or(Value::Null)));
                            }
                            IdempotencyStatus::Failed => break,
                            IdempotencyStatus::Pending => {}
                        }
                    }
                }
                let still = store.get(operation, key).await?;
                match still.map(|r| r.status) {
                    Some(IdempotencyStatus::Failed) => continue,
                    Some(IdempotencyStatus::Completed) => continue,
                    _ => return Err(IdempotencyError::InProgress),
                }
            }
        }
    }
}

async fn execute<F, Fut, E>(
    store: &dyn IdempotencyStore,
    operation: &str,
    key: &str,
    f: &F,
) -> Result<Result<Value, E>, IdempotencyError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Value, E>>,
{
    match f().await {
        Ok(response) => {
            store.complete(operation, key, response.clone()).await?;
            Ok(Ok(response))
        }
        Err(e) => {
            store.fail(operation, key).await?;
            Ok(Err(e))
        }
    }
}
