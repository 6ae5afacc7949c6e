//! Approval workflow: quorum-gated human sign-off for transactions the
//! confidence router will not auto-approve.
//!
//! State machine: `pending` -> `approved | rejected | cancelled | expired`.
//! Only listed approvers may vote; quorum counts distinct approvals; the
//! expiry sweep moves stale pending requests to `expired`. Transitions out
//! of a terminal state are no-ops that report the terminal state back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use sardis_types::{AgentId, AmountMinor, ApprovalId};

use crate::error::PolicyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        self != ApprovalStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Normal,
    High,
    Critical,
}

/// One approver's vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalVote {
    pub approver: String,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub voted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub status: ApprovalStatus,
    pub urgency: Urgency,
    pub agent_id: AgentId,
    pub amount_minor: AmountMinor,
    pub description: String,
    pub requested_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    /// Approvers allowed to vote on this request.
    pub approvers: Vec<String>,
    /// Distinct approvals required.
    pub quorum: usize,
    pub votes: Vec<ApprovalVote>,
    /// Idempotency key of the suspended settlement, for resumption.
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_reason: Option<String>,
}

impl ApprovalRequest {
    fn distinct_approvals(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        self.votes
            .iter()
            .filter(|v| v.approved && seen.insert(v.approver.as_str()))
            .count()
    }
}

/// Outcome of a vote or transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub status: ApprovalStatus,
    pub quorum_reached: bool,
    pub approvals: usize,
    pub quorum: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval request not found: {0}")]
    NotFound(String),

    #[error("approver {0} is not on the approver list")]
    NotAnApprover(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistence seam for approval requests.
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn insert(&self, request: ApprovalRequest) -> Result<(), PolicyError>;
    async fn get(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, PolicyError>;
    async fn update(&self, request: ApprovalRequest) -> Result<(), PolicyError>;
    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, PolicyError>;

    /// The most recent request created for an idempotency key, if any. The
    /// settlement engine uses this to resume after approval.
    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<ApprovalRequest>, PolicyError>;
}

/// In-memory approval store.
#[derive(Default)]
pub struct InMemoryApprovalRepository {
    requests: DashMap<ApprovalId, ApprovalRequest>,
}

impl InMemoryApprovalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn insert(&self, request: ApprovalRequest) -> Result<(), PolicyError> {
        self.requests.insert(request.id.clone(), request);
        Ok(())
    }

    async fn get(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, PolicyError> {
        Ok(self.requests.get(id).map(|r| r.clone()))
    }

    async fn update(&self, request: ApprovalRequest) -> Result<(), PolicyError> {
        self.requests.insert(request.id.clone(), request);
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, PolicyError> {
        Ok(self
            .requests
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .map(|r| r.clone())
            .collect())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<ApprovalRequest>, PolicyError> {
        Ok(self
            .requests
            .iter()
            .filter(|r| r.idempotency_key == key)
            .max_by_key(|r| r.created_at)
            .map(|r| r.clone()))
    }
}

/// SQLite-backed approval store. Requests are stored as JSON documents
/// with the columns the sweeps and lookups filter on.
pub struct SqliteApprovalRepository {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteApprovalRepository {
    pub fn open(path: &str) -> Result<Self, PolicyError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| PolicyError::StorageError(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS approval_requests (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                created_at TEXT NOT NULL,
                document TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_approvals_key ON approval_requests (idempotency_key);
            PRAGMA journal_mode=WAL;",
        )
        .map_err(|e| PolicyError::StorageError(e.to_string()))?;
        Ok(Self { conn: std::sync::Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, PolicyError> {
        self.conn
            .lock()
            .map_err(|_| PolicyError::StorageError("approval store mutex poisoned".to_string()))
    }

    fn upsert(&self, request: &ApprovalRequest) -> Result<(), PolicyError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO approval_requests (id, status, idempotency_key, created_at, document)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET status = ?2, document = ?5",
            rusqlite::params![
                request.id.as_str(),
                serde_json::to_string(&request.status)?.trim_matches('"'),
                request.idempotency_key,
                request.created_at.to_rfc3339(),
                serde_json::to_string(request)?,
            ],
        )
        .map_err(|e| PolicyError::StorageError(e.to_string()))?;
        Ok(())
    }

    fn parse_document(document: String) -> Result<ApprovalRequest, PolicyError> {
        serde_json::from_str(&document).map_err(PolicyError::from)
    }
}

#[async_trait]
impl ApprovalRepository for SqliteApprovalRepository {
    async fn insert(&self, request: ApprovalRequest) -> Result<(), PolicyError> {
        self.upsert(&request)
    }

    async fn get(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, PolicyError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT document FROM approval_requests WHERE id = ?1")
            .map_err(|e| PolicyError::StorageError(e.to_string()))?;
        match stmt.query_row([id.as_str()], |row| row.get::<_, String>(0)) {
            Ok(document) => Ok(Some(Self::parse_document(document)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PolicyError::StorageError(e.to_string())),
        }
    }

    async fn update(&self, request: ApprovalRequest) -> Result<(), PolicyError> {
        self.upsert(&request)
    }

    async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, PolicyError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT document FROM approval_requests WHERE status = 'pending'")
            .map_err(|e| PolicyError::StorageError(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| PolicyError::StorageError(e.to_string()))?;
        let mut requests = Vec::new();
        for row in rows {
            let document = row.map_err(|e| PolicyError::StorageError(e.to_string()))?;
            requests.push(Self::parse_document(document)?);
        }
        Ok(requests)
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<ApprovalRequest>, PolicyError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT document FROM approval_requests WHERE idempotency_key = ?1
                 ORDER BY created_at DESC LIMIT 1",
            )
            .map_err(|e| PolicyError::StorageError(e.to_string()))?;
        match stmt.query_row([key], |row| row.get::<_, String>(0)) {
            Ok(document) => Ok(Some(Self::parse_document(document)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PolicyError::StorageError(e.to_string())),
        }
    }
}

/// Parameters for creating a request.
#[derive(Debug, Clone)]
pub struct ApprovalParams {
    pub agent_id: AgentId,
    pub amount_minor: AmountMinor,
    pub description: String,
    pub requested_by: String,
    pub urgency: Urgency,
    pub approvers: Vec<String>,
    pub quorum: usize,
    pub timeout_secs: u64,
    pub idempotency_key: String,
}

/// Drives the approval state machine over a repository.
pub struct ApprovalWorkflow {
    repo: std::sync::Arc<dyn ApprovalRepository>,
}

impl ApprovalWorkflow {
    pub fn new(repo: std::sync::Arc<dyn ApprovalRepository>) -> Self {
        Self { repo }
    }

    pub async fn create(&self, params: ApprovalParams) -> Result<ApprovalRequest, PolicyError> {
        let now = Utc::now();
        let request = ApprovalRequest {
            id: ApprovalId::generate(),
            status: ApprovalStatus::Pending,
            urgency: params.urgency,
            agent_id: params.agent_id,
            amount_minor: params.amount_minor,
            description: params.description,
            requested_by: params.requested_by,
            reviewed_by: None,
            approvers: params.approvers,
            quorum: params.quorum.max(1),
            votes: Vec::new(),
            idempotency_key: params.idempotency_key,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(params.timeout_secs as i64),
            resolution_reason: None,
        };
        tracing::info!(
            approval_id = %request.id,
            agent_id = %request.agent_id,
            quorum = request.quorum,
            "approval request created"
        );
        self.repo.insert(request.clone()).await?;
        Ok(request)
    }

    pub async fn get(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, PolicyError> {
        self.repo.get(id).await
    }

    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<ApprovalRequest>, PolicyError> {
        self.repo.find_by_idempotency_key(key).await
    }

    /// Record an approval vote. Reaching quorum transitions to `approved`.
    pub async fn approve(
        &self,
        id: &ApprovalId,
        approver: &str,
        comment: Option<String>,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        let mut request = self.load(id).await?;

        // Terminal states absorb further votes.
        if request.status.is_terminal() {
            return Ok(outcome_of(&request));
        }
        if Utc::now() >= request.expires_at {
            request.status = ApprovalStatus::Expired;
            self.store(request.clone()).await?;
            return Ok(outcome_of(&request));
        }
        if !request.approvers.iter().any(|a| a == approver) {
            return Err(ApprovalError::NotAnApprover(approver.to_string()));
        }

        request.votes.push(ApprovalVote {
            approver: approver.to_string(),
            approved: true,
            comment,
            voted_at: Utc::now(),
        });

        let approvals = request.distinct_approvals();
        if approvals >= request.quorum {
            request.status = ApprovalStatus::Approved;
            request.reviewed_by = Some(approver.to_string());
            tracing::info!(approval_id = %request.id, approvals, "approval quorum reached");
        }
        self.store(request.clone()).await?;
        Ok(outcome_of(&request))
    }

    /// Any listed approver can reject outright.
    pub async fn reject(
        &self,
        id: &ApprovalId,
        approver: &str,
        reason: Option<String>,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        let mut request = self.load(id).await?;
        if request.status.is_terminal() {
            return Ok(outcome_of(&request));
        }
        if !request.approvers.iter().any(|a| a == approver) {
            return Err(ApprovalError::NotAnApprover(approver.to_string()));
        }

        request.votes.push(ApprovalVote {
            approver: approver.to_string(),
            approved: false,
            comment: reason.clone(),
            voted_at: Utc::now(),
        });
        request.status = ApprovalStatus::Rejected;
        request.reviewed_by = Some(approver.to_string());
        request.resolution_reason = reason;
        tracing::info!(approval_id = %request.id, approver, "approval rejected");
        self.store(request.clone()).await?;
        Ok(outcome_of(&request))
    }

    /// Cancel a pending request (requester withdrew, settlement aborted).
    pub async fn cancel(
        &self,
        id: &ApprovalId,
        reason: Option<String>,
    ) -> Result<ApprovalOutcome, ApprovalError> {
        let mut request = self.load(id).await?;
        if request.status.is_terminal() {
            return Ok(outcome_of(&request));
        }
        request.status = ApprovalStatus::Cancelled;
        request.resolution_reason = reason;
        self.store(request.clone()).await?;
        Ok(outcome_of(&request))
    }

    /// Move pending requests past their deadline to `expired`. Returns the
    /// number expired. Safe to run from multiple sweepers.
    pub async fn sweep_expired(&self) -> Result<usize, PolicyError> {
        let now = Utc::now();
        let mut expired = 0;
        for mut request in self.repo.list_pending().await? {
            if now >= request.expires_at {
                request.status = ApprovalStatus::Expired;
                self.repo.update(request).await?;
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(expired, "expired stale approval requests");
        }
        Ok(expired)
    }

    async fn load(&self, id: &ApprovalId) -> Result<ApprovalRequest, ApprovalError> {
        self.repo
            .get(id)
            .await
            .map_err(|e| ApprovalError::Storage(e.to_string()))?
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))
    }

    async fn store(&self, request: ApprovalRequest) -> Result<(), ApprovalError> {
        self.repo
            .update(request)
            .await
            .map_err(|e| ApprovalError::Storage(e.to_string()))
    }
}

fn outcome_of(request: &ApprovalRequest) -> ApprovalOutcome {
    let approvals = request.distinct_approvals();
    ApprovalOutcome {
        status: request.status,
        quorum_reached: request.status == ApprovalStatus::Approved,
        approvals,
        quorum: request.quorum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn workflow() -> ApprovalWorkflow {
        ApprovalWorkflow::new(Arc::new(InMemoryApprovalRepository::new()))
    }

    fn params(approvers: &[&str], quorum: usize, timeout_secs: u64) -> ApprovalParams {
        ApprovalParams {
            agent_id: AgentId::from("agent-001"),
            amount_minor: 5_500,
            description: "multi-sig settlement".to_string(),
            requested_by: "settlement-engine".to_string(),
            urgency: Urgency::Normal,
            approvers: approvers.iter().map(|s| s.to_string()).collect(),
            quorum,
            timeout_secs,
            idempotency_key: "payment-1".to_string(),
        }
    }

    #[tokio::test]
    async fn quorum_of_two_requires_two_distinct_approvers() {
        let wf = workflow();
        let request = wf.create(params(&["x", "y", "z"], 2, 3_600)).await.unwrap();

        let first = wf.approve(&request.id, "x", None).await.unwrap();
        assert!(!first.quorum_reached);
        assert_eq!(first.status, ApprovalStatus::Pending);
        assert_eq!(first.approvals, 1);

        let second = wf.approve(&request.id, "y", None).await.unwrap();
        assert!(second.quorum_reached);
        assert_eq!(second.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn duplicate_approvals_do_not_advance_quorum() {
        let wf = workflow();
        let request = wf.create(params(&["x", "y"], 2, 3_600)).await.unwrap();

        wf.approve(&request.id, "x", None).await.unwrap();
        let again = wf.approve(&request.id, "x", None).await.unwrap();
        assert!(!again.quorum_reached);
        assert_eq!(again.approvals, 1);
    }

    #[tokio::test]
    async fn unlisted_approver_is_refused() {
        let wf = workflow();
        let request = wf.create(params(&["x"], 1, 3_600)).await.unwrap();
        let err = wf.approve(&request.id, "mallory", None).await.unwrap_err();
        assert_eq!(err, ApprovalError::NotAnApprover("mallory".to_string()));
    }

    #[tokio::test]
    async fn approval_after_terminal_is_noop() {
        let wf = workflow();
        let request = wf.create(params(&["x", "y", "z"], 2, 3_600)).await.unwrap();
        wf.approve(&request.id, "x", None).await.unwrap();
        wf.approve(&request.id, "y", None).await.unwrap();

        let late = wf.approve(&request.id, "z", None).await.unwrap();
        assert_eq!(late.status, ApprovalStatus::Approved);
        // z's vote was not recorded.
        let stored = wf.get(&request.id).await.unwrap().unwrap();
        assert_eq!(stored.votes.len(), 2);
    }

    #[tokio::test]
    async fn rejection_is_terminal() {
        let wf = workflow();
        let request = wf.create(params(&["x", "y"], 2, 3_600)).await.unwrap();
        let outcome = wf.reject(&request.id, "y", Some("supplier unverified".to_string())).await.unwrap();
        assert_eq!(outcome.status, ApprovalStatus::Rejected);

        let after = wf.approve(&request.id, "x", None).await.unwrap();
        assert_eq!(after.status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn cancel_from_pending() {
        let wf = workflow();
        let request = wf.create(params(&["x"], 1, 3_600)).await.unwrap();
        let outcome = wf.cancel(&request.id, Some("caller aborted".to_string())).await.unwrap();
        assert_eq!(outcome.status, ApprovalStatus::Cancelled);
    }

    #[tokio::test]
    async fn expired_request_refuses_votes() {
        let wf = workflow();
        let request = wf.create(params(&["x"], 1, 0)).await.unwrap();
        // timeout 0: already past the deadline.
        let outcome = wf.approve(&request.id, "x", None).await.unwrap();
        assert_eq!(outcome.status, ApprovalStatus::Expired);
        assert!(!outcome.quorum_reached);
    }

    #[tokio::test]
    async fn sweep_expires_stale_pending() {
        let wf = workflow();
        let stale = wf.create(params(&["x"], 1, 0)).await.unwrap();
        let fresh = wf.create(params(&["x"], 1, 3_600)).await.unwrap();

        let expired = wf.sweep_expired().await.unwrap();
        assert_eq!(expired, 1);
        assert_eq!(wf.get(&stale.id).await.unwrap().unwrap().status, ApprovalStatus::Expired);
        assert_eq!(wf.get(&fresh.id).await.unwrap().unwrap().status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn sqlite_repository_round_trips_and_resolves_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approvals.db");
        let repo = Arc::new(SqliteApprovalRepository::open(path.to_str().unwrap()).unwrap());
        let wf = ApprovalWorkflow::new(repo.clone());

        let request = wf.create(params(&["x", "y"], 2, 3_600)).await.unwrap();
        wf.approve(&request.id, "x", None).await.unwrap();

        let loaded = wf.get(&request.id).await.unwrap().unwrap();
        assert_eq!(loaded.votes.len(), 1);
        assert_eq!(loaded.status, ApprovalStatus::Pending);

        let by_key = repo.find_by_idempotency_key("payment-1").await.unwrap().unwrap();
        assert_eq!(by_key.id, request.id);
        assert!(repo.find_by_idempotency_key("missing").await.unwrap().is_none());

        assert_eq!(repo.list_pending().await.unwrap().len(), 1);
        wf.approve(&request.id, "y", None).await.unwrap();
        assert!(repo.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_request_errors() {
        let wf = workflow();
        let err = wf.approve(&ApprovalId::from("ghost"), "x", None).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound(_)));
    }
}
