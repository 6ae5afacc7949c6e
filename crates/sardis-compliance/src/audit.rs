//! Compliance audit trail.
//!
//! Every preflight outcome appends one entry keyed by mandate id. Two
//! stores exist historically (the compliance audit store and the ledger's
//! audit log); both sit behind [`ComplianceAuditStore`], and
//! [`FanoutAuditStore`] writes through to all of them.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use sardis_types::{AuditId, MandateId};

use crate::error::ComplianceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Allowed,
    Blocked,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceAuditEntry {
    pub audit_id: AuditId,
    pub mandate_id: MandateId,
    /// Which check produced this entry (base_rules, sanctions_screening, ...).
    pub check: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ComplianceAuditStore: Send + Sync {
    async fn append(&self, entry: ComplianceAuditEntry) -> Result<(), ComplianceError>;
    async fn entries_for(
        &self,
        mandate_id: &MandateId,
    ) -> Result<Vec<ComplianceAuditEntry>, ComplianceError>;
}

/// In-memory audit store.
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: DashMap<MandateId, Vec<ComplianceAuditEntry>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ComplianceAuditStore for InMemoryAuditStore {
    async fn append(&self, entry: ComplianceAuditEntry) -> Result<(), ComplianceError> {
        self.entries.entry(entry.mandate_id.clone()).or_default().push(entry);
        Ok(())
    }

    async fn entries_for(
        &self,
        mandate_id: &MandateId,
    ) -> Result<Vec<ComplianceAuditEntry>, ComplianceError> {
        Ok(self.entries.get(mandate_id).map(|e| e.clone()).unwrap_or_default())
    }
}

/// SQLite-backed audit store, append-only.
pub struct SqliteAuditStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteAuditStore {
    pub fn open(path: &str) -> Result<Self, ComplianceError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS compliance_audit (
                audit_id TEXT PRIMARY KEY,
                mandate_id TEXT NOT NULL,
                check_name TEXT NOT NULL,
                outcome TEXT NOT NULL,
                rule_id TEXT,
                provider TEXT,
                detail TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_mandate ON compliance_audit (mandate_id);
            PRAGMA journal_mode=WAL;",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, ComplianceError> {
        self.conn
            .lock()
            .map_err(|_| ComplianceError::AuditStore("audit store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl ComplianceAuditStore for SqliteAuditStore {
    async fn append(&self, entry: ComplianceAuditEntry) -> Result<(), ComplianceError> {
        let conn = self.lock()?;
        let outcome = serde_json::to_string(&entry.outcome)?;
        conn.execute(
            "INSERT INTO compliance_audit
             (audit_id, mandate_id, check_name, outcome, rule_id, provider, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                entry.audit_id.as_str(),
                entry.mandate_id.as_str(),
                entry.check,
                outcome.trim_matches('"'),
                entry.rule_id,
                entry.provider,
                entry.detail,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn entries_for(
        &self,
        mandate_id: &MandateId,
    ) -> Result<Vec<ComplianceAuditEntry>, ComplianceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT audit_id, mandate_id, check_name, outcome, rule_id, provider, detail, created_at
             FROM compliance_audit WHERE mandate_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([mandate_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (audit_id, mandate_id, check, outcome, rule_id, provider, detail, created_at) =
                row?;
            let outcome: AuditOutcome = serde_json::from_value(serde_json::Value::String(outcome))?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| ComplianceError::AuditStore(format!("bad timestamp: {e}")))?
                .with_timezone(&Utc);
            entries.push(ComplianceAuditEntry {
                audit_id: AuditId::from(audit_id),
                mandate_id: MandateId::from(mandate_id),
                check,
                outcome,
                rule_id,
                provider,
                detail,
                created_at,
            });
        }
        Ok(entries)
    }
}

/// Writes through to every wrapped store; the first is authoritative for
/// reads.
pub struct FanoutAuditStore {
    stores: Vec<std::sync::Arc<dyn ComplianceAuditStore>>,
}

impl FanoutAuditStore {
    pub fn new(stores: Vec<std::sync::Arc<dyn ComplianceAuditStore>>) -> Self {
        assert!(!stores.is_empty(), "fanout requires at least one store");
        Self { stores }
    }
}

#[async_trait]
impl ComplianceAuditStore for FanoutAuditStore {
    async fn append(&self, entry: ComplianceAuditEntry) -> Result<(), ComplianceError> {
        for store in &self.stores {
            store.append(entry.clone()).await?;
        }
        Ok(())
    }

    async fn entries_for(
        &self,
        mandate_id: &MandateId,
    ) -> Result<Vec<ComplianceAuditEntry>, ComplianceError> {
        self.stores[0].entries_for(mandate_id).await
    }
}
