//! The append-only payment ledger.
//!
//! Every settlement writes exactly one entry. Identity fields never change
//! after append; only the confirmation status (`pending -> confirmed |
//! failed`) and anchoring metadata may transition. Entries carry an
//! `audit_anchor` hash-chained to the previous entry, so the ledger is
//! tamper-evident even before Merkle anchoring.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sardis_mandate::canonical;
use sardis_types::{AmountMinor, AnchorId, MandateId, TxId, WalletId};

use crate::error::LedgerError;
use crate::merkle::Hash32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub tx_id: TxId,
    pub mandate_id: MandateId,
    pub from_wallet: WalletId,
    pub to_wallet: String,
    pub amount_minor: AmountMinor,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_tx_hash: Option<String>,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    /// Hash chained to the previous entry's anchor; hex.
    pub audit_anchor: String,
    /// Monotonic position in the ledger, assigned on append.
    pub seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_id: Option<AnchorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields of a new entry; the store assigns `seq` and `audit_anchor`.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub tx_id: TxId,
    pub mandate_id: MandateId,
    pub from_wallet: WalletId,
    pub to_wallet: String,
    pub amount_minor: AmountMinor,
    pub currency: String,
    pub chain: Option<String>,
    pub chain_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Hash of the identity fields of an entry. The audit chain and Merkle
/// leaves both commit to this.
pub fn entry_hash(entry: &LedgerEntry) -> Result<Hash32, LedgerError> {
    hash_identity(
        &entry.tx_id,
        &entry.mandate_id,
        &entry.from_wallet,
        &entry.to_wallet,
        entry.amount_minor,
        &entry.currency,
        entry.chain.as_deref(),
        &entry.created_at,
    )
}

#[allow(clippy::too_many_arguments)]
fn hash_identity(
    tx_id: &TxId,
    mandate_id: &MandateId,
    from_wallet: &WalletId,
    to_wallet: &str,
    amount_minor: AmountMinor,
    currency: &str,
    chain: Option<&str>,
    created_at: &DateTime<Utc>,
) -> Result<Hash32, LedgerError> {
    let value = serde_json::json!({
        "tx_id": tx_id.as_str(),
        "mandate_id": mandate_id.as_str(),
        "from_wallet": from_wallet.as_str(),
        "to_wallet": to_wallet,
        "amount_minor": amount_minor,
        "currency": currency,
        "chain": chain,
        "created_at": created_at.to_rfc3339(),
    });
    let bytes = canonical::canonicalize(&value)
        .map_err(|e| LedgerError::Serialization(e.to_string()))?;
    Ok(Sha256::digest(&bytes).into())
}

/// `audit_anchor = SHA256(prev_anchor || entry_hash)`, hex.
pub fn chained_anchor(prev_anchor_hex: &str, entry_hash: &Hash32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_anchor_hex.as_bytes());
    hasher.update(entry_hash);
    hex::encode(hasher.finalize())
}

/// Anchor value before any entry exists.
pub const GENESIS_ANCHOR: &str = "sardis-ledger-genesis";

/// Persistence seam for the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a new entry in `pending` state. Duplicate `tx_id` is an error.
    async fn append(&self, new: NewLedgerEntry) -> Result<LedgerEntry, LedgerError>;

    async fn get(&self, tx_id: &TxId) -> Result<Option<LedgerEntry>, LedgerError>;

    async fn mark_confirmed(
        &self,
        tx_id: &TxId,
        chain_tx_hash: &str,
        block_number: u64,
        gas_used: Option<u64>,
    ) -> Result<(), LedgerError>;

    async fn mark_failed(&self, tx_id: &TxId, reason: &str) -> Result<(), LedgerError>;

    /// Confirmed entries not yet included in an anchor, in ledger order.
    async fn unanchored(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError>;

    async fn mark_anchored(&self, tx_ids: &[TxId], anchor_id: &AnchorId)
        -> Result<(), LedgerError>;

    async fn len(&self) -> Result<u64, LedgerError>;
}

/// In-memory ledger. A single mutex serializes appends so `seq` and the
/// audit chain are globally ordered.
pub struct InMemoryLedgerStore {
    inner: Mutex<LedgerInner>,
}

struct LedgerInner {
    entries: Vec<LedgerEntry>,
    head_anchor: String,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                entries: Vec::new(),
                head_anchor: GENESIS_ANCHOR.to_string(),
            }),
        }
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LedgerInner>, LedgerError> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Storage("ledger mutex poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append(&self, new: NewLedgerEntry) -> Result<LedgerEntry, LedgerError> {
        let mut inner = self.lock()?;
        if inner.entries.iter().any(|e| e.tx_id == new.tx_id) {
            return Err(LedgerError::DuplicateTxId(new.tx_id.to_string()));
        }

        let seq = inner.entries.len() as u64;
        let hash = hash_identity(
            &new.tx_id,
            &new.mandate_id,
            &new.from_wallet,
            &new.to_wallet,
            new.amount_minor,
            &new.currency,
            new.chain.as_deref(),
            &new.created_at,
        )?;
        let audit_anchor = chained_anchor(&inner.head_anchor, &hash);

        let entry = LedgerEntry {
            tx_id: new.tx_id,
            mandate_id: new.mandate_id,
            from_wallet: new.from_wallet,
            to_wallet: new.to_wallet,
            amount_minor: new.amount_minor,
            currency: new.currency,
            chain: new.chain,
            chain_tx_hash: new.chain_tx_hash,
            status: EntryStatus::Pending,
            block_number: None,
            gas_used: None,
            audit_anchor: audit_anchor.clone(),
            seq,
            anchor_id: None,
            failure_reason: None,
            created_at: new.created_at,
        };
        inner.head_anchor = audit_anchor;
        inner.entries.push(entry.clone());
        tracing::debug!(tx_id = %entry.tx_id, seq, "ledger entry appended");
        Ok(entry)
    }

    async fn get(&self, tx_id: &TxId) -> Result<Option<LedgerEntry>, LedgerError> {
        let inner = self.lock()?;
        Ok(inner.entries.iter().find(|e| &e.tx_id == tx_id).cloned())
    }

    async fn mark_confirmed(
        &self,
        tx_id: &TxId,
        chain_tx_hash: &str,
        block_number: u64,
        gas_used: Option<u64>,
    ) -> Result<(), LedgerError> {
        let mut inner = self.lock()?;
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| &e.tx_id == tx_id)
            .ok_or_else(|| LedgerError::EntryNotFound(tx_id.to_string()))?;
        entry.status = EntryStatus::Confirmed;
        entry.chain_tx_hash = Some(chain_tx_hash.to_string());
        entry.block_number = Some(block_number);
        entry.gas_used = gas_used;
        Ok(())
    }

    async fn mark_failed(&self, tx_id: &TxId, reason: &str) -> Result<(), LedgerError> {
        let mut inner = self.lock()?;
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| &e.tx_id == tx_id)
            .ok_or_else(|| LedgerError::EntryNotFound(tx_id.to_string()))?;
        entry.status = EntryStatus::Failed;
        entry.failure_reason = Some(reason.to_string());
        Ok(())
    }

    async fn unanchored(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let inner = self.lock()?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Confirmed && e.anchor_id.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_anchored(
        &self,
        tx_ids: &[TxId],
        anchor_id: &AnchorId,
    ) -> Result<(), LedgerError> {
        let mut inner = self.lock()?;
        for entry in inner.entries.iter_mut() {
            if tx_ids.contains(&entry.tx_id) {
                entry.anchor_id = Some(anchor_id.clone());
            }
        }
        Ok(())
    }

    async fn len(&self) -> Result<u64, LedgerError> {
        Ok(self.lock()?.entries.len() as u64)
    }
}

/// SQLite-backed ledger store.
pub struct SqliteLedgerStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteLedgerStore {
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_id TEXT NOT NULL UNIQUE,
                mandate_id TEXT NOT NULL,
                from_wallet TEXT NOT NULL,
                to_wallet TEXT NOT NULL,
                amount_minor INTEGER NOT NULL,
                currency TEXT NOT NULL,
                chain TEXT,
                chain_tx_hash TEXT,
                status TEXT NOT NULL,
                block_number INTEGER,
                gas_used INTEGER,
                audit_anchor TEXT NOT NULL,
                anchor_id TEXT,
                failure_reason TEXT,
                created_at TEXT NOT NULL
            );
            PRAGMA journal_mode=WAL;",
        )
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Storage("ledger mutex poisoned".to_string()))
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        Ok(LedgerEntry {
            seq: row.get::<_, i64>("seq")? as u64 - 1,
            tx_id: TxId::from(row.get::<_, String>("tx_id")?),
            mandate_id: MandateId::from(row.get::<_, String>("mandate_id")?),
            from_wallet: WalletId::from(row.get::<_, String>("from_wallet")?),
            to_wallet: row.get("to_wallet")?,
            amount_minor: row.get::<_, i64>("amount_minor")? as u64,
            currency: row.get("currency")?,
            chain: row.get("chain")?,
            chain_tx_hash: row.get("chain_tx_hash")?,
            status: match status.as_str() {
                "confirmed" => EntryStatus::Confirmed,
                "failed" => EntryStatus::Failed,
                _ => EntryStatus::Pending,
            },
            block_number: row.get::<_, Option<i64>>("block_number")?.map(|b| b as u64),
            gas_used: row.get::<_, Option<i64>>("gas_used")?.map(|g| g as u64),
            audit_anchor: row.get("audit_anchor")?,
            anchor_id: row.get::<_, Option<String>>("anchor_id")?.map(AnchorId::from),
            failure_reason: row.get("failure_reason")?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn append(&self, new: NewLedgerEntry) -> Result<LedgerEntry, LedgerError> {
        let conn = self.lock()?;

        let head: String = conn
            .query_row(
                "SELECT audit_anchor FROM ledger_entries ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .unwrap_or_else(|_| GENESIS_ANCHOR.to_string());

        let hash = hash_identity(
            &new.tx_id,
            &new.mandate_id,
            &new.from_wallet,
            &new.to_wallet,
            new.amount_minor,
            &new.currency,
            new.chain.as_deref(),
            &new.created_at,
        )?;
        let audit_anchor = chained_anchor(&head, &hash);

        let inserted = conn.execute(
            "INSERT INTO ledger_entries
             (tx_id, mandate_id, from_wallet, to_wallet, amount_minor, currency, chain,
              chain_tx_hash, status, audit_anchor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?10)",
            rusqlite::params![
                new.tx_id.as_str(),
                new.mandate_id.as_str(),
                new.from_wallet.as_str(),
                new.to_wallet,
                new.amount_minor as i64,
                new.currency,
                new.chain,
                new.chain_tx_hash,
                audit_anchor,
                new.created_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(LedgerError::DuplicateTxId(new.tx_id.to_string()));
            }
            Err(e) => return Err(LedgerError::Storage(e.to_string())),
        }

        let mut stmt = conn
            .prepare("SELECT * FROM ledger_entries WHERE tx_id = ?1")
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        stmt.query_row([new.tx_id.as_str()], Self::row_to_entry)
            .map_err(|e| LedgerError::Storage(e.to_string()))
    }

    async fn get(&self, tx_id: &TxId) -> Result<Option<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT * FROM ledger_entries WHERE tx_id = ?1")
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        match stmt.query_row([tx_id.as_str()], Self::row_to_entry) {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(LedgerError::Storage(e.to_string())),
        }
    }

    async fn mark_confirmed(
        &self,
        tx_id: &TxId,
        chain_tx_hash: &str,
        block_number: u64,
        gas_used: Option<u64>,
    ) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE ledger_entries
                 SET status = 'confirmed', chain_tx_hash = ?2, block_number = ?3, gas_used = ?4
                 WHERE tx_id = ?1",
                rusqlite::params![
                    tx_id.as_str(),
                    chain_tx_hash,
                    block_number as i64,
                    gas_used.map(|g| g as i64)
                ],
            )
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        if updated == 0 {
            return Err(LedgerError::EntryNotFound(tx_id.to_string()));
        }
        Ok(())
    }

    async fn mark_failed(&self, tx_id: &TxId, reason: &str) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE ledger_entries SET status = 'failed', failure_reason = ?2 WHERE tx_id = ?1",
                rusqlite::params![tx_id.as_str(), reason],
            )
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        if updated == 0 {
            return Err(LedgerError::EntryNotFound(tx_id.to_string()));
        }
        Ok(())
    }

    async fn unanchored(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM ledger_entries
                 WHERE status = 'confirmed' AND anchor_id IS NULL
                 ORDER BY seq LIMIT ?1",
            )
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([limit as i64], Self::row_to_entry)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| LedgerError::Storage(e.to_string()))?);
        }
        Ok(entries)
    }

    async fn mark_anchored(
        &self,
        tx_ids: &[TxId],
        anchor_id: &AnchorId,
    ) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        for tx_id in tx_ids {
            conn.execute(
                "UPDATE ledger_entries SET anchor_id = ?2 WHERE tx_id = ?1",
                rusqlite::params![tx_id.as_str(), anchor_id.as_str()],
            )
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    async fn len(&self) -> Result<u64, LedgerError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ledger_entries", [], |row| row.get(0))
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(tx: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            tx_id: TxId::from(tx),
            mandate_id: MandateId::from("m-1"),
            from_wallet: WalletId::from("w-1"),
            to_wallet: "0xDest".to_string(),
            amount_minor: 5_500,
            currency: "USDC".to_string(),
            chain: Some("base".to_string()),
            chain_tx_hash: None,
            created_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[tokio::test]
    async fn append_assigns_seq_and_chains_anchors() {
        let store = InMemoryLedgerStore::new();
        let first = store.append(new_entry("tx-1")).await.unwrap();
        let second = store.append(new_entry("tx-2")).await.unwrap();

        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_ne!(first.audit_anchor, second.audit_anchor);

        // Chain reproducibility: second anchor derives from first.
        let second_hash = entry_hash(&second).unwrap();
        assert_eq!(second.audit_anchor, chained_anchor(&first.audit_anchor, &second_hash));
    }

    #[tokio::test]
    async fn duplicate_tx_id_rejected() {
        let store = InMemoryLedgerStore::new();
        store.append(new_entry("tx-1")).await.unwrap();
        let err = store.append(new_entry("tx-1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTxId(_)));
    }

    #[tokio::test]
    async fn confirm_and_fail_transitions() {
        let store = InMemoryLedgerStore::new();
        store.append(new_entry("tx-1")).await.unwrap();
        store.append(new_entry("tx-2")).await.unwrap();

        store.mark_confirmed(&TxId::from("tx-1"), "0xhash", 42, Some(21_000)).await.unwrap();
        store.mark_failed(&TxId::from("tx-2"), "rpc_timeout").await.unwrap();

        let confirmed = store.get(&TxId::from("tx-1")).await.unwrap().unwrap();
        assert_eq!(confirmed.status, EntryStatus::Confirmed);
        assert_eq!(confirmed.block_number, Some(42));
        assert_eq!(confirmed.chain_tx_hash.as_deref(), Some("0xhash"));

        let failed = store.get(&TxId::from("tx-2")).await.unwrap().unwrap();
        assert_eq!(failed.status, EntryStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("rpc_timeout"));
    }

    #[tokio::test]
    async fn unanchored_returns_only_confirmed_unanchored() {
        let store = InMemoryLedgerStore::new();
        store.append(new_entry("tx-1")).await.unwrap();
        store.append(new_entry("tx-2")).await.unwrap();
        store.append(new_entry("tx-3")).await.unwrap();
        store.mark_confirmed(&TxId::from("tx-1"), "0xa", 1, None).await.unwrap();
        store.mark_confirmed(&TxId::from("tx-3"), "0xc", 2, None).await.unwrap();

        let unanchored = store.unanchored(10).await.unwrap();
        assert_eq!(unanchored.len(), 2);

        store
            .mark_anchored(&[TxId::from("tx-1")], &AnchorId::from("anchor-1"))
            .await
            .unwrap();
        let remaining = store.unanchored(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tx_id, TxId::from("tx-3"));
    }

    #[tokio::test]
    async fn sqlite_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let store = SqliteLedgerStore::open(path.to_str().unwrap()).unwrap();

        let first = store.append(new_entry("tx-1")).await.unwrap();
        let second = store.append(new_entry("tx-2")).await.unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);

        let err = store.append(new_entry("tx-1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTxId(_)));

        store.mark_confirmed(&TxId::from("tx-1"), "0xhash", 7, None).await.unwrap();
        let entry = store.get(&TxId::from("tx-1")).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Confirmed);
        assert_eq!(entry.block_number, Some(7));

        // The audit chain matches the in-memory computation.
        let second_hash = entry_hash(&second).unwrap();
        assert_eq!(second.audit_anchor, chained_anchor(&first.audit_anchor, &second_hash));
        assert_eq!(store.len().await.unwrap(), 2);
    }
}
