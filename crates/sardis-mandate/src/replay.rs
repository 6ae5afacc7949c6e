//! Replay cache: at-most-once mandate acceptance.
//!
//! Stores `mandate_id -> expires_at`. Entries live until the mandate would
//! have expired anyway, after which a background sweep may purge them; a
//! replayed id inside that window is rejected. Implementations must be
//! strongly consistent under concurrent insert.

use std::sync::Mutex;

use dashmap::DashMap;

use sardis_types::UnixSeconds;

use crate::error::MandateError;

/// Result of attempting to claim a mandate id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCheck {
    /// First sighting; the id is now recorded.
    Fresh,
    /// The id was already recorded: replay attempt.
    Replay,
}

/// Trait for replay cache backends. Implementations must be thread-safe.
pub trait ReplayCache: Send + Sync {
    /// Non-mutating probe: has this id already been recorded?
    fn contains(&self, mandate_id: &str) -> Result<bool, MandateError>;

    /// Atomically record `mandate_id` unless already present.
    ///
    /// A failure to record after a successful verify is fatal: the caller
    /// must treat the mandate as rejected.
    fn check_and_insert(
        &self,
        mandate_id: &str,
        expires_at: UnixSeconds,
    ) -> Result<ReplayCheck, MandateError>;

    /// Remove entries whose TTL has elapsed. Returns the number purged.
    fn purge_expired(&self, now: UnixSeconds) -> Result<usize, MandateError>;
}

/// In-memory replay cache backed by DashMap. Fast but lost on restart.
#[derive(Default)]
pub struct InMemoryReplayCache {
    entries: DashMap<String, UnixSeconds>,
}

impl InMemoryReplayCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayCache for InMemoryReplayCache {
    fn contains(&self, mandate_id: &str) -> Result<bool, MandateError> {
        Ok(self.entries.contains_key(mandate_id))
    }

    fn check_and_insert(
        &self,
        mandate_id: &str,
        expires_at: UnixSeconds,
    ) -> Result<ReplayCheck, MandateError> {
        // DashMap's entry API gives single-process atomicity.
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(mandate_id.to_string()) {
            Entry::Occupied(_) => Ok(ReplayCheck::Replay),
            Entry::Vacant(v) => {
                v.insert(expires_at);
                Ok(ReplayCheck::Fresh)
            }
        }
    }

    fn purge_expired(&self, now: UnixSeconds) -> Result<usize, MandateError> {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        Ok(before - self.entries.len())
    }
}

/// Persistent replay cache backed by SQLite. Survives restarts, atomic
/// across processes via the primary-key constraint.
pub struct SqliteReplayCache {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteReplayCache {
    pub fn open(path: &str) -> Result<Self, MandateError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS seen_mandates (
                mandate_id TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            );
            PRAGMA journal_mode=WAL;",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, MandateError> {
        self.conn
            .lock()
            .map_err(|_| MandateError::ReplayCacheError("replay cache mutex poisoned".to_string()))
    }
}

impl ReplayCache for SqliteReplayCache {
    fn contains(&self, mandate_id: &str) -> Result<bool, MandateError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM seen_mandates WHERE mandate_id = ?1",
            [mandate_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn check_and_insert(
        &self,
        mandate_id: &str,
        expires_at: UnixSeconds,
    ) -> Result<ReplayCheck, MandateError> {
        let conn = self.lock()?;
        // Plain INSERT: the primary-key constraint makes the claim atomic
        // at the database level, safe across processes.
        match conn.execute(
            "INSERT INTO seen_mandates (mandate_id, expires_at) VALUES (?1, ?2)",
            rusqlite::params![mandate_id, expires_at as i64],
        ) {
            Ok(_) => Ok(ReplayCheck::Fresh),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(ReplayCheck::Replay)
            }
            Err(e) => Err(MandateError::ReplayCacheError(e.to_string())),
        }
    }

    fn purge_expired(&self, now: UnixSeconds) -> Result<usize, MandateError> {
        let conn = self.lock()?;
        let purged = conn.execute(
            "DELETE FROM seen_mandates WHERE expires_at <= ?1",
            rusqlite::params![now as i64],
        )?;
        Ok(purged)
    }
}
