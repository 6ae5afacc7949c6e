//! Distributed lock: per-wallet serialization for settlement.
//!
//! Compare-and-set acquire with a TTL, owner-conditional release and
//! extend. `acquire_with_retry` retries with jittered backoff inside a
//! wall-clock budget, the way settlement waits for a busy wallet before
//! giving up with `wallet_busy`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to acquire `resource` for `owner`. Returns false when held by
    /// another owner.
    async fn acquire(&self, resource: &str, ttl: Duration, owner: &str)
        -> Result<bool, LockError>;

    /// Release if `owner` still holds it. Returns whether a release
    /// happened.
    async fn release(&self, resource: &str, owner: &str) -> Result<bool, LockError>;

    /// Extend the TTL if `owner` still holds it.
    async fn extend(&self, resource: &str, ttl: Duration, owner: &str)
        -> Result<bool, LockError>;
}

struct Held {
    owner: String,
    expires_at: Instant,
}

/// Single-process lock service. The DashMap entry API provides the
/// compare-and-set; expired holders are evicted on contact.
#[derive(Default)]
pub struct InMemoryLockService {
    locks: DashMap<String, Held>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLockService {
    async fn acquire(
        &self,
        resource: &str,
        ttl: Duration,
        owner: &str,
    ) -> Result<bool, LockError> {
        use dashmap::mapref::entry::Entry;
        let now = Instant::now();
        match self.locks.entry(resource.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Held { owner: owner.to_string(), expires_at: now + ttl });
                Ok(true)
            }
            Entry::Occupied(mut occupied) => {
                let held = occupied.get();
                if held.expires_at <= now || held.owner == owner {
                    occupied.insert(Held { owner: owner.to_string(), expires_at: now + ttl });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn release(&self, resource: &str, owner: &str) -> Result<bool, LockError> {
        let removed = self
            .locks
            .remove_if(resource, |_, held| held.owner == owner)
            .is_some();
        Ok(removed)
    }

    async fn extend(
        &self,
        resource: &str,
        ttl: Duration,
        owner: &str,
    ) -> Result<bool, LockError> {
        let Some(mut held) = self.locks.get_mut(resource) else {
            return Ok(false);
        };
        if held.owner != owner || held.expires_at <= Instant::now() {
            return Ok(false);
        }
        held.expires_at = Instant::now() + ttl;
        Ok(true)
    }
}

/// Retry acquire with jittered backoff until `budget` elapses.
pub async fn acquire_with_retry(
    lock: &dyn DistributedLock,
    resource: &str,
    ttl: Duration,
    owner: &str,
    budget: Duration,
) -> Result<bool, LockError> {
    let deadline = Instant::now() + budget;
    let mut backoff = Duration::from_millis(50);

    loop {
        if lock.acquire(resource, ttl, owner).await? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        // Jitter spreads retries from competing settlements.
        let jitter = rand::thread_rng().gen_range(0..backoff.as_millis().max(1) as u64);
        let sleep = backoff + Duration::from_millis(jitter);
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(sleep.min(remaining)).await;
        backoff = (backoff * 2).min(Duration::from_secs(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_release_cycle() {
        let lock = InMemoryLockService::new();
        assert!(lock.acquire("wallet-1", Duration::from_secs(60), "a").await.unwrap());
        assert!(!lock.acquire("wallet-1", Duration::from_secs(60), "b").await.unwrap());

        // Wrong owner cannot release.
        assert!(!lock.release("wallet-1", "b").await.unwrap());
        assert!(lock.release("wallet-1", "a").await.unwrap());
        assert!(lock.acquire("wallet-1", Duration::from_secs(60), "b").await.unwrap());
    }

    #[tokio::test]
    async fn reacquire_by_same_owner_refreshes() {
        let lock = InMemoryLockService::new();
        assert!(lock.acquire("wallet-1", Duration::from_secs(60), "a").await.unwrap());
        assert!(lock.acquire("wallet-1", Duration::from_secs(60), "a").await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_is_stealable() {
        let lock = InMemoryLockService::new();
        assert!(lock.acquire("wallet-1", Duration::from_millis(10), "a").await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(lock.acquire("wallet-1", Duration::from_secs(60), "b").await.unwrap());
    }

    #[tokio::test]
    async fn extend_only_for_live_owner() {
        let lock = InMemoryLockService::new();
        lock.acquire("wallet-1", Duration::from_secs(60), "a").await.unwrap();
        assert!(lock.extend("wallet-1", Duration::from_secs(120), "a").await.unwrap());
        assert!(!lock.extend("wallet-1", Duration::from_secs(120), "b").await.unwrap());
        assert!(!lock.extend("missing", Duration::from_secs(120), "a").await.unwrap());
    }

    #[tokio::test]
    async fn retry_waits_out_contention() {
        let lock = std::sync::Arc::new(InMemoryLockService::new());
        lock.acquire("wallet-1", Duration::from_millis(50), "holder").await.unwrap();

        // The holder's TTL lapses inside the retry budget.
        let acquired = acquire_with_retry(
            lock.as_ref(),
            "wallet-1",
            Duration::from_secs(60),
            "waiter",
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert!(acquired);
    }

    #[tokio::test]
    async fn retry_gives_up_after_budget() {
        let lock = InMemoryLockService::new();
        lock.acquire("wallet-1", Duration::from_secs(600), "holder").await.unwrap();

        let acquired = acquire_with_retry(
            &lock,
            "wallet-1",
            Duration::from_secs(60),
            "waiter",
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        assert!(!acquired);
    }
}
