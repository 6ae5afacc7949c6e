//! Generation-tagged balance cache.
//!
//! Entries are keyed by `(wallet, token, generation)`. Invalidating a
//! wallet bumps its generation, so any in-flight write tagged with the old
//! generation lands under a dead key and is never read again. This is the
//! cache-stampede-safe invalidation pattern settlement relies on after a
//! transfer changes a wallet's balance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;

use sardis_types::{AmountMinor, WalletId};

/// Operation counters and latency for the cache.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    total_latency_micros: AtomicU64,
    operations: AtomicU64,
}

impl CacheMetrics {
    pub fn record_hit(&self, latency_micros: u64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_micros);
    }

    pub fn record_miss(&self, latency_micros: u64) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_micros);
    }

    pub fn record_set(&self, latency_micros: u64) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_micros);
    }

    pub fn record_delete(&self, latency_micros: u64) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_micros);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, micros: u64) {
        self.total_latency_micros.fetch_add(micros, Ordering::Relaxed);
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn avg_latency_micros(&self) -> f64 {
        let ops = self.operations.load(Ordering::Relaxed);
        if ops == 0 {
            0.0
        } else {
            self.total_latency_micros.load(Ordering::Relaxed) as f64 / ops as f64
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.total_latency_micros.store(0, Ordering::Relaxed);
        self.operations.store(0, Ordering::Relaxed);
    }
}

/// Balance cache with per-wallet generations.
#[derive(Default)]
pub struct BalanceCache {
    entries: DashMap<(WalletId, String, u64), AmountMinor>,
    generations: DashMap<WalletId, u64>,
    metrics: CacheMetrics,
}

impl BalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_generation(&self, wallet_id: &WalletId) -> u64 {
        self.generations.get(wallet_id).map(|g| *g).unwrap_or(0)
    }

    /// Read the balance under the wallet's current generation.
    pub fn get(&self, wallet_id: &WalletId, token: &str) -> Option<AmountMinor> {
        let start = Instant::now();
        let generation = self.current_generation(wallet_id);
        let result = self
            .entries
            .get(&(wallet_id.clone(), token.to_string(), generation))
            .map(|v| *v);
        let elapsed = start.elapsed().as_micros() as u64;
        match result {
            Some(_) => self.metrics.record_hit(elapsed),
            None => self.metrics.record_miss(elapsed),
        }
        result
    }

    /// Write a balance tagged with an explicit generation. Writes carrying
    /// a stale generation are stored under the dead key and therefore
    /// invisible; they are not an error.
    pub fn set(&self, wallet_id: &WalletId, token: &str, amount: AmountMinor, generation: u64) {
        let start = Instant::now();
        self.entries
            .insert((wallet_id.clone(), token.to_string(), generation), amount);
        self.metrics.record_set(start.elapsed().as_micros() as u64);
    }

    /// Write under the wallet's current generation.
    pub fn set_current(&self, wallet_id: &WalletId, token: &str, amount: AmountMinor) {
        let generation = self.current_generation(wallet_id);
        self.set(wallet_id, token, amount, generation);
    }

    /// Bump the wallet's generation; all cached balances for it become
    /// unreadable. Returns the new generation.
    pub fn invalidate_wallet_balances(&self, wallet_id: &WalletId) -> u64 {
        let start = Instant::now();
        let mut generation = self.generations.entry(wallet_id.clone()).or_insert(0);
        *generation += 1;
        let new_generation = *generation;
        drop(generation);

        // Garbage-collect dead-generation entries for the wallet.
        self.entries
            .retain(|(w, _, g), _| w != wallet_id || *g >= new_generation);
        self.metrics.record_delete(start.elapsed().as_micros() as u64);
        tracing::debug!(wallet_id = %wallet_id, generation = new_generation, "balances invalidated");
        new_generation
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> WalletId {
        WalletId::from("w-1")
    }

    #[test]
    fn get_set_round_trip() {
        let cache = BalanceCache::new();
        assert_eq!(cache.get(&wallet(), "USDC"), None);
        cache.set_current(&wallet(), "USDC", 10_000);
        assert_eq!(cache.get(&wallet(), "USDC"), Some(10_000));
    }

    #[test]
    fn invalidation_hides_old_writes() {
        let cache = BalanceCache::new();
        cache.set_current(&wallet(), "USDC", 10_000);

        let old_generation = cache.current_generation(&wallet());
        let new_generation = cache.invalidate_wallet_balances(&wallet());
        assert_eq!(new_generation, old_generation + 1);

        // Nothing visible under the new generation.
        assert_eq!(cache.get(&wallet(), "USDC"), None);

        // A straggler write tagged with the old generation stays invisible.
        cache.set(&wallet(), "USDC", 999, old_generation);
        assert_eq!(cache.get(&wallet(), "USDC"), None);

        // A current write is visible again.
        cache.set(&wallet(), "USDC", 8_000, new_generation);
        assert_eq!(cache.get(&wallet(), "USDC"), Some(8_000));
    }

    #[test]
    fn wallets_are_independent() {
        let cache = BalanceCache::new();
        let other = WalletId::from("w-2");
        cache.set_current(&wallet(), "USDC", 1);
        cache.set_current(&other, "USDC", 2);

        cache.invalidate_wallet_balances(&wallet());
        assert_eq!(cache.get(&wallet(), "USDC"), None);
        assert_eq!(cache.get(&other, "USDC"), Some(2));
    }

    #[test]
    fn tokens_are_independent() {
        let cache = BalanceCache::new();
        cache.set_current(&wallet(), "USDC", 1);
        cache.set_current(&wallet(), "USDT", 2);
        assert_eq!(cache.get(&wallet(), "USDC"), Some(1));
        assert_eq!(cache.get(&wallet(), "USDT"), Some(2));
    }

    #[test]
    fn metrics_track_operations() {
        let cache = BalanceCache::new();
        cache.get(&wallet(), "USDC"); // miss
        cache.set_current(&wallet(), "USDC", 1);
        cache.get(&wallet(), "USDC"); // hit
        cache.get(&wallet(), "USDC"); // hit
        cache.invalidate_wallet_balances(&wallet());

        let metrics = cache.metrics();
        assert_eq!(metrics.hits(), 2);
        assert_eq!(metrics.misses(), 1);
        assert_eq!(metrics.sets(), 1);
        assert_eq!(metrics.deletes(), 1);
        assert!((metrics.hit_rate() - 2.0 / 3.0).abs() < 1e-9);

        metrics.reset();
        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.hit_rate(), 0.0);
    }
}
