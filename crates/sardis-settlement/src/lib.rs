//! Settlement orchestration for the Sardis payment core.
//!
//! The [`SettlementEngine`] takes a verified AP2 mandate chain (or, via
//! [`X402Settler`], a verified x402 payload), enforces compliance and
//! policy, routes by confidence, serializes per wallet, dispatches to a
//! rail, and records the ledger entry. The supporting pieces live in their
//! own modules:
//!
//! - [`idempotency`] — exactly-once execution per `(operation, key)`
//! - [`lock`] — per-wallet distributed lock with jittered retry
//! - [`balance`] — generation-tagged balance cache with metrics
//! - [`webhook`] — signed, retried webhook delivery
//! - [`config`] — `SARDIS_*` environment configuration
//! - [`metrics`] — Prometheus counters and histograms

pub mod balance;
pub mod config;
pub mod engine;
pub mod error;
pub mod funding_flow;
pub mod idempotency;
pub mod lock;
pub mod metrics;
pub mod sweeper;
pub mod webhook;
pub mod x402_settlement;

pub use balance::{BalanceCache, CacheMetrics};
pub use config::{ConfigError, SardisConfig};
pub use engine::{
    AgentDirectory, BalanceSource, EngineDeps, InMemoryAgentDirectory, InMemoryWalletDirectory,
    SettlementEngine, SettlementOutcome, StaticBalanceSource, WalletBinding, WalletDirectory,
};
pub use error::SettlementError;
pub use funding_flow::{fund_wallet_idempotent, FundingOutcome, FUNDING_TTL_SECS};
pub use idempotency::{
    run_idempotent, ClaimOutcome, IdempotencyError, IdempotencyRecord, IdempotencyStatus,
    IdempotencyStore, InMemoryIdempotencyStore, SqliteIdempotencyStore,
};
pub use lock::{acquire_with_retry, DistributedLock, InMemoryLockService, LockError};
pub use sweeper::{spawn_sweepers, SweeperConfig, SweeperHandles};
pub use webhook::{
    compute_signature, constant_time_eq, verify_signature, DeliveryAttempt, DeliveryStatus,
    DeliveryTransport,
    HttpDeliveryTransport, WebhookDelivery, WebhookDispatcher, WebhookEvent, WebhookSubscription,
    EVENT_HEADER, MAX_ATTEMPTS, SIGNATURE_HEADER,
};
pub use x402_settlement::{
    InMemoryX402SettlementStore, SqliteX402SettlementStore, X402SettleOutcome, X402Settlement,
    X402SettlementStatus, X402SettlementStore, X402Settler, X402VerifyOutcome,
};
