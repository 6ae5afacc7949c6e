//! The settlement engine: orchestrates a verified payment from lock
//! acquisition through rail submission to ledger entry and webhooks.
//!
//! Failure semantics: everything before rail submission is free of side
//! effects and safe to retry under the idempotency record; after
//! submission a ledger row exists and reconciliation consults the rail for
//! authoritative state. Per-wallet ordering comes from the distributed
//! lock; spend accounting happens only on confirmed settlements.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sardis_chain::{RailAdapter, TransactionRequest, TxStatus};
use sardis_compliance::{ComplianceGate, PaymentContext};
use sardis_ledger::{LedgerStore, NewLedgerEntry};
use sardis_mandate::MandateChain;
use sardis_policy::{
    ApprovalParams, ApprovalStatus, ApprovalWorkflow, BehavioralMonitor, ConfidenceLevel,
    ConfidenceRouter, HistoryEntry, PolicyEvaluator, ScoredTransaction, SensitivityLevel,
    SpendRequest, Urgency, VelocityLimiter,
};
use sardis_types::{
    AgentId, AmountMinor, ApprovalId, KyaLevel, MandateId, Receipt, ReceiptStatus, RejectReason,
    TxId, WalletId,
};

use crate::balance::BalanceCache;
use crate::config::SardisConfig;
use crate::error::SettlementError;
use crate::idempotency::{run_idempotent, IdempotencyStore};
use crate::lock::{acquire_with_retry, DistributedLock};
use crate::metrics;
use crate::webhook::{events, WebhookDispatcher};

/// Idempotency TTL for settlement records.
const SETTLE_TTL_SECS: u64 = 24 * 3_600;

/// How long a dispatch waits for a contended wallet lock.
const LOCK_RETRY_BUDGET: Duration = Duration::from_secs(10);

/// A wallet bound to an agent on a specific chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBinding {
    pub wallet_id: WalletId,
    pub address: String,
}

/// Resolves the custodial wallet an agent settles from.
#[async_trait]
pub trait WalletDirectory: Send + Sync {
    async fn wallet_for(
        &self,
        subject: &str,
        chain: &str,
    ) -> Result<Option<WalletBinding>, SettlementError>;
}

#[derive(Default)]
pub struct InMemoryWalletDirectory {
    bindings: DashMap<(String, String), WalletBinding>,
}

impl InMemoryWalletDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, subject: &str, chain: &str, binding: WalletBinding) {
        self.bindings
            .insert((subject.to_string(), chain.to_string()), binding);
    }
}

#[async_trait]
impl WalletDirectory for InMemoryWalletDirectory {
    async fn wallet_for(
        &self,
        subject: &str,
        chain: &str,
    ) -> Result<Option<WalletBinding>, SettlementError> {
        Ok(self
            .bindings
            .get(&(subject.to_string(), chain.to_string()))
            .map(|b| b.clone()))
    }
}

/// Authoritative balance reads when the cache is cold.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance_of(
        &self,
        address: &str,
        token: &str,
        chain: &str,
    ) -> Result<AmountMinor, SettlementError>;
}

/// Fixed balances for simulated mode and tests.
pub struct StaticBalanceSource {
    balances: DashMap<(String, String), AmountMinor>,
    pub default_balance: AmountMinor,
}

impl Default for StaticBalanceSource {
    fn default() -> Self {
        Self { balances: DashMap::new(), default_balance: u64::MAX / 2 }
    }
}

impl StaticBalanceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: &str, token: &str, amount: AmountMinor) {
        self.balances
            .insert((address.to_string(), token.to_string()), amount);
    }
}

#[async_trait]
impl BalanceSource for StaticBalanceSource {
    async fn balance_of(
        &self,
        address: &str,
        token: &str,
        _chain: &str,
    ) -> Result<AmountMinor, SettlementError> {
        Ok(self
            .balances
            .get(&(address.to_string(), token.to_string()))
            .map(|b| *b)
            .unwrap_or(self.default_balance))
    }
}

/// KYA lookups for confidence scoring.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn kya_level(&self, subject: &str) -> Result<KyaLevel, SettlementError>;
}

#[derive(Default)]
pub struct InMemoryAgentDirectory {
    levels: DashMap<String, KyaLevel>,
}

impl InMemoryAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, subject: &str, level: KyaLevel) {
        self.levels.insert(subject.to_string(), level);
    }
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn kya_level(&self, subject: &str) -> Result<KyaLevel, SettlementError> {
        Ok(self.levels.get(subject).map(|l| *l).unwrap_or(KyaLevel::None))
    }
}

/// Terminal result of a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Settled {
        receipt: Receipt,
        ledger_entry_id: TxId,
    },
    /// Domain rejection: nothing was submitted.
    Rejected {
        reason: RejectReason,
    },
    /// Confidence routing demands sign-off; settlement is suspended.
    PendingApproval {
        approval_id: ApprovalId,
    },
    /// The approval was rejected, cancelled, or expired.
    ApprovalDenied {
        approval_id: ApprovalId,
        status: ApprovalStatus,
    },
    /// The score fell below every approval tier; the request must be
    /// rewritten by a human.
    RewriteRequired {
        score: f64,
    },
    /// The rail reported a failed transaction; a failed ledger row exists.
    Failed {
        reason: String,
        tx_hash: Option<String>,
    },
}

impl SettlementOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            SettlementOutcome::Settled { .. } => "settled",
            SettlementOutcome::Rejected { .. } => "rejected",
            SettlementOutcome::PendingApproval { .. } => "pending_approval",
            SettlementOutcome::ApprovalDenied { .. } => "approval_denied",
            SettlementOutcome::RewriteRequired { .. } => "rewrite_required",
            SettlementOutcome::Failed { .. } => "failed",
        }
    }
}

/// Everything the engine composes over.
pub struct EngineDeps {
    pub config: SardisConfig,
    pub policy: Arc<PolicyEvaluator>,
    pub compliance: Arc<ComplianceGate>,
    pub confidence: ConfidenceRouter,
    pub approvals: Arc<ApprovalWorkflow>,
    pub velocity: Arc<VelocityLimiter>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub locks: Arc<dyn DistributedLock>,
    pub balances: Arc<BalanceCache>,
    pub balance_source: Arc<dyn BalanceSource>,
    pub wallets: Arc<dyn WalletDirectory>,
    pub agents: Arc<dyn AgentDirectory>,
    /// Rail adapters keyed by chain name.
    pub rails: HashMap<String, Arc<dyn RailAdapter>>,
    pub ledger: Arc<dyn LedgerStore>,
    pub webhooks: Arc<WebhookDispatcher>,
    /// Approvers assigned per tier.
    pub manager_approvers: Vec<String>,
    pub multisig_approvers: Vec<String>,
}

pub struct SettlementEngine {
    deps: EngineDeps,
    monitors: DashMap<String, Arc<BehavioralMonitor>>,
    history: DashMap<String, Vec<HistoryEntry>>,
    receipt_poll_interval: Duration,
    receipt_poll_attempts: u32,
}

impl SettlementEngine {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            deps,
            monitors: DashMap::new(),
            history: DashMap::new(),
            receipt_poll_interval: Duration::from_millis(500),
            receipt_poll_attempts: 60,
        }
    }

    pub fn with_receipt_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.receipt_poll_interval = interval;
        self.receipt_poll_attempts = attempts;
        self
    }

    /// Dispatch a verified AP2 mandate chain. Retries with the same
    /// mandate id and payload return the stored outcome.
    pub async fn dispatch_payment(
        &self,
        chain: &MandateChain,
    ) -> Result<SettlementOutcome, SettlementError> {
        let idem_key = chain.payment.envelope.mandate_id.to_string();
        let payload = serde_json::to_value(chain)?;
        self.dispatch_with_key(&idem_key, &payload, chain).await
    }

    async fn dispatch_with_key(
        &self,
        idem_key: &str,
        payload: &Value,
        chain: &MandateChain,
    ) -> Result<SettlementOutcome, SettlementError> {
        let start = std::time::Instant::now();
        let now = unix_now();

        let result = run_idempotent(
            self.deps.idempotency.as_ref(),
            "settle",
            idem_key,
            payload,
            SETTLE_TTL_SECS,
            now,
            || async {
                let outcome = self.settle_guarded(idem_key, chain).await?;
                serde_json::to_value(&outcome).map_err(SettlementError::from)
            },
        )
        .await;

        let outcome = match result {
            Ok(Ok(value)) => {
                let outcome: SettlementOutcome = serde_json::from_value(value)?;
                // A suspended settlement must be re-runnable under the same
                // key once the approval resolves, so the record is
                // downgraded instead of staying completed.
                if matches!(outcome, SettlementOutcome::PendingApproval { .. }) {
                    self.deps
                        .idempotency
                        .fail("settle", idem_key)
                        .await
                        .map_err(|e| SettlementError::Idempotency(e.to_string()))?;
                }
                Ok(outcome)
            }
            Ok(Err(e)) => Err(e),
            Err(idem_err) => match idem_err.reject_reason() {
                Some(reason) => Ok(SettlementOutcome::Rejected { reason }),
                None => Err(SettlementError::Idempotency(idem_err.to_string())),
            },
        };

        if let Ok(ref outcome) = outcome {
            let label = outcome.metric_label();
            metrics::SETTLE_REQUESTS.with_label_values(&[label]).inc();
            metrics::SETTLE_LATENCY
                .with_label_values(&[label])
                .observe(start.elapsed().as_secs_f64());
        }
        outcome
    }

    /// Acquire the wallet lock, run the settlement under the wall-clock
    /// budget, and always release.
    async fn settle_guarded(
        &self,
        idem_key: &str,
        chain: &MandateChain,
    ) -> Result<SettlementOutcome, SettlementError> {
        let payment = &chain.payment;
        let subject = chain.subject().to_string();

        let Some(binding) = self
            .deps
            .wallets
            .wallet_for(&subject, &payment.chain)
            .await?
        else {
            return Err(SettlementError::WalletNotFound {
                agent: subject,
                chain: payment.chain.clone(),
            });
        };

        let resource = format!("wallet:{}", binding.wallet_id);
        let owner = format!("settle:{}", uuid::Uuid::new_v4().simple());
        let acquired = acquire_with_retry(
            self.deps.locks.as_ref(),
            &resource,
            self.deps.config.lock_ttl,
            &owner,
            LOCK_RETRY_BUDGET,
        )
        .await
        .map_err(|e| SettlementError::Lock(e.to_string()))?;
        if !acquired {
            tracing::warn!(wallet_id = %binding.wallet_id, "wallet lock contended, giving up");
            return Ok(SettlementOutcome::Rejected { reason: RejectReason::WalletBusy });
        }

        let result = tokio::time::timeout(
            self.deps.config.settlement_budget,
            self.settle_locked(idem_key, chain, &binding),
        )
        .await;

        if let Err(e) = self.deps.locks.release(&resource, &owner).await {
            tracing::error!(wallet_id = %binding.wallet_id, error = %e, "lock release failed");
        }

        match result {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                tracing::error!(
                    mandate_id = %payment.envelope.mandate_id,
                    "settlement exceeded wall-clock budget"
                );
                Ok(SettlementOutcome::Rejected { reason: RejectReason::SettlementTimeout })
            }
        }
    }

    async fn settle_locked(
        &self,
        idem_key: &str,
        chain: &MandateChain,
        binding: &WalletBinding,
    ) -> Result<SettlementOutcome, SettlementError> {
        let payment = &chain.payment;
        let cart = &chain.cart;
        let subject = chain.subject().to_string();
        let agent_id = AgentId::from(subject.as_str());
        let now = unix_now();

        // Velocity caps.
        if let Err(reason) = self.deps.velocity.check(&agent_id, now) {
            self.emit_block(payment, &reason);
            return Ok(SettlementOutcome::Rejected { reason });
        }

        // Balance: cache first, authoritative source on miss, written back
        // under the current generation.
        let available = match self.deps.balances.get(&binding.wallet_id, &payment.token) {
            Some(balance) => balance,
            None => {
                let balance = self
                    .deps
                    .balance_source
                    .balance_of(&binding.address, &payment.token, &payment.chain)
                    .await?;
                self.deps
                    .balances
                    .set_current(&binding.wallet_id, &payment.token, balance);
                balance
            }
        };
        if available < payment.amount_minor {
            return Err(SettlementError::InsufficientBalance {
                wallet: binding.wallet_id.to_string(),
                available,
                required: payment.amount_minor,
            });
        }

        // Compliance preflight, fail-closed.
        let preflight = self
            .deps
            .compliance
            .preflight(&PaymentContext {
                mandate_id: payment.envelope.mandate_id.to_string(),
                subject: subject.clone(),
                destination: payment.destination.clone(),
                token: payment.token.clone(),
                chain: payment.chain.clone(),
                amount_minor: payment.amount_minor,
                tenant: None,
            })
            .await?;
        if !preflight.allowed {
            let reason = preflight.reason.unwrap_or(RejectReason::ComplianceBlocked);
            self.emit_block(payment, &reason);
            return Ok(SettlementOutcome::Rejected { reason });
        }

        // Layered policy.
        let decision = self
            .deps
            .policy
            .evaluate(
                &agent_id,
                &SpendRequest {
                    amount: payment.amount_minor,
                    fee: 0,
                    merchant_id: Some(cart.merchant_domain.as_str()),
                    merchant_category: None,
                    scope: Some(chain.intent.scope.as_str()),
                },
                now,
            )
            .await?;
        if !decision.allowed {
            let reason = decision.reason.unwrap_or(RejectReason::PolicyNotFound);
            metrics::POLICY_DENIALS
                .with_label_values(&[reason.as_str()])
                .inc();
            self.emit_block(payment, &reason);
            return Ok(SettlementOutcome::Rejected { reason });
        }

        // Behavioral drift feeds alerts; it never blocks on its own.
        let monitor = self.monitor_for(&subject);
        let facts = sardis_policy::TransactionFacts {
            amount: payment.amount_minor,
            merchant: cart.merchant_domain.clone(),
            token: payment.token.clone(),
            chain: payment.chain.clone(),
            timestamp: now,
        };
        let alerts = monitor.check_transaction(&facts);
        if !alerts.is_empty() {
            for alert in &alerts {
                tracing::warn!(
                    agent = %subject,
                    anomaly = %alert.anomaly_type,
                    severity = ?alert.severity,
                    "behavioral drift alert"
                );
            }
            self.deps.webhooks.emit(
                events::RISK_ALERT,
                json!({
                    "agent_id": subject,
                    "mandate_id": payment.envelope.mandate_id,
                    "alerts": alerts,
                }),
            );
        }

        // Approval gate: resume an existing request for this key, or route
        // by confidence.
        match self.deps.approvals.find_by_idempotency_key(idem_key).await? {
            Some(existing) => match existing.status {
                ApprovalStatus::Approved => {
                    tracing::info!(approval_id = %existing.id, "resuming approved settlement");
                }
                ApprovalStatus::Pending => {
                    return Ok(SettlementOutcome::PendingApproval { approval_id: existing.id });
                }
                status => {
                    self.deps.webhooks.emit(
                        events::PAYMENT_FAILED,
                        json!({
                            "mandate_id": payment.envelope.mandate_id,
                            "approval_id": existing.id,
                            "approval_status": status,
                        }),
                    );
                    return Ok(SettlementOutcome::ApprovalDenied {
                        approval_id: existing.id,
                        status,
                    });
                }
            },
            None => {
                if let Some(outcome) = self
                    .route_by_confidence(idem_key, chain, &agent_id, &subject)
                    .await?
                {
                    return Ok(outcome);
                }
            }
        }

        // Rail submission.
        self.deps.webhooks.emit(
            events::PAYMENT_INITIATED,
            json!({
                "mandate_id": payment.envelope.mandate_id,
                "agent_id": subject,
                "chain": payment.chain,
                "amount_minor": payment.amount_minor,
            }),
        );

        let rail = self
            .deps
            .rails
            .get(&payment.chain)
            .ok_or_else(|| SettlementError::NoRailForChain(payment.chain.clone()))?;
        let request = TransactionRequest {
            wallet_id: binding.wallet_id.clone(),
            from_address: binding.address.clone(),
            chain: payment.chain.clone(),
            token: payment.token.clone(),
            destination: payment.destination.clone(),
            amount_minor: payment.amount_minor,
            memo: Some(payment.envelope.mandate_id.to_string()),
        };
        let submitted = rail.submit(&request).await?;

        // Ledger row exists from here on.
        let entry = self
            .deps
            .ledger
            .append(NewLedgerEntry {
                tx_id: TxId::generate(),
                mandate_id: MandateId::from(payment.envelope.mandate_id.as_str()),
                from_wallet: binding.wallet_id.clone(),
                to_wallet: payment.destination.clone(),
                amount_minor: payment.amount_minor,
                currency: payment.token.clone(),
                chain: Some(payment.chain.clone()),
                chain_tx_hash: Some(submitted.tx_hash.clone()),
                created_at: Utc::now(),
            })
            .await?;

        // Await finality per the chain's policy.
        let receipt = self.await_confirmation(rail.as_ref(), &submitted.tx_hash).await?;
        match receipt {
            Some(rail_receipt) if rail_receipt.status == TxStatus::Confirmed => {
                self.deps
                    .ledger
                    .mark_confirmed(
                        &entry.tx_id,
                        &submitted.tx_hash,
                        rail_receipt.block_number.unwrap_or_default(),
                        rail_receipt.gas_used,
                    )
                    .await?;
                self.deps.balances.invalidate_wallet_balances(&binding.wallet_id);

                // Spend accounting happens only on confirmation.
                self.deps
                    .policy
                    .record_spend(&agent_id, payment.amount_minor, now)
                    .await?;
                self.deps.velocity.record(&agent_id, now);
                monitor.record_transaction(&facts);
                self.push_history(&subject, payment.amount_minor, &cart.merchant_domain);

                let settled_at = Utc::now();
                let receipt = Receipt {
                    tx_hash: submitted.tx_hash.clone(),
                    chain: payment.chain.clone(),
                    block_number: rail_receipt.block_number,
                    status: ReceiptStatus::Confirmed,
                    audit_anchor: entry.audit_anchor.clone(),
                    gas_used: rail_receipt.gas_used,
                    settled_at,
                };

                self.deps.webhooks.emit(
                    events::PAYMENT_SUCCEEDED,
                    json!({
                        "mandate_id": payment.envelope.mandate_id,
                        "agent_id": subject,
                        "tx_hash": submitted.tx_hash,
                        "ledger_entry_id": entry.tx_id,
                        "amount_minor": payment.amount_minor,
                    }),
                );
                tracing::info!(
                    mandate_id = %payment.envelope.mandate_id,
                    tx = %submitted.tx_hash,
                    ledger_entry = %entry.tx_id,
                    "settlement confirmed"
                );

                Ok(SettlementOutcome::Settled { receipt, ledger_entry_id: entry.tx_id })
            }
            Some(rail_receipt) => {
                self.deps
                    .ledger
                    .mark_failed(&entry.tx_id, "transaction reverted")
                    .await?;
                self.deps.balances.invalidate_wallet_balances(&binding.wallet_id);
                self.deps.webhooks.emit(
                    events::PAYMENT_FAILED,
                    json!({
                        "mandate_id": payment.envelope.mandate_id,
                        "tx_hash": rail_receipt.tx_hash,
                        "reason": "transaction reverted",
                    }),
                );
                Ok(SettlementOutcome::Failed {
                    reason: "transaction reverted".to_string(),
                    tx_hash: Some(rail_receipt.tx_hash),
                })
            }
            None => {
                // Unconfirmed inside the budget: the pending ledger row
                // stays for reconciliation against the rail.
                tracing::warn!(
                    mandate_id = %payment.envelope.mandate_id,
                    tx = %submitted.tx_hash,
                    "confirmation not observed in time"
                );
                Ok(SettlementOutcome::Rejected { reason: RejectReason::SettlementTimeout })
            }
        }
    }

    /// Confidence routing. Returns `Some(outcome)` when settlement must
    /// suspend, `None` to proceed.
    async fn route_by_confidence(
        &self,
        idem_key: &str,
        chain: &MandateChain,
        agent_id: &AgentId,
        subject: &str,
    ) -> Result<Option<SettlementOutcome>, SettlementError> {
        let payment = &chain.payment;
        let Some(policy) = self.deps.policy.policy_for(agent_id).await? else {
            return Ok(Some(SettlementOutcome::Rejected {
                reason: RejectReason::PolicyNotFound,
            }));
        };
        let kya = self.deps.agents.kya_level(subject).await?;
        let history = self
            .history
            .get(subject)
            .map(|h| h.clone())
            .unwrap_or_default();

        let score = self.deps.confidence.calculate_confidence(
            agent_id,
            &ScoredTransaction {
                amount: payment.amount_minor,
                merchant_id: chain.cart.merchant_domain.clone(),
            },
            &policy,
            &history,
            kya,
            policy.violation_count,
        );

        match score.level {
            ConfidenceLevel::AutoApprove => Ok(None),
            ConfidenceLevel::HumanRewrite => {
                self.deps.webhooks.emit(
                    events::RISK_ALERT,
                    json!({
                        "mandate_id": payment.envelope.mandate_id,
                        "agent_id": subject,
                        "confidence": score.score,
                        "disposition": "human_rewrite",
                    }),
                );
                Ok(Some(SettlementOutcome::RewriteRequired { score: score.score }))
            }
            level => {
                let requirements = self.deps.confidence.requirements_for(level);
                let approvers = match level {
                    ConfidenceLevel::ManagerApproval => self.deps.manager_approvers.clone(),
                    _ => self.deps.multisig_approvers.clone(),
                };
                let request = self
                    .deps
                    .approvals
                    .create(ApprovalParams {
                        agent_id: agent_id.clone(),
                        amount_minor: payment.amount_minor,
                        description: format!(
                            "payment of {} {} to {}",
                            payment.amount_minor, payment.token, chain.cart.merchant_domain
                        ),
                        requested_by: "settlement-engine".to_string(),
                        urgency: Urgency::Normal,
                        approvers,
                        quorum: requirements.quorum,
                        timeout_secs: requirements.timeout_secs,
                        idempotency_key: idem_key.to_string(),
                    })
                    .await?;

                self.deps.webhooks.emit(
                    events::RISK_ALERT,
                    json!({
                        "mandate_id": payment.envelope.mandate_id,
                        "agent_id": subject,
                        "confidence": score.score,
                        "approval_id": request.id,
                        "disposition": format!("{level:?}"),
                    }),
                );
                tracing::info!(
                    approval_id = %request.id,
                    score = score.score,
                    level = ?level,
                    "settlement suspended pending approval"
                );
                Ok(Some(SettlementOutcome::PendingApproval { approval_id: request.id }))
            }
        }
    }

    async fn await_confirmation(
        &self,
        rail: &dyn RailAdapter,
        tx_hash: &str,
    ) -> Result<Option<sardis_chain::RailReceipt>, SettlementError> {
        for attempt in 0..self.receipt_poll_attempts {
            if let Some(receipt) = rail.get_receipt(tx_hash).await? {
                return Ok(Some(receipt));
            }
            if attempt + 1 < self.receipt_poll_attempts {
                tokio::time::sleep(self.receipt_poll_interval).await;
            }
        }
        Ok(None)
    }

    fn monitor_for(&self, subject: &str) -> Arc<BehavioralMonitor> {
        self.monitors
            .entry(subject.to_string())
            .or_insert_with(|| {
                Arc::new(BehavioralMonitor::new(
                    AgentId::from(subject),
                    SensitivityLevel::Normal,
                ))
            })
            .clone()
    }

    fn push_history(&self, subject: &str, amount: AmountMinor, merchant: &str) {
        let mut history = self.history.entry(subject.to_string()).or_default();
        history.push(HistoryEntry { amount, merchant_id: merchant.to_string() });
        if history.len() > 100 {
            history.remove(0);
        }
    }

    fn emit_block(&self, payment: &sardis_mandate::PaymentMandate, reason: &RejectReason) {
        self.deps.webhooks.emit(
            events::POLICY_BLOCKED,
            json!({
                "mandate_id": payment.envelope.mandate_id,
                "reason": reason,
                "chain": payment.chain,
                "amount_minor": payment.amount_minor,
            }),
        );
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
