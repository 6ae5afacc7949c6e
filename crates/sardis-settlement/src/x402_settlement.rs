//! x402 settlement: verification separated from on-chain settlement.
//!
//! A verified payload produces a settlement record in `verified`; settling
//! moves it through `settling` to `settled` (or `failed`), reusing the rail
//! adapters through an internal synthetic transfer request. The synthetic
//! shape never leaves the process; the wire contract is the x402 header
//! set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use sardis_chain::{RailAdapter, TransactionRequest, TxStatus};
use sardis_ledger::{LedgerStore, NewLedgerEntry};
use sardis_mandate::x402::{
    serialize_payment_response_header, verify_payload, SignatureCheck, X402Challenge, X402Payload,
};
use sardis_types::{MandateId, RejectReason, TxId};

use crate::engine::WalletBinding;
use crate::error::SettlementError;
use crate::webhook::{events, WebhookDispatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum X402SettlementStatus {
    Verified,
    Settling,
    Settled,
    Failed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X402Settlement {
    pub payment_id: String,
    pub status: X402SettlementStatus,
    pub challenge: X402Challenge,
    pub payload: X402Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait X402SettlementStore: Send + Sync {
    async fn save(&self, settlement: X402Settlement) -> Result<(), SettlementError>;
    async fn get(&self, payment_id: &str) -> Result<Option<X402Settlement>, SettlementError>;
    async fn update(&self, settlement: X402Settlement) -> Result<(), SettlementError>;
}

#[derive(Default)]
pub struct InMemoryX402SettlementStore {
    settlements: DashMap<String, X402Settlement>,
}

impl InMemoryX402SettlementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl X402SettlementStore for InMemoryX402SettlementStore {
    async fn save(&self, settlement: X402Settlement) -> Result<(), SettlementError> {
        self.settlements
            .insert(settlement.payment_id.clone(), settlement);
        Ok(())
    }

    async fn get(&self, payment_id: &str) -> Result<Option<X402Settlement>, SettlementError> {
        Ok(self.settlements.get(payment_id).map(|s| s.clone()))
    }

    async fn update(&self, settlement: X402Settlement) -> Result<(), SettlementError> {
        self.settlements
            .insert(settlement.payment_id.clone(), settlement);
        Ok(())
    }
}

/// SQLite-backed settlement store; challenge and payload are stored as
/// JSON columns.
pub struct SqliteX402SettlementStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteX402SettlementStore {
    pub fn open(path: &str) -> Result<Self, SettlementError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| SettlementError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS x402_settlements (
                payment_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                challenge TEXT NOT NULL,
                payload TEXT NOT NULL,
                tx_hash TEXT,
                settled_at TEXT,
                error TEXT
            );
            PRAGMA journal_mode=WAL;",
        )
        .map_err(|e| SettlementError::Storage(e.to_string()))?;
        Ok(Self { conn: std::sync::Mutex::new(conn) })
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, SettlementError> {
        self.conn
            .lock()
            .map_err(|_| SettlementError::Storage("x402 store mutex poisoned".to_string()))
    }

    fn upsert(&self, settlement: &X402Settlement) -> Result<(), SettlementError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO x402_settlements
             (payment_id, status, challenge, payload, tx_hash, settled_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(payment_id) DO UPDATE SET
                status = ?2, challenge = ?3, payload = ?4,
                tx_hash = ?5, settled_at = ?6, error = ?7",
            rusqlite::params![
                settlement.payment_id,
                serde_json::to_string(&settlement.status)?.trim_matches('"'),
                serde_json::to_string(&settlement.challenge)?,
                serde_json::to_string(&settlement.payload)?,
                settlement.tx_hash,
                settlement.settled_at.map(|t| t.to_rfc3339()),
                settlement.error,
            ],
        )
        .map_err(|e| SettlementError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl X402SettlementStore for SqliteX402SettlementStore {
    async fn save(&self, settlement: X402Settlement) -> Result<(), SettlementError> {
        self.upsert(&settlement)
    }

    async fn get(&self, payment_id: &str) -> Result<Option<X402Settlement>, SettlementError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT status, challenge, payload, tx_hash, settled_at, error
                 FROM x402_settlements WHERE payment_id = ?1",
            )
            .map_err(|e| SettlementError::Storage(e.to_string()))?;
        let row = stmt.query_row([payment_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        });
        let (status, challenge, payload, tx_hash, settled_at, error) = match row {
            Ok(columns) => columns,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(SettlementError::Storage(e.to_string())),
        };

        Ok(Some(X402Settlement {
            payment_id: payment_id.to_string(),
            status: serde_json::from_value(serde_json::Value::String(status))?,
            challenge: serde_json::from_str(&challenge)?,
            payload: serde_json::from_str(&payload)?,
            tx_hash,
            settled_at: settled_at
                .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc)),
            error,
        }))
    }

    async fn update(&self, settlement: X402Settlement) -> Result<(), SettlementError> {
        self.upsert(&settlement)
    }
}

/// Outcome of a verify call.
#[derive(Debug, Clone)]
pub struct X402VerifyOutcome {
    pub settlement: X402Settlement,
    pub reason: Option<RejectReason>,
}

/// Result handed back for the `PAYMENT-RESPONSE` header.
#[derive(Debug, Clone)]
pub struct X402SettleOutcome {
    pub settlement: X402Settlement,
    /// base64(JSON) settlement data for the response header, present on
    /// success.
    pub payment_response_header: Option<String>,
}

/// Verifies x402 payloads and settles them over the configured rails from
/// the facilitator's custodial wallet.
pub struct X402Settler {
    store: Arc<dyn X402SettlementStore>,
    rails: HashMap<String, Arc<dyn RailAdapter>>,
    facilitator_wallet: WalletBinding,
    ledger: Arc<dyn LedgerStore>,
    webhooks: Arc<WebhookDispatcher>,
}

impl X402Settler {
    pub fn new(
        store: Arc<dyn X402SettlementStore>,
        rails: HashMap<String, Arc<dyn RailAdapter>>,
        facilitator_wallet: WalletBinding,
        ledger: Arc<dyn LedgerStore>,
        webhooks: Arc<WebhookDispatcher>,
    ) -> Self {
        Self { store, rails, facilitator_wallet, ledger, webhooks }
    }

    /// Verify a payload against its challenge. Never touches a rail; the
    /// stored settlement is `verified` or `failed`.
    pub async fn verify(
        &self,
        challenge: &X402Challenge,
        payload: &X402Payload,
        signature_check: Option<SignatureCheck<'_>>,
    ) -> Result<X402VerifyOutcome, SettlementError> {
        let verification = verify_payload(payload, challenge, None, signature_check);

        let settlement = X402Settlement {
            payment_id: payload.payment_id.clone(),
            status: if verification.accepted {
                X402SettlementStatus::Verified
            } else {
                X402SettlementStatus::Failed
            },
            challenge: challenge.clone(),
            payload: payload.clone(),
            tx_hash: None,
            settled_at: None,
            error: verification.reason.clone().map(|r| r.as_str().to_string()),
        };
        self.store.save(settlement.clone()).await?;

        if let Some(reason) = &verification.reason {
            tracing::info!(
                payment_id = %payload.payment_id,
                reason = %reason,
                "x402 payload rejected"
            );
        }
        Ok(X402VerifyOutcome { settlement, reason: verification.reason })
    }

    /// Settle a verified payment on-chain.
    pub async fn settle(&self, payment_id: &str) -> Result<X402SettleOutcome, SettlementError> {
        let mut settlement = self
            .store
            .get(payment_id)
            .await?
            .ok_or_else(|| SettlementError::Storage(format!("settlement not found: {payment_id}")))?;

        if settlement.status != X402SettlementStatus::Verified {
            return Err(SettlementError::Storage(format!(
                "cannot settle: settlement must be verified, got {:?}",
                settlement.status
            )));
        }

        settlement.status = X402SettlementStatus::Settling;
        self.store.update(settlement.clone()).await?;

        match self.submit(&settlement).await {
            Ok((tx_hash, ledger_entry_id)) => {
                settlement.status = X402SettlementStatus::Settled;
                settlement.tx_hash = Some(tx_hash.clone());
                settlement.settled_at = Some(Utc::now());
                self.store.update(settlement.clone()).await?;

                let response_data = json!({
                    "payment_id": settlement.payment_id,
                    "tx_hash": tx_hash,
                    "network": settlement.challenge.network,
                    "amount": settlement.challenge.amount,
                    "ledger_entry_id": ledger_entry_id,
                    "settled_at": settlement.settled_at,
                });
                self.webhooks.emit(
                    events::PAYMENT_SUCCEEDED,
                    json!({
                        "payment_id": settlement.payment_id,
                        "tx_hash": tx_hash,
                        "protocol": "x402",
                    }),
                );
                tracing::info!(
                    payment_id = %settlement.payment_id,
                    tx = %tx_hash,
                    "x402 payment settled"
                );

                Ok(X402SettleOutcome {
                    settlement,
                    payment_response_header: Some(serialize_payment_response_header(
                        &response_data,
                    )),
                })
            }
            Err(e) => {
                settlement.status = X402SettlementStatus::Failed;
                settlement.error = Some(e.to_string());
                self.store.update(settlement.clone()).await?;
                self.webhooks.emit(
                    events::PAYMENT_FAILED,
                    json!({
                        "payment_id": settlement.payment_id,
                        "protocol": "x402",
                        "reason": e.to_string(),
                    }),
                );
                Ok(X402SettleOutcome { settlement, payment_response_header: None })
            }
        }
    }

    pub async fn check_settlement(
        &self,
        payment_id: &str,
    ) -> Result<Option<X402Settlement>, SettlementError> {
        self.store.get(payment_id).await
    }

    /// Submit the transfer via the rail for the challenge's network and
    /// record the ledger entry. The synthetic request reuses the standard
    /// dispatcher shape; it is internal only.
    async fn submit(
        &self,
        settlement: &X402Settlement,
    ) -> Result<(String, TxId), SettlementError> {
        let challenge = &settlement.challenge;
        let rail = self
            .rails
            .get(&challenge.network)
            .ok_or_else(|| SettlementError::NoRailForChain(challenge.network.clone()))?;

        let amount_minor: u64 = challenge
            .amount
            .parse()
            .map_err(|_| SettlementError::Storage(format!("bad amount {}", challenge.amount)))?;

        let request = TransactionRequest {
            wallet_id: self.facilitator_wallet.wallet_id.clone(),
            from_address: self.facilitator_wallet.address.clone(),
            chain: challenge.network.clone(),
            token: challenge.currency.clone(),
            destination: challenge.payee_address.clone(),
            amount_minor,
            memo: Some(settlement.payment_id.clone()),
        };
        let submitted = rail.submit(&request).await?;

        let entry = self
            .ledger
            .append(NewLedgerEntry {
                tx_id: TxId::generate(),
                mandate_id: MandateId::from(format!("x402_{}", settlement.payment_id).as_str()),
                from_wallet: self.facilitator_wallet.wallet_id.clone(),
                to_wallet: challenge.payee_address.clone(),
                amount_minor,
                currency: challenge.currency.clone(),
                chain: Some(challenge.network.clone()),
                chain_tx_hash: Some(submitted.tx_hash.clone()),
                created_at: Utc::now(),
            })
            .await?;

        if let Some(receipt) = rail.get_receipt(&submitted.tx_hash).await? {
            if receipt.status == TxStatus::Confirmed {
                self.ledger
                    .mark_confirmed(
                        &entry.tx_id,
                        &submitted.tx_hash,
                        receipt.block_number.unwrap_or_default(),
                        receipt.gas_used,
                    )
                    .await?;
            }
        }

        Ok((submitted.tx_hash, entry.tx_id))
    }
}
