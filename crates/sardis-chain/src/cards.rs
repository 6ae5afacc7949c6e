//! Card-issuing rail: a uniform provider interface with primary/fallback
//! routing.
//!
//! New card creation tries the primary issuer and falls back on failure.
//! Operations on an existing card route to the provider that owns it; when
//! ownership is unknown the router probes both providers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use sardis_types::{AmountMinor, WalletId};

use crate::error::ChainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    SingleUse,
    MultiUse,
    MerchantLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Inactive,
    Active,
    Frozen,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub wallet_id: WalletId,
    pub provider: String,
    pub provider_card_id: String,
    pub card_type: CardType,
    pub status: CardStatus,
    pub limit_per_tx: AmountMinor,
    pub limit_daily: AmountMinor,
    pub limit_monthly: AmountMinor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_merchant_id: Option<String>,
    pub balance_minor: AmountMinor,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardTransaction {
    pub provider_tx_id: String,
    pub provider_card_id: String,
    pub merchant_name: String,
    pub amount_minor: AmountMinor,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

/// Limit fields for `update_limits`; `None` leaves a limit unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct CardLimitUpdate {
    pub limit_per_tx: Option<AmountMinor>,
    pub limit_daily: Option<AmountMinor>,
    pub limit_monthly: Option<AmountMinor>,
}

/// Issuer interface. Lithic and Stripe Issuing adapters implement this in
/// the provider packages; the core sees only the contract.
#[async_trait]
pub trait CardProvider: Send + Sync {
    fn name(&self) -> &str;

    #[allow(clippy::too_many_arguments)]
    async fn create_card(
        &self,
        wallet_id: &WalletId,
        card_type: CardType,
        limit_per_tx: AmountMinor,
        limit_daily: AmountMinor,
        limit_monthly: AmountMinor,
        locked_merchant_id: Option<String>,
    ) -> Result<Card, ChainError>;

    async fn get_card(&self, provider_card_id: &str) -> Result<Option<Card>, ChainError>;

    async fn activate_card(&self, provider_card_id: &str) -> Result<Card, ChainError>;

    async fn freeze_card(&self, provider_card_id: &str) -> Result<Card, ChainError>;

    async fn unfreeze_card(&self, provider_card_id: &str) -> Result<Card, ChainError>;

    async fn cancel_card(&self, provider_card_id: &str) -> Result<Card, ChainError>;

    async fn update_limits(
        &self,
        provider_card_id: &str,
        update: CardLimitUpdate,
    ) -> Result<Card, ChainError>;

    async fn fund_card(
        &self,
        provider_card_id: &str,
        amount: AmountMinor,
    ) -> Result<Card, ChainError>;

    async fn list_transactions(
        &self,
        provider_card_id: &str,
        limit: usize,
    ) -> Result<Vec<CardTransaction>, ChainError>;
}

/// In-memory issuer for simulated mode and tests.
pub struct InMemoryCardProvider {
    name: String,
    fail_create: bool,
    cards: DashMap<String, Card>,
    counter: std::sync::atomic::AtomicU64,
}

impl InMemoryCardProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_create: false,
            cards: DashMap::new(),
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Make `create_card` fail, to exercise router fallback.
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    fn update_card(
        &self,
        provider_card_id: &str,
        f: impl FnOnce(&mut Card),
    ) -> Result<Card, ChainError> {
        let mut card = self
            .cards
            .get_mut(provider_card_id)
            .ok_or_else(|| ChainError::CardNotFound(provider_card_id.to_string()))?;
        f(&mut card);
        Ok(card.clone())
    }
}

#[async_trait]
impl CardProvider for InMemoryCardProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_card(
        &self,
        wallet_id: &WalletId,
        card_type: CardType,
        limit_per_tx: AmountMinor,
        limit_daily: AmountMinor,
        limit_monthly: AmountMinor,
        locked_merchant_id: Option<String>,
    ) -> Result<Card, ChainError> {
        if self.fail_create {
            return Err(ChainError::CardProvider {
                provider: self.name.clone(),
                message: "create failed".to_string(),
            });
        }
        let n = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        let card = Card {
            wallet_id: wallet_id.clone(),
            provider: self.name.clone(),
            provider_card_id: format!("{}_card_{n}", self.name),
            card_type,
            status: CardStatus::Inactive,
            limit_per_tx,
            limit_daily,
            limit_monthly,
            locked_merchant_id,
            balance_minor: 0,
            created_at: Utc::now(),
        };
        self.cards.insert(card.provider_card_id.clone(), card.clone());
        Ok(card)
    }

    async fn get_card(&self, provider_card_id: &str) -> Result<Option<Card>, ChainError> {
        Ok(self.cards.get(provider_card_id).map(|c| c.clone()))
    }

    async fn activate_card(&self, provider_card_id: &str) -> Result<Card, ChainError> {
        self.update_card(provider_card_id, |c| c.status = CardStatus::Active)
    }

    async fn freeze_card(&self, provider_card_id: &str) -> Result<Card, ChainError> {
        self.update_card(provider_card_id, |c| c.status = CardStatus::Frozen)
    }

    async fn unfreeze_card(&self, provider_card_id: &str) -> Result<Card, ChainError> {
        self.update_card(provider_card_id, |c| c.status = CardStatus::Active)
    }

    async fn cancel_card(&self, provider_card_id: &str) -> Result<Card, ChainError> {
        self.update_card(provider_card_id, |c| c.status = CardStatus::Cancelled)
    }

    async fn update_limits(
        &self,
        provider_card_id: &str,
        update: CardLimitUpdate,
    ) -> Result<Card, ChainError> {
        self.update_card(provider_card_id, |c| {
            if let Some(v) = update.limit_per_tx {
                c.limit_per_tx = v;
            }
            if let Some(v) = update.limit_daily {
                c.limit_daily = v;
            }
            if let Some(v) = update.limit_monthly {
                c.limit_monthly = v;
            }
        })
    }

    async fn fund_card(
        &self,
        provider_card_id: &str,
        amount: AmountMinor,
    ) -> Result<Card, ChainError> {
        self.update_card(provider_card_id, |c| {
            c.balance_minor = c.balance_minor.saturating_add(amount)
        })
    }

    async fn list_transactions(
        &self,
        _provider_card_id: &str,
        _limit: usize,
    ) -> Result<Vec<CardTransaction>, ChainError> {
        Ok(Vec::new())
    }
}

/// Routes card operations between a primary and a fallback issuer.
pub struct CardProviderRouter {
    primary: Arc<dyn CardProvider>,
    fallback: Arc<dyn CardProvider>,
    /// Cache of card id -> owning provider name, filled by creation and
    /// probing.
    ownership: DashMap<String, String>,
}

impl CardProviderRouter {
    pub fn new(primary: Arc<dyn CardProvider>, fallback: Arc<dyn CardProvider>) -> Self {
        Self { primary, fallback, ownership: DashMap::new() }
    }

    /// Create a card on the primary issuer, falling back on failure.
    pub async fn create_card(
        &self,
        wallet_id: &WalletId,
        card_type: CardType,
        limit_per_tx: AmountMinor,
        limit_daily: AmountMinor,
        limit_monthly: AmountMinor,
        locked_merchant_id: Option<String>,
    ) -> Result<Card, ChainError> {
        match self
            .primary
            .create_card(
                wallet_id,
                card_type,
                limit_per_tx,
                limit_daily,
                limit_monthly,
                locked_merchant_id.clone(),
            )
            .await
        {
            Ok(card) => {
                self.ownership
                    .insert(card.provider_card_id.clone(), self.primary.name().to_string());
                Ok(card)
            }
            Err(e) => {
                tracing::warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %e,
                    "primary card issuer failed, trying fallback"
                );
                let card = self
                    .fallback
                    .create_card(
                        wallet_id,
                        card_type,
                        limit_per_tx,
                        limit_daily,
                        limit_monthly,
                        locked_merchant_id,
                    )
                    .await?;
                self.ownership
                    .insert(card.provider_card_id.clone(), self.fallback.name().to_string());
                Ok(card)
            }
        }
    }

    /// Resolve a card, probing both providers when ownership is unknown.
    pub async fn get_card(&self, provider_card_id: &str) -> Result<Option<Card>, ChainError> {
        let provider = self.provider_for(provider_card_id).await?;
        match provider {
            Some(p) => p.get_card(provider_card_id).await,
            None => Ok(None),
        }
    }

    pub async fn activate_card(&self, provider_card_id: &str) -> Result<Card, ChainError> {
        self.owning_provider(provider_card_id)
            .await?
            .activate_card(provider_card_id)
            .await
    }

    pub async fn freeze_card(&self, provider_card_id: &str) -> Result<Card, ChainError> {
        self.owning_provider(provider_card_id)
            .await?
            .freeze_card(provider_card_id)
            .await
    }

    pub async fn unfreeze_card(&self, provider_card_id: &str) -> Result<Card, ChainError> {
        self.owning_provider(provider_card_id)
            .await?
            .unfreeze_card(provider_card_id)
            .await
    }

    pub async fn cancel_card(&self, provider_card_id: &str) -> Result<Card, ChainError> {
        self.owning_provider(provider_card_id)
            .await?
            .cancel_card(provider_card_id)
            .await
    }

    pub async fn update_limits(
        &self,
        provider_card_id: &str,
        update: CardLimitUpdate,
    ) -> Result<Card, ChainError> {
        self.owning_provider(provider_card_id)
            .await?
            .update_limits(provider_card_id, update)
            .await
    }

    pub async fn fund_card(
        &self,
        provider_card_id: &str,
        amount: AmountMinor,
    ) -> Result<Card, ChainError> {
        self.owning_provider(provider_card_id)
            .await?
            .fund_card(provider_card_id, amount)
            .await
    }

    pub async fn list_transactions(
        &self,
        provider_card_id: &str,
        limit: usize,
    ) -> Result<Vec<CardTransaction>, ChainError> {
        self.owning_provider(provider_card_id)
            .await?
            .list_transactions(provider_card_id, limit)
            .await
    }

    async fn owning_provider(
        &self,
        provider_card_id: &str,
    ) -> Result<Arc<dyn CardProvider>, ChainError> {
        self.provider_for(provider_card_id)
            .await?
            .ok_or_else(|| ChainError::CardNotFound(provider_card_id.to_string()))
    }

    async fn provider_for(
        &self,
        provider_card_id: &str,
    ) -> Result<Option<Arc<dyn CardProvider>>, ChainError> {
        if let Some(owner) = self.ownership.get(provider_card_id) {
            let provider = if *owner == self.primary.name() {
                Arc::clone(&self.primary)
            } else {
                Arc::clone(&self.fallback)
            };
            return Ok(Some(provider));
        }

        // Probe: primary first, then fallback.
        if self.primary.get_card(provider_card_id).await?.is_some() {
            self.ownership
                .insert(provider_card_id.to_string(), self.primary.name().to_string());
            return Ok(Some(Arc::clone(&self.primary)));
        }
        if self.fallback.get_card(provider_card_id).await?.is_some() {
            self.ownership
                .insert(provider_card_id.to_string(), self.fallback.name().to_string());
            return Ok(Some(Arc::clone(&self.fallback)));
        }
        Ok(None)
    }
}
