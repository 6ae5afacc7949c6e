//! Shared harness for settlement integration tests: an engine wired from
//! in-memory stores and simulated rails, plus signed AP2 bundle builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::Signer as _;
use parking_lot::Mutex;
use serde::Serialize;

use sardis_chain::{EvmRailAdapter, RailAdapter, SimulatedMpcSigner};
use sardis_compliance::{
    ComplianceGate, InMemoryAuditStore, KycStatus, StaticKycDirectory, StaticSanctionsList,
    TokenChainRuleProvider,
};
use sardis_ledger::{InMemoryLedgerStore, LedgerStore};
use sardis_mandate::mandates::signing_bytes;
use sardis_mandate::{
    CartMandate, Environment, InMemoryReplayCache, IntentMandate, LineItem, MandateEnvelope,
    MandateVerifier, PaymentMandate, VcProof, VerifierSettings,
};
use sardis_policy::{
    create_default_policy, ApprovalWorkflow, ConfidenceRouter, GroupPolicyEvaluator,
    InMemoryApprovalRepository, InMemoryGroupRepository, InMemoryGroupSpendingTracker,
    InMemoryPolicyStore, PolicyEvaluator, PolicyStore, SpendingPolicy, TrustLevel,
    VelocityLimiter, VelocityLimits,
};
use sardis_types::{AgentId, KyaLevel, WalletId};

use sardis_settlement::{
    BalanceCache, DeliveryTransport, EngineDeps, InMemoryAgentDirectory,
    InMemoryIdempotencyStore, InMemoryLockService, InMemoryWalletDirectory, SardisConfig,
    SettlementEngine, StaticBalanceSource, WalletBinding, WebhookDispatcher, WebhookSubscription,
};

pub const NOW: u64 = 1_700_000_000;
pub const SUBJECT: &str = "agent-001";
pub const MERCHANT: &str = "merchant.example.com";
pub const DESTINATION: &str = "0x1234567890123456789012345678901234567890";

/// Transport that records every delivery instead of posting it.
pub struct RecordingTransport {
    pub posts: Mutex<Vec<(String, Vec<u8>, Vec<(String, String)>)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self { posts: Mutex::new(Vec::new()) }
    }

    pub fn event_types(&self) -> Vec<String> {
        self.posts
            .lock()
            .iter()
            .map(|(_, _, headers)| {
                headers
                    .iter()
                    .find(|(name, _)| name == "X-Sardis-Event")
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .collect()
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    async fn post(
        &self,
        url: &str,
        body: &[u8],
        headers: &[(String, String)],
    ) -> Result<(u16, String), String> {
        self.posts
            .lock()
            .push((url.to_string(), body.to_vec(), headers.to_vec()));
        Ok((200, "ok".to_string()))
    }
}

pub struct TestSigner {
    pub key: ed25519_dalek::SigningKey,
    pub did: String,
}

impl TestSigner {
    pub fn new(did: &str) -> Self {
        Self {
            key: ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng),
            did: did.to_string(),
        }
    }

    pub fn verification_method(&self) -> String {
        format!("{}#ed25519:{}", self.did, hex::encode(self.key.verifying_key().to_bytes()))
    }

    pub fn sign_mandate<T: Serialize>(&self, mandate: &T) -> String {
        let bytes = signing_bytes(mandate).unwrap();
        hex::encode(self.key.sign(&bytes).to_bytes())
    }
}

pub fn envelope(
    id: &str,
    mandate_type: &str,
    subject: &str,
    signer: &TestSigner,
    expires_at: u64,
) -> MandateEnvelope {
    MandateEnvelope {
        mandate_id: id.into(),
        mandate_type: mandate_type.to_string(),
        issuer: signer.did.clone(),
        subject: subject.to_string(),
        domain: "example.com".to_string(),
        nonce: format!("nonce-{id}"),
        expires_at,
        proof: VcProof {
            verification_method: signer.verification_method(),
            created: "2026-01-01T00:00:00Z".to_string(),
            proof_value: String::new(),
            proof_purpose: "assertionMethod".to_string(),
        },
    }
}

/// Signed happy-path bundle with the literal values from the settlement
/// scenarios: cart 5000 + 500 tax, payment 5500 USDC on base.
pub fn signed_bundle(
    signer: &TestSigner,
    id_suffix: &str,
    now: u64,
) -> (IntentMandate, CartMandate, PaymentMandate) {
    let expires = now + 600;
    let mut intent = IntentMandate {
        envelope: envelope(&format!("intent-{id_suffix}"), "intent", SUBJECT, signer, expires),
        requested_amount: 10_000,
        merchant_domain: MERCHANT.to_string(),
        scope: "purchases".to_string(),
    };
    let mut cart = CartMandate {
        envelope: envelope(&format!("cart-{id_suffix}"), "cart", SUBJECT, signer, expires),
        line_items: vec![LineItem {
            sku: "sku-1".to_string(),
            description: "compute credits".to_string(),
            quantity: 1,
            unit_price_minor: 5_000,
        }],
        subtotal_minor: 5_000,
        taxes_minor: 500,
        currency: "USDC".to_string(),
        merchant_domain: MERCHANT.to_string(),
    };
    let mut payment = PaymentMandate {
        envelope: envelope(&format!("payment-{id_suffix}"), "payment", SUBJECT, signer, expires),
        purpose: "checkout".to_string(),
        amount_minor: 5_500,
        token: "USDC".to_string(),
        chain: "base".to_string(),
        destination: DESTINATION.to_string(),
        audit_hash: format!("audit-{id_suffix}"),
        ai_agent_presence: true,
        transaction_modality: "human_not_present".to_string(),
        merchant_domain: Some(MERCHANT.to_string()),
    };

    intent.envelope.proof.proof_value = signer.sign_mandate(&intent);
    cart.envelope.proof.proof_value = signer.sign_mandate(&cart);
    payment.envelope.proof.proof_value = signer.sign_mandate(&payment);
    (intent, cart, payment)
}

pub struct Harness {
    pub verifier: MandateVerifier,
    pub engine: SettlementEngine,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub policy_store: Arc<InMemoryPolicyStore>,
    pub policy: Arc<PolicyEvaluator>,
    pub approvals: Arc<ApprovalWorkflow>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub transport: Arc<RecordingTransport>,
    pub kyc: Arc<StaticKycDirectory>,
    pub sanctions: Arc<StaticSanctionsList>,
    pub agents: Arc<InMemoryAgentDirectory>,
}

impl Harness {
    /// Drain the webhook queue until no deliveries are due.
    pub async fn flush_webhooks(&self) {
        while self.webhooks.process_due().await > 0 {}
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_policy(create_default_policy(
            AgentId::from(SUBJECT),
            TrustLevel::Standard,
            NOW,
        ))
        .await
    }

    pub async fn with_policy(policy: SpendingPolicy) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();

        let replay = Arc::new(InMemoryReplayCache::new());
        let verifier = MandateVerifier::new(
            VerifierSettings {
                allowed_domains: vec!["example.com".to_string()],
                environment: Environment::Development,
            },
            replay,
        );

        let policy_store = Arc::new(InMemoryPolicyStore::new());
        policy_store.put(policy).await.unwrap();
        let policy_eval = Arc::new(PolicyEvaluator::new(
            Arc::clone(&policy_store) as Arc<dyn PolicyStore>,
            GroupPolicyEvaluator::new(
                Arc::new(InMemoryGroupRepository::new()),
                Arc::new(InMemoryGroupSpendingTracker::new()),
            ),
        ));

        let kyc = Arc::new(StaticKycDirectory::new());
        kyc.set(SUBJECT, KycStatus::Verified);
        let sanctions = Arc::new(StaticSanctionsList::new());
        let compliance = Arc::new(ComplianceGate::new(
            Arc::new(TokenChainRuleProvider::default()),
            sanctions.clone(),
            kyc.clone(),
            Arc::new(InMemoryAuditStore::new()),
        ));

        let approvals = Arc::new(ApprovalWorkflow::new(Arc::new(
            InMemoryApprovalRepository::new(),
        )));

        let ledger = Arc::new(InMemoryLedgerStore::new());
        let wallets = Arc::new(InMemoryWalletDirectory::new());
        wallets.bind(
            SUBJECT,
            "base",
            WalletBinding {
                wallet_id: WalletId::from("wallet-001"),
                address: "0x00000000000000000000000000000000000000aa".to_string(),
            },
        );

        let agents = Arc::new(InMemoryAgentDirectory::new());
        agents.set(SUBJECT, KyaLevel::Attested);

        let transport = Arc::new(RecordingTransport::new());
        let webhooks = Arc::new(WebhookDispatcher::new(
            transport.clone() as Arc<dyn DeliveryTransport>
        ));
        webhooks.subscribe(WebhookSubscription {
            endpoint_id: "test-endpoint".to_string(),
            url: "https://hooks.example.com/sardis".to_string(),
            secret: b"test-webhook-secret".to_vec(),
            events: Vec::new(),
            enabled: true,
        });

        let mut rails: HashMap<String, Arc<dyn RailAdapter>> = HashMap::new();
        rails.insert(
            "base".to_string(),
            Arc::new(
                EvmRailAdapter::simulated("base", Arc::new(SimulatedMpcSigner::new())).unwrap(),
            ),
        );

        let engine = SettlementEngine::new(EngineDeps {
            config: SardisConfig::simulated(vec!["example.com".to_string()]),
            policy: Arc::clone(&policy_eval),
            compliance,
            confidence: ConfidenceRouter::default(),
            approvals: Arc::clone(&approvals),
            velocity: Arc::new(VelocityLimiter::new(VelocityLimits::default())),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            locks: Arc::new(InMemoryLockService::new()),
            balances: Arc::new(BalanceCache::new()),
            balance_source: Arc::new(StaticBalanceSource::new()),
            wallets,
            agents: agents.clone(),
            rails,
            ledger: Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            webhooks: Arc::clone(&webhooks),
            manager_approvers: vec!["manager-1".to_string()],
            multisig_approvers: vec!["x".to_string(), "y".to_string(), "z".to_string()],
        })
        .with_receipt_polling(Duration::from_millis(1), 3);

        Self {
            verifier,
            engine,
            ledger,
            policy_store,
            policy: policy_eval,
            approvals,
            webhooks,
            transport,
            kyc,
            sanctions,
            agents,
        }
    }
}
