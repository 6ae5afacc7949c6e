//! The compliance gate: fail-closed preflight run before any settlement.
//!
//! Order: base rules, then sanctions on the destination, then KYC on the
//! agent subject. A base-rule denial skips the external screens. Any
//! provider error blocks the payment. Every outcome appends an audit entry
//! keyed by mandate id, and the audit id is returned to the caller.

use std::sync::Arc;

use chrono::Utc;

use sardis_types::{AuditId, MandateId, RejectReason};

use crate::audit::{AuditOutcome, ComplianceAuditEntry, ComplianceAuditStore};
use crate::error::ComplianceError;
use crate::providers::{
    BaseRuleProvider, KycProvider, KycStatus, PaymentContext, SanctionsProvider,
};

/// Preflight verdict.
#[derive(Debug, Clone)]
pub struct PreflightOutcome {
    pub allowed: bool,
    pub reason: Option<RejectReason>,
    pub rule_id: Option<String>,
    pub provider: Option<String>,
    /// Audit entry recording this verdict.
    pub audit_id: AuditId,
}

pub struct ComplianceGate {
    rules: Arc<dyn BaseRuleProvider>,
    sanctions: Arc<dyn SanctionsProvider>,
    kyc: Arc<dyn KycProvider>,
    audit: Arc<dyn ComplianceAuditStore>,
}

impl ComplianceGate {
    pub fn new(
        rules: Arc<dyn BaseRuleProvider>,
        sanctions: Arc<dyn SanctionsProvider>,
        kyc: Arc<dyn KycProvider>,
        audit: Arc<dyn ComplianceAuditStore>,
    ) -> Self {
        Self { rules, sanctions, kyc, audit }
    }

    /// Run the full preflight. Never returns `Err` for provider failures;
    /// those become blocked outcomes. `Err` is reserved for an audit store
    /// that cannot record the verdict, which is fatal.
    pub async fn preflight(
        &self,
        payment: &PaymentContext,
    ) -> Result<PreflightOutcome, ComplianceError> {
        // 1. Base rules (token/chain permissibility, tenant rules).
        match self.rules.check(payment).await {
            Ok(check) if !check.allowed => {
                tracing::info!(
                    mandate_id = %payment.mandate_id,
                    rule_id = ?check.rule_id,
                    "payment blocked by base rules"
                );
                return self
                    .record(
                        payment,
                        "base_rules",
                        AuditOutcome::Blocked,
                        check.rule_id.clone(),
                        None,
                        check.detail,
                        Some(RejectReason::ComplianceBlocked),
                    )
                    .await;
            }
            Ok(_) => {
                self.append(payment, "base_rules", AuditOutcome::Allowed, None, None, None)
                    .await?;
            }
            Err(e) => {
                tracing::error!(mandate_id = %payment.mandate_id, error = %e, "base rule provider failed");
                return self
                    .record(
                        payment,
                        "base_rules",
                        AuditOutcome::Error,
                        None,
                        None,
                        Some(e.to_string()),
                        Some(RejectReason::ComplianceBlocked),
                    )
                    .await;
            }
        }

        // 2. Sanctions screen on the destination. Hit or error both block.
        match self.sanctions.screen_address(&payment.destination).await {
            Ok(result) if result.hit => {
                tracing::warn!(
                    mandate_id = %payment.mandate_id,
                    destination = %payment.destination,
                    list = ?result.list_name,
                    "sanctions hit"
                );
                return self
                    .record(
                        payment,
                        "sanctions_screening",
                        AuditOutcome::Blocked,
                        Some("sanctions_screening".to_string()),
                        Some(self.sanctions.provider_name().to_string()),
                        result.list_name,
                        Some(RejectReason::SanctionsScreening),
                    )
                    .await;
            }
            Ok(_) => {
                self.append(
                    payment,
                    "sanctions_screening",
                    AuditOutcome::Allowed,
                    None,
                    Some(self.sanctions.provider_name().to_string()),
                    None,
                )
                .await?;
            }
            Err(e) => {
                tracing::error!(mandate_id = %payment.mandate_id, error = %e, "sanctions provider failed");
                return self
                    .record(
                        payment,
                        "sanctions_screening",
                        AuditOutcome::Error,
                        Some("sanctions_screening".to_string()),
                        Some(self.sanctions.provider_name().to_string()),
                        Some(e.to_string()),
                        Some(RejectReason::SanctionsScreening),
                    )
                    .await;
            }
        }

        // 3. KYC on the agent subject. Anything but Verified blocks.
        match self.kyc.verify_subject(&payment.subject).await {
            Ok(KycStatus::Verified) => {
                self.append(
                    payment,
                    "kyc_verification",
                    AuditOutcome::Allowed,
                    None,
                    Some(self.kyc.provider_name().to_string()),
                    None,
                )
                .await?;
            }
            Ok(status) => {
                tracing::info!(
                    mandate_id = %payment.mandate_id,
                    subject = %payment.subject,
                    status = ?status,
                    "subject not KYC-verified"
                );
                return self
                    .record(
                        payment,
                        "kyc_verification",
                        AuditOutcome::Blocked,
                        Some("kyc_verification".to_string()),
                        Some(self.kyc.provider_name().to_string()),
                        None,
                        Some(RejectReason::KycVerification),
                    )
                    .await;
            }
            Err(e) => {
                tracing::error!(mandate_id = %payment.mandate_id, error = %e, "kyc provider failed");
                return self
                    .record(
                        payment,
                        "kyc_verification",
                        AuditOutcome::Error,
                        Some("kyc_verification".to_string()),
                        Some(self.kyc.provider_name().to_string()),
                        Some(e.to_string()),
                        Some(RejectReason::KycVerification),
                    )
                    .await;
            }
        }

        // Clear: one summary entry records the pass.
        self.record(payment, "preflight", AuditOutcome::Allowed, None, None, None, None)
            .await
    }

    async fn append(
        &self,
        payment: &PaymentContext,
        check: &str,
        outcome: AuditOutcome,
        rule_id: Option<String>,
        provider: Option<String>,
        detail: Option<String>,
    ) -> Result<AuditId, ComplianceError> {
        let audit_id = AuditId::generate();
        self.audit
            .append(ComplianceAuditEntry {
                audit_id: audit_id.clone(),
                mandate_id: MandateId::from(payment.mandate_id.as_str()),
                check: check.to_string(),
                outcome,
                rule_id,
                provider,
                detail,
                created_at: Utc::now(),
            })
            .await?;
        Ok(audit_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        payment: &PaymentContext,
        check: &str,
        outcome: AuditOutcome,
        rule_id: Option<String>,
        provider: Option<String>,
        detail: Option<String>,
        reason: Option<RejectReason>,
    ) -> Result<PreflightOutcome, ComplianceError> {
        let audit_id = self
            .append(payment, check, outcome, rule_id.clone(), provider.clone(), detail)
            .await?;
        Ok(PreflightOutcome {
            allowed: reason.is_none(),
            reason,
            rule_id,
            provider,
            audit_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditStore;
    use crate::providers::{
        SanctionsResult, StaticKycDirectory, StaticSanctionsList, TokenChainRuleProvider,
    };
    use async_trait::async_trait;

    fn payment() -> PaymentContext {
        PaymentContext {
            mandate_id: "m-1".to_string(),
            subject: "agent-001".to_string(),
            destination: "0xDest".to_string(),
            token: "USDC".to_string(),
            chain: "base".to_string(),
            amount_minor: 5_500,
            tenant: None,
        }
    }

    struct Fixture {
        gate: ComplianceGate,
        audit: Arc<InMemoryAuditStore>,
        sanctions: Arc<StaticSanctionsList>,
        kyc: Arc<StaticKycDirectory>,
    }

    fn fixture() -> Fixture {
        let audit = Arc::new(InMemoryAuditStore::new());
        let sanctions = Arc::new(StaticSanctionsList::new());
        let kyc = Arc::new(StaticKycDirectory::new());
        kyc.set("agent-001", KycStatus::Verified);
        let gate = ComplianceGate::new(
            Arc::new(TokenChainRuleProvider::default()),
            sanctions.clone(),
            kyc.clone(),
            audit.clone(),
        );
        Fixture { gate, audit, sanctions, kyc }
    }

    #[tokio::test]
    async fn clean_payment_passes_with_audit_trail() {
        let f = fixture();
        let outcome = f.gate.preflight(&payment()).await.unwrap();
        assert!(outcome.allowed);
        assert!(outcome.reason.is_none());

        let entries = f.audit.entries_for(&MandateId::from("m-1")).await.unwrap();
        // base_rules, sanctions, kyc, summary.
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| e.outcome == AuditOutcome::Allowed));
    }

    #[tokio::test]
    async fn sanctioned_destination_blocks() {
        let f = fixture();
        f.sanctions.add("0xDest");
        let outcome = f.gate.preflight(&payment()).await.unwrap();
        assert!(!outcome.allowed);
        assert_eq!(outcome.reason, Some(RejectReason::SanctionsScreening));
        assert_eq!(outcome.rule_id.as_deref(), Some("sanctions_screening"));
        assert_eq!(outcome.provider.as_deref(), Some("elliptic"));
    }

    #[tokio::test]
    async fn unverified_subject_blocks() {
        let f = fixture();
        f.kyc.set("agent-001", KycStatus::Pending);
        let outcome = f.gate.preflight(&payment()).await.unwrap();
        assert_eq!(outcome.reason, Some(RejectReason::KycVerification));
        assert_eq!(outcome.provider.as_deref(), Some("persona"));
    }

    #[tokio::test]
    async fn base_rule_denial_skips_external_screens() {
        let audit = Arc::new(InMemoryAuditStore::new());
        let gate = ComplianceGate::new(
            Arc::new(TokenChainRuleProvider {
                allowed_tokens: vec!["USDT".to_string()],
                ..Default::default()
            }),
            Arc::new(StaticSanctionsList::new()),
            Arc::new(StaticKycDirectory::new()),
            audit.clone(),
        );
        let outcome = gate.preflight(&payment()).await.unwrap();
        assert_eq!(outcome.reason, Some(RejectReason::ComplianceBlocked));
        assert_eq!(outcome.rule_id.as_deref(), Some("token_not_permitted"));

        let entries = audit.entries_for(&MandateId::from("m-1")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].check, "base_rules");
    }

    #[tokio::test]
    async fn sanctions_provider_error_fails_closed() {
        struct ExplodingSanctions;
        #[async_trait]
        impl SanctionsProvider for ExplodingSanctions {
            fn provider_name(&self) -> &'static str {
                "elliptic"
            }
            async fn screen_address(&self, _: &str) -> Result<SanctionsResult, ComplianceError> {
                Err(ComplianceError::SanctionsProvider("api timeout".to_string()))
            }
        }

        let kyc = Arc::new(StaticKycDirectory::new());
        kyc.set("agent-001", KycStatus::Verified);
        let gate = ComplianceGate::new(
            Arc::new(TokenChainRuleProvider::default()),
            Arc::new(ExplodingSanctions),
            kyc,
            Arc::new(InMemoryAuditStore::new()),
        );

        let outcome = gate.preflight(&payment()).await.unwrap();
        assert!(!outcome.allowed);
        // The reason string contains "sanction".
        assert!(outcome.reason.unwrap().as_str().contains("sanction"));
    }

    #[tokio::test]
    async fn kyc_provider_error_fails_closed() {
        struct ExplodingKyc;
        #[async_trait]
        impl KycProvider for ExplodingKyc {
            fn provider_name(&self) -> &'static str {
                "persona"
            }
            async fn verify_subject(&self, _: &str) -> Result<KycStatus, ComplianceError> {
                Err(ComplianceError::KycProvider("500".to_string()))
            }
        }

        let gate = ComplianceGate::new(
            Arc::new(TokenChainRuleProvider::default()),
            Arc::new(StaticSanctionsList::new()),
            Arc::new(ExplodingKyc),
            Arc::new(InMemoryAuditStore::new()),
        );
        let outcome = gate.preflight(&payment()).await.unwrap();
        assert_eq!(outcome.reason, Some(RejectReason::KycVerification));
    }
}
