//! The stable domain-rejection code surface.
//!
//! Every string here is part of the external contract and is never
//! reformatted. Verifiers and the policy engine return these as data rather
//! than as errors; transient and fatal failures use the per-crate error
//! enums instead.

use serde::{Deserialize, Serialize};

/// Domain rejection codes surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RejectReason {
    // Mandate verification (C3)
    InvalidPayload,
    MandateExpired,
    DomainNotAuthorized,
    SignatureInvalid,
    SignatureMalformed,
    ReplayDetected,
    SubjectMismatch,
    PaymentMissingMerchantDomain,
    MerchantDomainMismatch,
    PaymentExceedsCartTotal,
    PaymentAgentPresenceRequired,
    PaymentInvalidModality,
    IntentInvalidType,
    CartInvalidType,
    PaymentInvalidType,

    // Policy (C4)
    PolicyNotFound,
    ScopeNotAllowed,
    PerTransactionLimit,
    TotalLimitExceeded,
    TimeWindowLimit,
    MerchantDenied,
    MerchantNotAllowlisted,
    MerchantCapExceeded,

    // Group policy (C4 step 7)
    GroupMerchantBlocked,
    GroupCategoryBlocked,
    GroupMerchantNotAllowed,
    GroupCategoryNotAllowed,
    GroupPerTransactionLimit,
    GroupDailyLimit,
    GroupMonthlyLimit,
    GroupTotalLimit,
    GroupPolicyError,
    GroupSpendingLookupError,

    // Compliance (C5)
    ComplianceBlocked,
    SanctionsScreening,
    KycVerification,

    // Idempotency / locking (C8, C9)
    IdempotencyConflict,
    IdempotencyInProgress,
    WalletBusy,

    // Velocity (C6)
    VelocityLimitMinute,
    VelocityLimitHour,
    VelocityLimitDay,

    // Settlement (C10)
    SettlementTimeout,

    // x402 (C3 variant)
    X402ChallengeExpired,
    X402NonceMismatch,
    X402AmountMismatch,
    X402PaymentIdMismatch,
    X402SignatureInvalid,
    X402VersionUnsupported,
}

impl RejectReason {
    /// The stable wire string for this rejection.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidPayload => "invalid_payload",
            RejectReason::MandateExpired => "mandate_expired",
            RejectReason::DomainNotAuthorized => "domain_not_authorized",
            RejectReason::SignatureInvalid => "signature_invalid",
            RejectReason::SignatureMalformed => "signature_malformed",
            RejectReason::ReplayDetected => "replay_detected",
            RejectReason::SubjectMismatch => "subject_mismatch",
            RejectReason::PaymentMissingMerchantDomain => "payment_missing_merchant_domain",
            RejectReason::MerchantDomainMismatch => "merchant_domain_mismatch",
            RejectReason::PaymentExceedsCartTotal => "payment_exceeds_cart_total",
            RejectReason::PaymentAgentPresenceRequired => "payment_agent_presence_required",
            RejectReason::PaymentInvalidModality => "payment_invalid_modality",
            RejectReason::IntentInvalidType => "intent_invalid_type",
            RejectReason::CartInvalidType => "cart_invalid_type",
            RejectReason::PaymentInvalidType => "payment_invalid_type",
            RejectReason::PolicyNotFound => "policy_not_found",
            RejectReason::ScopeNotAllowed => "scope_not_allowed",
            RejectReason::PerTransactionLimit => "per_transaction_limit",
            RejectReason::TotalLimitExceeded => "total_limit_exceeded",
            RejectReason::TimeWindowLimit => "time_window_limit",
            RejectReason::MerchantDenied => "merchant_denied",
            RejectReason::MerchantNotAllowlisted => "merchant_not_allowlisted",
            RejectReason::MerchantCapExceeded => "merchant_cap_exceeded",
            RejectReason::GroupMerchantBlocked => "group_merchant_blocked",
            RejectReason::GroupCategoryBlocked => "group_category_blocked",
            RejectReason::GroupMerchantNotAllowed => "group_merchant_not_allowed",
            RejectReason::GroupCategoryNotAllowed => "group_category_not_allowed",
            RejectReason::GroupPerTransactionLimit => "group_per_transaction_limit",
            RejectReason::GroupDailyLimit => "group_daily_limit",
            RejectReason::GroupMonthlyLimit => "group_monthly_limit",
            RejectReason::GroupTotalLimit => "group_total_limit",
            RejectReason::GroupPolicyError => "group_policy_error",
            RejectReason::GroupSpendingLookupError => "group_spending_lookup_error",
            RejectReason::ComplianceBlocked => "compliance_blocked",
            RejectReason::SanctionsScreening => "sanctions_screening",
            RejectReason::KycVerification => "kyc_verification",
            RejectReason::IdempotencyConflict => "idempotency_conflict",
            RejectReason::IdempotencyInProgress => "idempotency_in_progress",
            RejectReason::WalletBusy => "wallet_busy",
            RejectReason::VelocityLimitMinute => "velocity_limit_minute",
            RejectReason::VelocityLimitHour => "velocity_limit_hour",
            RejectReason::VelocityLimitDay => "velocity_limit_day",
            RejectReason::SettlementTimeout => "settlement_timeout",
            RejectReason::X402ChallengeExpired => "x402_challenge_expired",
            RejectReason::X402NonceMismatch => "x402_nonce_mismatch",
            RejectReason::X402AmountMismatch => "x402_amount_mismatch",
            RejectReason::X402PaymentIdMismatch => "x402_payment_id_mismatch",
            RejectReason::X402SignatureInvalid => "x402_signature_invalid",
            RejectReason::X402VersionUnsupported => "x402_version_unsupported",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RejectReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RejectReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RejectReason::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown reject reason: {s}")))
    }
}

impl RejectReason {
    /// Parse a stable wire string back into the enum.
    pub fn parse(s: &str) -> Option<Self> {
        use RejectReason::*;
        let reason = match s {
            "invalid_payload" => InvalidPayload,
            "mandate_expired" => MandateExpired,
            "domain_not_authorized" => DomainNotAuthorized,
            "signature_invalid" => SignatureInvalid,
            "signature_malformed" => SignatureMalformed,
            "replay_detected" => ReplayDetected,
            "subject_mismatch" => SubjectMismatch,
            "payment_missing_merchant_domain" => PaymentMissingMerchantDomain,
            "merchant_domain_mismatch" => MerchantDomainMismatch,
            "payment_exceeds_cart_total" => PaymentExceedsCartTotal,
            "payment_agent_presence_required" => PaymentAgentPresenceRequired,
            "payment_invalid_modality" => PaymentInvalidModality,
            "intent_invalid_type" => IntentInvalidType,
            "cart_invalid_type" => CartInvalidType,
            "payment_invalid_type" => PaymentInvalidType,
            "policy_not_found" => PolicyNotFound,
            "scope_not_allowed" => ScopeNotAllowed,
            "per_transaction_limit" => PerTransactionLimit,
            "total_limit_exceeded" => TotalLimitExceeded,
            "time_window_limit" => TimeWindowLimit,
            "merchant_denied" => MerchantDenied,
            "merchant_not_allowlisted" => MerchantNotAllowlisted,
            "merchant_cap_exceeded" => MerchantCapExceeded,
            "group_merchant_blocked" => GroupMerchantBlocked,
            "group_category_blocked" => GroupCategoryBlocked,
            "group_merchant_not_allowed" => GroupMerchantNotAllowed,
            "group_category_not_allowed" => GroupCategoryNotAllowed,
            "group_per_transaction_limit" => GroupPerTransactionLimit,
            "group_daily_limit" => GroupDailyLimit,
            "group_monthly_limit" => GroupMonthlyLimit,
            "group_total_limit" => GroupTotalLimit,
            "group_policy_error" => GroupPolicyError,
            "group_spending_lookup_error" => GroupSpendingLookupError,
            "compliance_blocked" => ComplianceBlocked,
            "sanctions_screening" => SanctionsScreening,
            "kyc_verification" => KycVerification,
            "idempotency_conflict" => IdempotencyConflict,
            "idempotency_in_progress" => IdempotencyInProgress,
            "wallet_busy" => WalletBusy,
            "velocity_limit_minute" => VelocityLimitMinute,
            "velocity_limit_hour" => VelocityLimitHour,
            "velocity_limit_day" => VelocityLimitDay,
            "settlement_timeout" => SettlementTimeout,
            "x402_challenge_expired" => X402ChallengeExpired,
            "x402_nonce_mismatch" => X402NonceMismatch,
            "x402_amount_mismatch" => X402AmountMismatch,
            "x402_payment_id_mismatch" => X402PaymentIdMismatch,
            "x402_signature_invalid" => X402SignatureInvalid,
            "x402_version_unsupported" => X402VersionUnsupported,
            _ => return None,
        };
        Some(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_are_stable() {
        assert_eq!(RejectReason::PaymentExceedsCartTotal.as_str(), "payment_exceeds_cart_total");
        assert_eq!(RejectReason::GroupDailyLimit.as_str(), "group_daily_limit");
        assert_eq!(RejectReason::X402NonceMismatch.as_str(), "x402_nonce_mismatch");
    }

    #[test]
    fn parse_roundtrips_every_code() {
        for reason in [
            RejectReason::InvalidPayload,
            RejectReason::MandateExpired,
            RejectReason::TimeWindowLimit,
            RejectReason::MerchantCapExceeded,
            RejectReason::GroupTotalLimit,
            RejectReason::SanctionsScreening,
            RejectReason::IdempotencyConflict,
            RejectReason::WalletBusy,
            RejectReason::VelocityLimitDay,
            RejectReason::X402VersionUnsupported,
        ] {
            assert_eq!(RejectReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(RejectReason::parse("not_a_code"), None);
    }

    #[test]
    fn serializes_as_bare_string() {
        let json = serde_json::to_string(&RejectReason::ReplayDetected).unwrap();
        assert_eq!(json, "\"replay_detected\"");
    }
}
