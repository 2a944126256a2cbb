//! The single authority for contract status. Webhooks and sweeps both end
//! up here; everything in this module except `engine` is a pure function
//! over provider signals, so the transition rules are testable without a
//! database or network.

pub mod engine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contracts in `active` with at least this many overdue pending bills are
/// frozen; frozen contracts below it are reactivated.
pub const OVERDUE_FREEZE_THRESHOLD: usize = 3;

/// Business lifecycle of a contract. `cancelled` is terminal: nothing in
/// this module produces a transition out of it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    Active,
    Frozen,
    Cancelled,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Frozen => "frozen",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "frozen" => Some(Self::Frozen),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Mirror of the billing provider's view of a contract. Never authoritative
/// on its own; recomputed from live provider state on every pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
    Rejected,
    Refunded,
    Unknown,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Refunded => "refunded",
            Self::Unknown => "unknown",
        }
    }
}

/// Mirror of the signature provider's view of the contract envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Pending,
    PartiallySigned,
    Signed,
    Cancelled,
    Refused,
    Expired,
}

impl SignatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PartiallySigned => "partially_signed",
            Self::Signed => "signed",
            Self::Cancelled => "cancelled",
            Self::Refused => "refused",
            Self::Expired => "expired",
        }
    }

    /// Best-effort mirror from an envelope's own status field, used when
    /// the linkage backfill acquires a document key outside any event.
    pub fn from_envelope_status(status: &str) -> Self {
        match status {
            "closed" => Self::Signed,
            "canceled" | "cancelled" => Self::Cancelled,
            "expired" => Self::Expired,
            _ => Self::Pending,
        }
    }
}

/// Billing-webhook event type to mirror value. One entry per event the
/// provider delivers; anything else is ignored upstream.
pub fn billing_event_mirror(event_type: &str) -> Option<BillingStatus> {
    match event_type {
        "bill_created" => Some(BillingStatus::Pending),
        "bill_paid" => Some(BillingStatus::Paid),
        "bill_canceled" => Some(BillingStatus::Cancelled),
        "charge_created" => Some(BillingStatus::Pending),
        "charge_paid" => Some(BillingStatus::Paid),
        "charge_rejected" => Some(BillingStatus::Rejected),
        "charge_refunded" => Some(BillingStatus::Refunded),
        "subscription_created" => Some(BillingStatus::Pending),
        "subscription_activated" => Some(BillingStatus::Paid),
        "subscription_canceled" => Some(BillingStatus::Cancelled),
        "subscription_reactivated" => Some(BillingStatus::Paid),
        "payment_profile_created" => Some(BillingStatus::Pending),
        _ => None,
    }
}

/// Lifecycle effect of a billing event. Only a subscription-level
/// cancellation touches the lifecycle; bill/charge events move the mirror
/// alone.
pub fn billing_event_lifecycle(event_type: &str) -> Option<ContractStatus> {
    match event_type {
        "subscription_canceled" => Some(ContractStatus::Cancelled),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureOutcome {
    pub mirror: SignatureStatus,
    pub lifecycle: Option<ContractStatus>,
}

/// Signature-webhook transition table. `document_closed` is whether the
/// envelope's overall document status is "closed" at event time.
pub fn signature_transition(event_name: &str, document_closed: bool) -> Option<SignatureOutcome> {
    match event_name {
        "auto_close" => Some(SignatureOutcome {
            mirror: SignatureStatus::Signed,
            lifecycle: Some(ContractStatus::Active),
        }),
        "sign" if document_closed => Some(SignatureOutcome {
            mirror: SignatureStatus::Signed,
            lifecycle: Some(ContractStatus::Active),
        }),
        "sign" => Some(SignatureOutcome {
            mirror: SignatureStatus::PartiallySigned,
            lifecycle: None,
        }),
        "cancel" => Some(SignatureOutcome {
            mirror: SignatureStatus::Cancelled,
            lifecycle: Some(ContractStatus::Cancelled),
        }),
        "deadline" => Some(SignatureOutcome {
            mirror: SignatureStatus::Expired,
            lifecycle: None,
        }),
        "refuse" => Some(SignatureOutcome {
            mirror: SignatureStatus::Refused,
            lifecycle: Some(ContractStatus::Cancelled),
        }),
        _ => None,
    }
}

/// Parsed-down view of a bill, enough for the status ladder and the
/// overdue count.
#[derive(Debug, Clone)]
pub struct BillView {
    pub status: String,
    pub due_at: Option<DateTime<Utc>>,
}

impl BillView {
    pub fn is_pending(&self) -> bool {
        self.status == "pending"
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.due_at.map(|due| due < now).unwrap_or(false)
    }
}

/// Result of polling a subscription's bills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingSnapshot {
    pub status: BillingStatus,
    pub overdue_count: usize,
    /// Days late of the oldest overdue bill; zero unless status is Overdue.
    pub oldest_overdue_days: i64,
}

/// Sweep-driven billing status ladder, evaluated top to bottom, first
/// branch wins.
pub fn billing_snapshot(
    subscription_status: &str,
    bills: &[BillView],
    now: DateTime<Utc>,
) -> BillingSnapshot {
    if subscription_status == "canceled" || subscription_status == "cancelled" {
        return BillingSnapshot {
            status: BillingStatus::Cancelled,
            overdue_count: 0,
            oldest_overdue_days: 0,
        };
    }

    if bills.is_empty() {
        return BillingSnapshot {
            status: BillingStatus::Pending,
            overdue_count: 0,
            oldest_overdue_days: 0,
        };
    }

    let overdue: Vec<&BillView> = bills.iter().filter(|b| b.is_overdue(now)).collect();
    if !overdue.is_empty() {
        let oldest_due = overdue.iter().filter_map(|b| b.due_at).min();
        let days_late = oldest_due
            .map(|due| (now.date_naive() - due.date_naive()).num_days())
            .unwrap_or(0);
        return BillingSnapshot {
            status: BillingStatus::Overdue,
            overdue_count: overdue.len(),
            oldest_overdue_days: days_late,
        };
    }

    if bills.iter().any(|b| b.is_pending()) {
        return BillingSnapshot {
            status: BillingStatus::Pending,
            overdue_count: 0,
            oldest_overdue_days: 0,
        };
    }

    BillingSnapshot {
        status: BillingStatus::Paid,
        overdue_count: 0,
        oldest_overdue_days: 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeChange {
    Freeze,
    Unfreeze,
}

/// Freeze/unfreeze rule. At most one change per contract per pass; `None`
/// means the contract keeps its current status.
pub fn freeze_decision(current: ContractStatus, overdue_count: usize) -> Option<FreezeChange> {
    match current {
        ContractStatus::Active if overdue_count >= OVERDUE_FREEZE_THRESHOLD => {
            Some(FreezeChange::Freeze)
        }
        ContractStatus::Frozen if overdue_count < OVERDUE_FREEZE_THRESHOLD => {
            Some(FreezeChange::Unfreeze)
        }
        _ => None,
    }
}

/// Guard applied to every proposed lifecycle change: cancellation is
/// terminal and always wins over any later signal.
pub fn apply_lifecycle(current: ContractStatus, proposed: ContractStatus) -> ContractStatus {
    if current == ContractStatus::Cancelled {
        ContractStatus::Cancelled
    } else {
        proposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn bill(status: &str, due_offset_days: Option<i64>) -> BillView {
        BillView {
            status: status.to_string(),
            due_at: due_offset_days.map(|d| now() + Duration::days(d)),
        }
    }

    #[test]
    fn billing_event_table_is_complete() {
        let cases = [
            ("bill_created", BillingStatus::Pending),
            ("bill_paid", BillingStatus::Paid),
            ("bill_canceled", BillingStatus::Cancelled),
            ("charge_created", BillingStatus::Pending),
            ("charge_paid", BillingStatus::Paid),
            ("charge_rejected", BillingStatus::Rejected),
            ("charge_refunded", BillingStatus::Refunded),
            ("subscription_created", BillingStatus::Pending),
            ("subscription_activated", BillingStatus::Paid),
            ("subscription_canceled", BillingStatus::Cancelled),
            ("subscription_reactivated", BillingStatus::Paid),
            ("payment_profile_created", BillingStatus::Pending),
        ];
        for (event, expected) in cases {
            assert_eq!(billing_event_mirror(event), Some(expected), "{event}");
        }
        assert_eq!(billing_event_mirror("test_event"), None);
    }

    #[test]
    fn only_subscription_cancellation_touches_lifecycle() {
        assert_eq!(
            billing_event_lifecycle("subscription_canceled"),
            Some(ContractStatus::Cancelled)
        );
        assert_eq!(billing_event_lifecycle("bill_canceled"), None);
        assert_eq!(billing_event_lifecycle("charge_paid"), None);
    }

    #[test]
    fn sign_on_closed_document_activates() {
        let outcome = signature_transition("sign", true).unwrap();
        assert_eq!(outcome.mirror, SignatureStatus::Signed);
        assert_eq!(outcome.lifecycle, Some(ContractStatus::Active));
    }

    #[test]
    fn sign_on_open_document_is_partial_only() {
        let outcome = signature_transition("sign", false).unwrap();
        assert_eq!(outcome.mirror, SignatureStatus::PartiallySigned);
        assert_eq!(outcome.lifecycle, None);
    }

    #[test]
    fn deadline_expires_mirror_without_lifecycle_change() {
        let outcome = signature_transition("deadline", false).unwrap();
        assert_eq!(outcome.mirror, SignatureStatus::Expired);
        assert_eq!(outcome.lifecycle, None);
    }

    #[test]
    fn refuse_and_cancel_are_cancellations() {
        for event in ["refuse", "cancel"] {
            let outcome = signature_transition(event, false).unwrap();
            assert_eq!(outcome.lifecycle, Some(ContractStatus::Cancelled), "{event}");
        }
        assert_eq!(
            signature_transition("refuse", false).unwrap().mirror,
            SignatureStatus::Refused
        );
    }

    #[test]
    fn unknown_signature_event_is_none() {
        assert!(signature_transition("open", false).is_none());
    }

    #[test]
    fn ladder_cancelled_subscription_wins() {
        let bills = vec![bill("pending", Some(-10))];
        let snap = billing_snapshot("canceled", &bills, now());
        assert_eq!(snap.status, BillingStatus::Cancelled);
    }

    #[test]
    fn ladder_zero_bills_is_pending() {
        let snap = billing_snapshot("active", &[], now());
        assert_eq!(snap.status, BillingStatus::Pending);
    }

    #[test]
    fn ladder_overdue_reports_days_late() {
        let bills = vec![bill("pending", Some(-1)), bill("paid", Some(-30))];
        let snap = billing_snapshot("active", &bills, now());
        assert_eq!(snap.status, BillingStatus::Overdue);
        assert_eq!(snap.overdue_count, 1);
        assert_eq!(snap.oldest_overdue_days, 1);
    }

    #[test]
    fn ladder_days_late_uses_oldest_overdue_bill() {
        let bills = vec![bill("pending", Some(-3)), bill("pending", Some(-14))];
        let snap = billing_snapshot("active", &bills, now());
        assert_eq!(snap.overdue_count, 2);
        assert_eq!(snap.oldest_overdue_days, 14);
    }

    #[test]
    fn ladder_pending_not_due_is_pending() {
        let bills = vec![bill("pending", Some(5)), bill("paid", Some(-30))];
        let snap = billing_snapshot("active", &bills, now());
        assert_eq!(snap.status, BillingStatus::Pending);
    }

    #[test]
    fn ladder_all_paid_is_paid() {
        let bills = vec![bill("paid", Some(-30)), bill("paid", Some(-60))];
        let snap = billing_snapshot("active", &bills, now());
        assert_eq!(snap.status, BillingStatus::Paid);
    }

    #[test]
    fn freeze_threshold_is_inclusive_at_three() {
        assert_eq!(freeze_decision(ContractStatus::Active, 2), None);
        assert_eq!(
            freeze_decision(ContractStatus::Active, 3),
            Some(FreezeChange::Freeze)
        );
        assert_eq!(
            freeze_decision(ContractStatus::Active, 4),
            Some(FreezeChange::Freeze)
        );
    }

    #[test]
    fn unfreeze_below_threshold() {
        assert_eq!(
            freeze_decision(ContractStatus::Frozen, 2),
            Some(FreezeChange::Unfreeze)
        );
        assert_eq!(freeze_decision(ContractStatus::Frozen, 3), None);
    }

    #[test]
    fn freeze_and_unfreeze_are_mutually_exclusive() {
        // A single decision function means one contract can never appear
        // in both lists of a pass.
        for count in 0..6 {
            let active = freeze_decision(ContractStatus::Active, count);
            let frozen = freeze_decision(ContractStatus::Frozen, count);
            assert_ne!(active, Some(FreezeChange::Unfreeze));
            assert_ne!(frozen, Some(FreezeChange::Freeze));
        }
    }

    #[test]
    fn cancelled_contracts_never_freeze() {
        assert_eq!(freeze_decision(ContractStatus::Cancelled, 5), None);
        assert_eq!(freeze_decision(ContractStatus::Draft, 5), None);
    }

    #[test]
    fn cancellation_is_terminal() {
        assert_eq!(
            apply_lifecycle(ContractStatus::Cancelled, ContractStatus::Active),
            ContractStatus::Cancelled
        );
        assert_eq!(
            apply_lifecycle(ContractStatus::Active, ContractStatus::Cancelled),
            ContractStatus::Cancelled
        );
        assert_eq!(
            apply_lifecycle(ContractStatus::Frozen, ContractStatus::Active),
            ContractStatus::Active
        );
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            ContractStatus::Draft,
            ContractStatus::Active,
            ContractStatus::Frozen,
            ContractStatus::Cancelled,
        ] {
            assert_eq!(ContractStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ContractStatus::parse("archived"), None);
    }
}
