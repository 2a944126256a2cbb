//! Applies transitions to contract rows. Every write here is a single-row
//! update built from freshly fetched provider state; re-applying the same
//! event is a no-op, which is what makes webhook replays and overlapping
//! sweeps safe.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{info, warn};
use uuid::Uuid;

use crate::lifecycle::{
    apply_lifecycle, BillingSnapshot, BillingStatus, ContractStatus, FreezeChange,
    SignatureOutcome,
};
use crate::shared::models::{Contract, ContractCancellation, ContractUpdate};
use crate::shared::schema::{contract_cancellations, contracts};

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub contract_id: Uuid,
    pub previous_status: ContractStatus,
    pub new_status: ContractStatus,
    /// Lifecycle status actually changed; gates notifications.
    pub status_changed: bool,
    /// A provider mirror actually changed; also gates notifications.
    pub mirror_changed: bool,
}

impl TransitionOutcome {
    fn unchanged(contract_id: Uuid, status: ContractStatus) -> Self {
        Self {
            contract_id,
            previous_status: status,
            new_status: status,
            status_changed: false,
            mirror_changed: false,
        }
    }
}

pub fn current_status(contract: &Contract) -> ContractStatus {
    ContractStatus::parse(&contract.status).unwrap_or_else(|| {
        warn!(
            "Contract {} has unrecognized status {:?}, treating as draft",
            contract.id, contract.status
        );
        ContractStatus::Draft
    })
}

/// Everything a billing webhook event can carry into a transition.
#[derive(Debug, Clone, Default)]
pub struct BillingEventUpdate {
    pub mirror: Option<BillingStatus>,
    pub lifecycle: Option<ContractStatus>,
    /// Paid installment number from a charge_paid event.
    pub installment: Option<i32>,
    pub total_installments: Option<i32>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Bill id seen in the payload; backfills missing linkage.
    pub bill_id: Option<i64>,
}

/// Diffs a billing event against the contract row. The update carries only
/// the fields that differ, so a replayed event diffs to an empty update and
/// an outcome with both change flags false.
pub fn billing_event_diff(
    contract: &Contract,
    event: &BillingEventUpdate,
) -> (ContractUpdate, TransitionOutcome) {
    let current = current_status(contract);
    let proposed = event
        .lifecycle
        .map(|p| apply_lifecycle(current, p))
        .unwrap_or(current);

    let mut update = ContractUpdate::default();
    let mut mirror_changed = false;

    if let Some(mirror) = event.mirror {
        if contract.billing_status != mirror.as_str() {
            update.billing_status = Some(mirror.as_str().to_string());
            mirror_changed = true;
        }
    }

    if proposed != current {
        update.status = Some(proposed.as_str().to_string());
    }

    if event.installment.is_some() && event.installment != contract.paid_installments {
        update.paid_installments = event.installment;
    }
    if event.total_installments.is_some()
        && event.total_installments != contract.total_installments
    {
        update.total_installments = event.total_installments;
    }
    if event.paid_at.is_some() && event.paid_at != contract.last_payment_at {
        update.last_payment_at = event.paid_at;
    }

    if contract.vindi_bill_id.is_none() {
        if let Some(bill_id) = event.bill_id {
            update.vindi_bill_id = Some(bill_id.to_string());
        }
    }

    let outcome = TransitionOutcome {
        contract_id: contract.id,
        previous_status: current,
        new_status: proposed,
        status_changed: proposed != current,
        mirror_changed,
    };
    (update, outcome)
}

pub fn apply_billing_event(
    conn: &mut PgConnection,
    contract: &Contract,
    event: BillingEventUpdate,
) -> QueryResult<TransitionOutcome> {
    let (update, outcome) = billing_event_diff(contract, &event);
    if update.is_empty() {
        return Ok(outcome);
    }

    persist(conn, contract.id, update)?;

    if outcome.status_changed && outcome.new_status == ContractStatus::Cancelled {
        ensure_cancellation_record(conn, contract.id, "subscription_canceled")?;
    }

    Ok(outcome)
}

/// Diffs a signature transition against the contract row; same replay
/// contract as [`billing_event_diff`].
pub fn signature_outcome_diff(
    contract: &Contract,
    outcome: SignatureOutcome,
) -> (ContractUpdate, TransitionOutcome) {
    let current = current_status(contract);
    let proposed = outcome
        .lifecycle
        .map(|p| apply_lifecycle(current, p))
        .unwrap_or(current);

    let mut update = ContractUpdate::default();
    let mut mirror_changed = false;

    if contract.signature_status != outcome.mirror.as_str() {
        update.signature_status = Some(outcome.mirror.as_str().to_string());
        mirror_changed = true;
    }
    if proposed != current {
        update.status = Some(proposed.as_str().to_string());
    }

    let outcome = TransitionOutcome {
        contract_id: contract.id,
        previous_status: current,
        new_status: proposed,
        status_changed: proposed != current,
        mirror_changed,
    };
    (update, outcome)
}

pub fn apply_signature_outcome(
    conn: &mut PgConnection,
    contract: &Contract,
    outcome: SignatureOutcome,
    reason: &str,
) -> QueryResult<TransitionOutcome> {
    let (update, outcome) = signature_outcome_diff(contract, outcome);
    if update.is_empty() {
        return Ok(outcome);
    }

    persist(conn, contract.id, update)?;

    if outcome.status_changed && outcome.new_status == ContractStatus::Cancelled {
        ensure_cancellation_record(conn, contract.id, reason)?;
    }

    Ok(outcome)
}

pub fn apply_freeze_change(
    conn: &mut PgConnection,
    contract: &Contract,
    change: FreezeChange,
) -> QueryResult<TransitionOutcome> {
    let current = current_status(contract);
    let proposed = match change {
        FreezeChange::Freeze => ContractStatus::Frozen,
        FreezeChange::Unfreeze => ContractStatus::Active,
    };
    let proposed = apply_lifecycle(current, proposed);

    if proposed == current {
        return Ok(TransitionOutcome::unchanged(contract.id, current));
    }

    let update = ContractUpdate {
        status: Some(proposed.as_str().to_string()),
        ..Default::default()
    };
    persist(conn, contract.id, update)?;

    info!(
        "Contract {} {} ({} -> {})",
        contract.id,
        match change {
            FreezeChange::Freeze => "frozen",
            FreezeChange::Unfreeze => "unfrozen",
        },
        current.as_str(),
        proposed.as_str()
    );

    Ok(TransitionOutcome {
        contract_id: contract.id,
        previous_status: current,
        new_status: proposed,
        status_changed: true,
        mirror_changed: false,
    })
}

/// Sweep-driven mirror refresh from a freshly polled subscription.
pub fn apply_billing_snapshot(
    conn: &mut PgConnection,
    contract: &Contract,
    snapshot: &BillingSnapshot,
) -> QueryResult<TransitionOutcome> {
    let current = current_status(contract);
    let proposed = if snapshot.status == BillingStatus::Cancelled {
        apply_lifecycle(current, ContractStatus::Cancelled)
    } else {
        current
    };

    let mut update = ContractUpdate::default();
    let mut mirror_changed = false;

    if contract.billing_status != snapshot.status.as_str() {
        update.billing_status = Some(snapshot.status.as_str().to_string());
        mirror_changed = true;
    }
    if proposed != current {
        update.status = Some(proposed.as_str().to_string());
    }

    if update.is_empty() {
        return Ok(TransitionOutcome::unchanged(contract.id, current));
    }

    persist(conn, contract.id, update)?;

    if proposed == ContractStatus::Cancelled && current != ContractStatus::Cancelled {
        ensure_cancellation_record(conn, contract.id, "subscription_canceled")?;
    }

    Ok(TransitionOutcome {
        contract_id: contract.id,
        previous_status: current,
        new_status: proposed,
        status_changed: proposed != current,
        mirror_changed,
    })
}

fn persist(conn: &mut PgConnection, contract_id: Uuid, mut update: ContractUpdate) -> QueryResult<()> {
    update.updated_at = Some(Utc::now());
    diesel::update(contracts::table.filter(contracts::id.eq(contract_id)))
        .set(&update)
        .execute(conn)?;
    Ok(())
}

/// Records the cancellation event once. The timestamp starts empty and is
/// backfilled later by the cancellation-date sweep. `contract_id` carries a
/// unique index, so concurrent cancellation deliveries race into a single
/// insert and the losers fall through the conflict clause.
fn ensure_cancellation_record(
    conn: &mut PgConnection,
    contract_id: Uuid,
    reason: &str,
) -> QueryResult<()> {
    let record = ContractCancellation {
        id: Uuid::new_v4(),
        contract_id,
        cancelled_at: None,
        reason: reason.to_string(),
        details: None,
        contract_month: None,
        meetings_completed: None,
        created_at: Utc::now(),
    };
    diesel::insert_into(contract_cancellations::table)
        .values(&record)
        .on_conflict(contract_cancellations::contract_id)
        .do_nothing()
        .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::signature_transition;
    use chrono::TimeZone;

    fn contract(status: &str, billing: &str, signature: &str) -> Contract {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Contract {
            id: Uuid::new_v4(),
            contact_id: Uuid::new_v4(),
            product_id: None,
            owner_id: None,
            status: status.to_string(),
            vindi_customer_id: Some("100".to_string()),
            vindi_subscription_id: Some("200".to_string()),
            vindi_bill_id: None,
            clicksign_document_key: Some("doc-key".to_string()),
            billing_status: billing.to_string(),
            signature_status: signature.to_string(),
            paid_installments: None,
            total_installments: None,
            last_payment_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn replayed_billing_event_diffs_to_nothing() {
        let paid_at = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let event = BillingEventUpdate {
            mirror: Some(BillingStatus::Paid),
            lifecycle: None,
            installment: Some(4),
            total_installments: Some(12),
            paid_at: Some(paid_at),
            bill_id: Some(77),
        };

        let before = contract("active", "pending", "signed");
        let (update, first) = billing_event_diff(&before, &event);
        assert!(!update.is_empty());
        assert!(first.mirror_changed);
        assert_eq!(update.paid_installments, Some(4));
        assert_eq!(update.vindi_bill_id.as_deref(), Some("77"));

        // Row as it looks after the first delivery was applied.
        let mut after = before.clone();
        after.billing_status = "paid".to_string();
        after.paid_installments = Some(4);
        after.total_installments = Some(12);
        after.last_payment_at = Some(paid_at);
        after.vindi_bill_id = Some("77".to_string());

        let (update, second) = billing_event_diff(&after, &event);
        assert!(update.is_empty());
        assert!(!second.status_changed);
        assert!(!second.mirror_changed);
        assert_eq!(second.previous_status, second.new_status);
    }

    #[test]
    fn replayed_signature_event_diffs_to_nothing() {
        let outcome = signature_transition("auto_close", true).unwrap();

        let before = contract("draft", "pending", "pending");
        let (update, first) = signature_outcome_diff(&before, outcome);
        assert!(!update.is_empty());
        assert!(first.status_changed);
        assert!(first.mirror_changed);
        assert_eq!(first.new_status, ContractStatus::Active);

        let mut after = before.clone();
        after.status = "active".to_string();
        after.signature_status = "signed".to_string();

        let (update, second) = signature_outcome_diff(&after, outcome);
        assert!(update.is_empty());
        assert!(!second.status_changed);
        assert!(!second.mirror_changed);
    }

    #[test]
    fn cancelled_contract_still_refreshes_the_billing_mirror() {
        let event = BillingEventUpdate {
            mirror: Some(BillingStatus::Refunded),
            lifecycle: None,
            ..Default::default()
        };

        let (update, outcome) = billing_event_diff(&contract("cancelled", "paid", "signed"), &event);
        assert_eq!(update.billing_status.as_deref(), Some("refunded"));
        assert!(update.status.is_none());
        assert!(outcome.mirror_changed);
        assert!(!outcome.status_changed);
    }

    #[test]
    fn bill_id_backfills_only_an_empty_linkage() {
        let event = BillingEventUpdate {
            bill_id: Some(42),
            ..Default::default()
        };

        let empty = contract("active", "pending", "signed");
        let (update, _) = billing_event_diff(&empty, &event);
        assert_eq!(update.vindi_bill_id.as_deref(), Some("42"));

        let mut linked = empty.clone();
        linked.vindi_bill_id = Some("41".to_string());
        let (update, _) = billing_event_diff(&linked, &event);
        assert!(update.vindi_bill_id.is_none());
    }
}
