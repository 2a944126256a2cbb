//! Freeze/unfreeze pass. Every active or frozen contract with a billing
//! subscription gets its pending bills re-counted against live provider
//! state; contracts crossing the overdue threshold change status. A
//! provider failure for one contract leaves that contract unchanged and
//! never aborts the pass.

use axum::{extract::State, http::StatusCode, Json};
use diesel::prelude::*;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::lifecycle::engine;
use crate::lifecycle::FreezeChange;
use crate::notifications;
use crate::shared::models::{Contact, Contract};
use crate::shared::schema::{contacts, contracts};
use crate::shared::state::AppState;
use crate::sweeps::batch::process_in_batches;
use crate::sweeps::to_bill_views;

const CONCURRENT_CONTRACTS: usize = 5;

#[derive(Debug, Serialize)]
pub struct FrozenSweepResponse {
    pub checked: usize,
    pub frozen: Vec<Uuid>,
    pub unfrozen: Vec<Uuid>,
    pub frozen_count: usize,
    pub unfrozen_count: usize,
    pub skipped: usize,
}

enum FreezeCheck {
    Frozen(Uuid),
    Unfrozen(Uuid),
    Unchanged,
    Skipped(Uuid),
}

pub async fn run(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FrozenSweepResponse>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let candidates: Vec<(Contract, Contact)> = contracts::table
        .inner_join(contacts::table)
        .filter(contracts::status.eq_any(vec!["active", "frozen"]))
        .filter(contracts::vindi_subscription_id.is_not_null())
        .order(contracts::id.asc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    let checked = candidates.len();
    drop(conn);

    let state_ref = state.clone();
    let checks = process_in_batches(candidates, CONCURRENT_CONTRACTS, move |(contract, contact)| {
        let state = state_ref.clone();
        async move { check_contract(&state, contract, contact).await }
    })
    .await;

    let mut frozen = Vec::new();
    let mut unfrozen = Vec::new();
    let mut skipped = 0usize;

    for check in checks {
        match check {
            FreezeCheck::Frozen(id) => frozen.push(id),
            FreezeCheck::Unfrozen(id) => unfrozen.push(id),
            FreezeCheck::Unchanged => {}
            FreezeCheck::Skipped(_) => skipped += 1,
        }
    }

    info!(
        "Frozen sweep: checked {checked}, froze {}, unfroze {}, skipped {skipped}",
        frozen.len(),
        unfrozen.len()
    );

    Ok(Json(FrozenSweepResponse {
        checked,
        frozen_count: frozen.len(),
        unfrozen_count: unfrozen.len(),
        frozen,
        unfrozen,
        skipped,
    }))
}

async fn check_contract(state: &AppState, contract: Contract, contact: Contact) -> FreezeCheck {
    let Some(subscription_id) = contract
        .vindi_subscription_id
        .as_deref()
        .and_then(|s| s.parse::<i64>().ok())
    else {
        warn!(
            "Contract {} has unparseable subscription id, skipping",
            contract.id
        );
        return FreezeCheck::Skipped(contract.id);
    };

    let bills = match state.vindi.list_bills(subscription_id, Some("pending")).await {
        Ok(bills) => bills,
        Err(e) => {
            warn!(
                "Bill listing failed for contract {} (subscription {subscription_id}): {e}",
                contract.id
            );
            return FreezeCheck::Skipped(contract.id);
        }
    };

    let now = chrono::Utc::now();
    let overdue_count = to_bill_views(&bills)
        .iter()
        .filter(|b| b.is_overdue(now))
        .count();

    let current = engine::current_status(&contract);
    let Some(change) = crate::lifecycle::freeze_decision(current, overdue_count) else {
        return FreezeCheck::Unchanged;
    };

    let mut conn = match state.conn.get() {
        Ok(conn) => conn,
        Err(e) => {
            error!("Pool exhausted while freezing contract {}: {e}", contract.id);
            return FreezeCheck::Skipped(contract.id);
        }
    };

    let outcome = match engine::apply_freeze_change(&mut conn, &contract, change) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Freeze update failed for contract {}: {e}", contract.id);
            return FreezeCheck::Skipped(contract.id);
        }
    };

    if !outcome.status_changed {
        return FreezeCheck::Unchanged;
    }

    let (title, message) = match change {
        FreezeChange::Freeze => notifications::freeze_notification(&contact.full_name, overdue_count),
        FreezeChange::Unfreeze => {
            notifications::unfreeze_notification(&contact.full_name, overdue_count)
        }
    };
    if let Err(e) = notifications::notify_owner(
        &mut conn,
        contract.owner_id,
        contract.id,
        &title,
        &message,
        "contract_status",
    ) {
        error!(
            "Freeze notification failed for contract {}: {e}",
            contract.id
        );
    }

    match change {
        FreezeChange::Freeze => FreezeCheck::Frozen(contract.id),
        FreezeChange::Unfreeze => FreezeCheck::Unfrozen(contract.id),
    }
}
