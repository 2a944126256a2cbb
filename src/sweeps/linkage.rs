//! Linkage backfill: pages through contracts that never acquired their
//! billing customer and/or signature document key, runs the identity
//! matcher for each, and persists whatever was found. Explicit
//! offset/limit plus a `done` flag let the caller resume a long backfill
//! across many short invocations.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use diesel::prelude::*;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::lifecycle::engine;
use crate::lifecycle::SignatureStatus;
use crate::matching::{
    self, find_contract_envelope, ContactQuery,
};
use crate::shared::models::{Contact, Contract, ContractUpdate};
use crate::shared::schema::{contacts, contracts};
use crate::shared::state::AppState;
use crate::signature::clicksign::Envelope;
use crate::sweeps::{billing_snapshot_for, to_bill_views};

const DEFAULT_BATCH_SIZE: i64 = 10;
const MAX_BATCH_SIZE: i64 = 50;
/// Pause between per-contract provider round trips to avoid rate-limit
/// bursts.
const CALL_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Deserialize)]
pub struct LinkageSweepRequest {
    pub mode: Option<String>,
    pub batch_size: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    Vindi,
    Clicksign,
    All,
}

impl SweepMode {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw {
            None | Some("all") => Some(Self::All),
            Some("vindi") => Some(Self::Vindi),
            Some("clicksign") => Some(Self::Clicksign),
            Some(_) => None,
        }
    }

    pub fn includes_vindi(&self) -> bool {
        matches!(self, Self::Vindi | Self::All)
    }

    pub fn includes_clicksign(&self) -> bool {
        matches!(self, Self::Clicksign | Self::All)
    }
}

#[derive(Debug, Serialize)]
pub struct ProviderLinkResult {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProviderLinkResult {
    fn linked(strategy: &str) -> Self {
        Self {
            outcome: "linked".to_string(),
            strategy: Some(strategy.to_string()),
            detail: None,
        }
    }

    fn not_found() -> Self {
        Self {
            outcome: "not_found".to_string(),
            strategy: None,
            detail: None,
        }
    }

    fn error(detail: String) -> Self {
        Self {
            outcome: "error".to_string(),
            strategy: None,
            detail: Some(detail),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LinkageResult {
    pub contract_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vindi: Option<ProviderLinkResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clicksign: Option<ProviderLinkResult>,
}

#[derive(Debug, Serialize)]
pub struct LinkageSweepResponse {
    pub processed: usize,
    pub results: Vec<LinkageResult>,
    pub done: bool,
    pub next_offset: i64,
}

pub async fn run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LinkageSweepRequest>,
) -> Result<Json<LinkageSweepResponse>, (StatusCode, String)> {
    let mode = SweepMode::parse(request.mode.as_deref())
        .ok_or((StatusCode::BAD_REQUEST, "Invalid mode".to_string()))?;
    let batch_size = request
        .batch_size
        .unwrap_or(DEFAULT_BATCH_SIZE)
        .clamp(1, MAX_BATCH_SIZE);
    let offset = request.offset.unwrap_or(0).max(0);

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let mut query = contracts::table
        .inner_join(contacts::table)
        .into_boxed();

    query = match mode {
        SweepMode::Vindi => query.filter(contracts::vindi_customer_id.is_null()),
        SweepMode::Clicksign => query.filter(contracts::clicksign_document_key.is_null()),
        SweepMode::All => query.filter(
            contracts::vindi_customer_id
                .is_null()
                .or(contracts::clicksign_document_key.is_null()),
        ),
    };

    let page: Vec<(Contract, Contact)> = query
        .order(contracts::id.asc())
        .offset(offset)
        .limit(batch_size)
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    // Provider round trips dominate the rest of the pass; give the pool
    // slot back and re-acquire per write.
    drop(conn);

    // One envelope listing serves the whole batch.
    let envelopes: Option<Vec<Envelope>> = if mode.includes_clicksign()
        && page
            .iter()
            .any(|(contract, _)| contract.clicksign_document_key.is_none())
    {
        match state.clicksign.fetch_all_envelopes().await {
            Ok(envelopes) => Some(envelopes),
            Err(e) => {
                error!("Envelope listing failed, signature linkage skipped this pass: {e}");
                None
            }
        }
    } else {
        None
    };

    let page_len = page.len();
    let mut results = Vec::with_capacity(page_len);

    for (index, (contract, contact)) in page.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(CALL_DELAY).await;
        }

        let vindi = if mode.includes_vindi() && contract.vindi_customer_id.is_none() {
            Some(link_vindi(&state, contract, contact).await)
        } else {
            None
        };

        let clicksign = if mode.includes_clicksign() && contract.clicksign_document_key.is_none() {
            Some(link_clicksign(&state, contract, contact, envelopes.as_deref()))
        } else {
            None
        };

        results.push(LinkageResult {
            contract_id: contract.id,
            vindi,
            clicksign,
        });
    }

    let (done, next_offset) = page_progress(offset, page_len, batch_size);
    info!(
        "Linkage sweep: processed {page_len} contracts at offset {offset} (done={done})"
    );

    Ok(Json(LinkageSweepResponse {
        processed: page_len,
        results,
        done,
        next_offset,
    }))
}

/// A page shorter than the batch size means the query ran dry; the next
/// offset always advances by exactly what was fetched, so repeated calls
/// with the returned offset walk the candidate set without gaps.
fn page_progress(offset: i64, page_len: usize, batch_size: i64) -> (bool, i64) {
    ((page_len as i64) < batch_size, offset + page_len as i64)
}

async fn link_vindi(
    state: &AppState,
    contract: &Contract,
    contact: &Contact,
) -> ProviderLinkResult {
    let query = ContactQuery {
        full_name: contact.full_name.clone(),
        email: contact.email.clone(),
        phone: contact.phone.clone(),
        registry_code: contact.registry_code.clone(),
    };

    let matched = match matching::find_customer(&state.vindi, &query).await {
        Ok(Some(matched)) => matched,
        Ok(None) => return ProviderLinkResult::not_found(),
        Err(e) => {
            warn!("Vindi match failed for contract {}: {e}", contract.id);
            return ProviderLinkResult::error(e.to_string());
        }
    };

    let linkage = match matching::resolve_billing_linkage(&state.vindi, matched.customer.id).await {
        Ok(linkage) => linkage,
        Err(e) => {
            warn!(
                "Billing linkage lookup failed for contract {}: {e}",
                contract.id
            );
            return ProviderLinkResult::error(e.to_string());
        }
    };

    let update = ContractUpdate {
        vindi_customer_id: Some(matched.customer.id.to_string()),
        vindi_subscription_id: linkage.subscription.as_ref().map(|s| s.id.to_string()),
        vindi_bill_id: linkage.bill.as_ref().map(|b| b.id.to_string()),
        updated_at: Some(Utc::now()),
        ..Default::default()
    };

    if let Err(e) = persist_update(state, contract.id, &update) {
        error!("Failed to persist linkage for contract {}: {e}", contract.id);
        return ProviderLinkResult::error(e.to_string());
    }

    // Best-effort status mirror while the subscription is fresh.
    if let Some(subscription) = &linkage.subscription {
        match state.vindi.list_bills(subscription.id, None).await {
            Ok(bills) => {
                let snapshot = billing_snapshot_for(&subscription.status, &to_bill_views(&bills));
                if let Err(e) = refresh_snapshot(state, contract.id, &snapshot) {
                    warn!("Snapshot update failed for contract {}: {e}", contract.id);
                }
            }
            Err(e) => warn!(
                "Bill listing failed for contract {}, mirror left as-is: {e}",
                contract.id
            ),
        }
    }

    ProviderLinkResult::linked(matched.strategy.query_key())
}

fn persist_update(
    state: &AppState,
    contract_id: Uuid,
    update: &ContractUpdate,
) -> anyhow::Result<()> {
    let mut conn = state.conn.get()?;
    diesel::update(contracts::table.filter(contracts::id.eq(contract_id)))
        .set(update)
        .execute(&mut conn)?;
    Ok(())
}

/// Reloads the row so the snapshot diffs against what the linkage write
/// just produced.
fn refresh_snapshot(
    state: &AppState,
    contract_id: Uuid,
    snapshot: &crate::lifecycle::BillingSnapshot,
) -> anyhow::Result<()> {
    let mut conn = state.conn.get()?;
    if let Some(fresh) = contracts::table
        .filter(contracts::id.eq(contract_id))
        .first::<Contract>(&mut conn)
        .optional()?
    {
        engine::apply_billing_snapshot(&mut conn, &fresh, snapshot)?;
    }
    Ok(())
}

fn link_clicksign(
    state: &AppState,
    contract: &Contract,
    contact: &Contact,
    envelopes: Option<&[Envelope]>,
) -> ProviderLinkResult {
    let Some(envelopes) = envelopes else {
        return ProviderLinkResult::error("envelope listing unavailable".to_string());
    };

    let Some(envelope) = find_contract_envelope(&contact.full_name, envelopes) else {
        return ProviderLinkResult::not_found();
    };

    let update = ContractUpdate {
        clicksign_document_key: Some(envelope.key.clone()),
        signature_status: Some(
            SignatureStatus::from_envelope_status(&envelope.status)
                .as_str()
                .to_string(),
        ),
        updated_at: Some(Utc::now()),
        ..Default::default()
    };

    match persist_update(state, contract.id, &update) {
        Ok(()) => ProviderLinkResult::linked("name_match"),
        Err(e) => {
            error!(
                "Failed to persist document key for contract {}: {e}",
                contract.id
            );
            ProviderLinkResult::error(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!(SweepMode::parse(None), Some(SweepMode::All));
        assert_eq!(SweepMode::parse(Some("all")), Some(SweepMode::All));
        assert_eq!(SweepMode::parse(Some("vindi")), Some(SweepMode::Vindi));
        assert_eq!(SweepMode::parse(Some("clicksign")), Some(SweepMode::Clicksign));
        assert_eq!(SweepMode::parse(Some("stripe")), None);
    }

    #[test]
    fn short_page_ends_the_sweep() {
        // Full pages keep going; the offset advances by exactly the page.
        assert_eq!(page_progress(0, 10, 10), (false, 10));
        assert_eq!(page_progress(10, 10, 10), (false, 20));
        // A short page (including an empty one) is the last.
        assert_eq!(page_progress(20, 3, 10), (true, 23));
        assert_eq!(page_progress(23, 0, 10), (true, 23));
    }

    #[test]
    fn mode_coverage() {
        assert!(SweepMode::All.includes_vindi() && SweepMode::All.includes_clicksign());
        assert!(SweepMode::Vindi.includes_vindi() && !SweepMode::Vindi.includes_clicksign());
        assert!(!SweepMode::Clicksign.includes_vindi() && SweepMode::Clicksign.includes_clicksign());
    }
}
