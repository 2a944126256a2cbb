//! Cancellation-date backfill. Cancellation rows are created when the
//! event happens, often without a trustworthy timestamp; this sweep
//! reconstructs one from signature-provider envelope metadata.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::matching::find_distrato_envelope;
use crate::shared::models::{Contact, Contract, ContractCancellation};
use crate::shared::schema::{contacts, contract_cancellations, contracts};
use crate::shared::state::AppState;
use crate::signature::clicksign::Envelope;
use crate::sweeps::parse_iso;

#[derive(Debug, Deserialize)]
pub struct CancellationSweepRequest {
    pub contract_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CancellationDateResult {
    pub cancellation_id: Uuid,
    pub contract_id: Uuid,
    /// Which strategy produced the date: "distrato_envelope",
    /// "linked_envelope", "already_set" or "not_found".
    pub strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CancellationSweepResponse {
    pub processed: usize,
    pub updated: usize,
    pub results: Vec<CancellationDateResult>,
}

pub async fn run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CancellationSweepRequest>,
) -> Result<Json<CancellationSweepResponse>, (StatusCode, String)> {
    if request.contract_ids.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "contract_ids is empty".to_string()));
    }

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let records: Vec<(ContractCancellation, (Contract, Contact))> = contract_cancellations::table
        .inner_join(contracts::table.inner_join(contacts::table))
        .filter(contract_cancellations::contract_id.eq_any(&request.contract_ids))
        .order(contract_cancellations::created_at.asc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    // One listing serves every record; this sweep cannot proceed without it.
    let envelopes = state.clicksign.fetch_all_envelopes().await.map_err(|e| {
        error!("Envelope listing failed, cancellation-date sweep aborted: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Provider error: {e}"))
    })?;

    let mut results = Vec::with_capacity(records.len());
    let mut updated = 0usize;

    for (cancellation, (contract, contact)) in &records {
        if cancellation.cancelled_at.is_some() {
            results.push(CancellationDateResult {
                cancellation_id: cancellation.id,
                contract_id: contract.id,
                strategy: "already_set".to_string(),
                cancelled_at: cancellation.cancelled_at,
            });
            continue;
        }

        let (strategy, cancelled_at) = resolve_cancellation_date(contract, contact, &envelopes);

        if let Some(cancelled_at) = cancelled_at {
            diesel::update(
                contract_cancellations::table.filter(contract_cancellations::id.eq(cancellation.id)),
            )
            .set(contract_cancellations::cancelled_at.eq(cancelled_at))
            .execute(&mut conn)
            .map_err(|e| {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}"))
            })?;
            updated += 1;
        }

        results.push(CancellationDateResult {
            cancellation_id: cancellation.id,
            contract_id: contract.id,
            strategy: strategy.to_string(),
            cancelled_at,
        });
    }

    info!(
        "Cancellation-date sweep: processed {}, updated {updated}",
        results.len()
    );

    Ok(Json(CancellationSweepResponse {
        processed: results.len(),
        updated,
        results,
    }))
}

/// Strategy (a): a termination envelope matched by client name, dated by
/// its creation. Strategy (b): the contract's own linked envelope, dated
/// by its last modification.
fn resolve_cancellation_date(
    contract: &Contract,
    contact: &Contact,
    envelopes: &[Envelope],
) -> (&'static str, Option<DateTime<Utc>>) {
    if let Some(envelope) = find_distrato_envelope(&contact.full_name, envelopes) {
        if let Some(date) = parse_iso(envelope.created_at.as_deref()) {
            return ("distrato_envelope", Some(date));
        }
    }

    if let Some(key) = contract.clicksign_document_key.as_deref() {
        if let Some(envelope) = envelopes.iter().find(|e| e.key == key) {
            if let Some(date) = parse_iso(envelope.updated_at.as_deref()) {
                return ("linked_envelope", Some(date));
            }
        }
    }

    ("not_found", None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn envelope(key: &str, name: &str, created: &str, updated: &str) -> Envelope {
        Envelope {
            key: key.to_string(),
            name: name.to_string(),
            status: "closed".to_string(),
            created_at: Some(created.to_string()),
            updated_at: Some(updated.to_string()),
        }
    }

    fn contract_with_key(key: Option<&str>) -> Contract {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Contract {
            id: Uuid::new_v4(),
            contact_id: Uuid::new_v4(),
            product_id: None,
            owner_id: None,
            status: "cancelled".to_string(),
            vindi_customer_id: None,
            vindi_subscription_id: None,
            vindi_bill_id: None,
            clicksign_document_key: key.map(|k| k.to_string()),
            billing_status: "unknown".to_string(),
            signature_status: "cancelled".to_string(),
            paid_installments: None,
            total_installments: None,
            last_payment_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn contact(name: &str) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            email: None,
            phone: None,
            registry_code: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn distrato_envelope_wins_over_linked_envelope() {
        let envelopes = vec![
            envelope("linked", "Contrato Maria Souza", "2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z"),
            envelope("dist", "Distrato Maria Souza", "2024-03-05T00:00:00Z", "2024-03-10T00:00:00Z"),
        ];
        let (strategy, date) = resolve_cancellation_date(
            &contract_with_key(Some("linked")),
            &contact("Maria Souza"),
            &envelopes,
        );
        assert_eq!(strategy, "distrato_envelope");
        assert_eq!(date.unwrap().to_rfc3339(), "2024-03-05T00:00:00+00:00");
    }

    #[test]
    fn linked_envelope_modification_is_the_fallback() {
        let envelopes = vec![envelope(
            "linked",
            "Contrato Maria Souza",
            "2024-01-01T00:00:00Z",
            "2024-02-01T00:00:00Z",
        )];
        let (strategy, date) = resolve_cancellation_date(
            &contract_with_key(Some("linked")),
            &contact("Maria Souza"),
            &envelopes,
        );
        assert_eq!(strategy, "linked_envelope");
        assert_eq!(date.unwrap().to_rfc3339(), "2024-02-01T00:00:00+00:00");
    }

    #[test]
    fn no_envelope_at_all_is_not_found() {
        let (strategy, date) =
            resolve_cancellation_date(&contract_with_key(None), &contact("Maria Souza"), &[]);
        assert_eq!(strategy, "not_found");
        assert!(date.is_none());
    }
}
