//! Inbound webhook from the billing provider. The provider retries on
//! non-2xx, so "no matching contract" and unknown event types are
//! acknowledged with 200; only malformed payloads and database failures
//! are errors.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::lifecycle::engine::{self, BillingEventUpdate};
use crate::lifecycle::{billing_event_lifecycle, billing_event_mirror};
use crate::notifications;
use crate::shared::models::Contract;
use crate::shared::schema::{contacts, contracts};
use crate::shared::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BillingWebhookPayload {
    pub event: Option<BillingEvent>,
}

#[derive(Debug, Deserialize)]
pub struct BillingEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Option<BillingEventData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BillingEventData {
    pub bill: Option<WebhookBill>,
    pub charge: Option<WebhookCharge>,
    pub subscription: Option<WebhookSubscription>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookBill {
    pub id: i64,
    pub status: Option<String>,
    pub installments: Option<i32>,
    pub subscription: Option<IdRef>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookCharge {
    pub id: i64,
    pub status: Option<String>,
    /// Installment number this charge pays, when the plan is installment
    /// based.
    pub installment: Option<i32>,
    pub paid_at: Option<String>,
    pub bill: Option<ChargeBill>,
}

#[derive(Debug, Deserialize)]
pub struct ChargeBill {
    pub id: i64,
    pub installments: Option<i32>,
    pub subscription: Option<IdRef>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookSubscription {
    pub id: i64,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdRef {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct BillingWebhookResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_billing_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BillingWebhookResponse {
    fn ack(message: &str) -> Self {
        Self {
            success: true,
            contract_id: None,
            new_status: None,
            new_billing_status: None,
            message: Some(message.to_string()),
        }
    }
}

/// Subscription/bill ids extracted from whichever nested resource the
/// event carries.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EventKeys {
    pub subscription_id: Option<i64>,
    pub bill_id: Option<i64>,
}

pub fn extract_event_keys(data: &BillingEventData) -> EventKeys {
    let mut keys = EventKeys::default();

    if let Some(subscription) = &data.subscription {
        keys.subscription_id = Some(subscription.id);
    }
    if let Some(bill) = &data.bill {
        keys.bill_id = Some(bill.id);
        if keys.subscription_id.is_none() {
            keys.subscription_id = bill.subscription.as_ref().map(|s| s.id);
        }
    }
    if let Some(charge) = &data.charge {
        if let Some(bill) = &charge.bill {
            if keys.bill_id.is_none() {
                keys.bill_id = Some(bill.id);
            }
            if keys.subscription_id.is_none() {
                keys.subscription_id = bill.subscription.as_ref().map(|s| s.id);
            }
        }
    }

    keys
}

fn find_contract(
    conn: &mut PgConnection,
    keys: &EventKeys,
) -> QueryResult<Option<Contract>> {
    if let Some(subscription_id) = keys.subscription_id {
        let found: Option<Contract> = contracts::table
            .filter(contracts::vindi_subscription_id.eq(subscription_id.to_string()))
            .first(conn)
            .optional()?;
        if found.is_some() {
            return Ok(found);
        }
    }

    if let Some(bill_id) = keys.bill_id {
        return contracts::table
            .filter(contracts::vindi_bill_id.eq(bill_id.to_string()))
            .first(conn)
            .optional();
    }

    Ok(None)
}

fn parse_paid_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BillingWebhookPayload>,
) -> Result<Json<BillingWebhookResponse>, (StatusCode, String)> {
    let event = payload
        .event
        .ok_or((StatusCode::BAD_REQUEST, "Missing event".to_string()))?;
    let data = event.data.unwrap_or_default();

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let keys = extract_event_keys(&data);
    let contract = find_contract(&mut conn, &keys)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    let Some(contract) = contract else {
        info!(
            "Billing event {} matches no tracked contract (subscription {:?}, bill {:?})",
            event.event_type, keys.subscription_id, keys.bill_id
        );
        return Ok(Json(BillingWebhookResponse::ack("no matching contract")));
    };

    let Some(mirror) = billing_event_mirror(&event.event_type) else {
        warn!("Ignoring unknown billing event type: {}", event.event_type);
        return Ok(Json(BillingWebhookResponse::ack("ignored event type")));
    };

    let charge = data.charge.as_ref();
    let update = BillingEventUpdate {
        mirror: Some(mirror),
        lifecycle: billing_event_lifecycle(&event.event_type),
        installment: charge.and_then(|c| c.installment),
        total_installments: charge
            .and_then(|c| c.bill.as_ref().and_then(|b| b.installments))
            .or_else(|| data.bill.as_ref().and_then(|b| b.installments)),
        paid_at: charge.and_then(|c| parse_paid_at(c.paid_at.as_deref())),
        bill_id: keys.bill_id,
    };

    let outcome = engine::apply_billing_event(&mut conn, &contract, update)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;

    if outcome.status_changed || outcome.mirror_changed {
        let contact_name: String = contacts::table
            .filter(contacts::id.eq(contract.contact_id))
            .select(contacts::full_name)
            .first(&mut conn)
            .unwrap_or_else(|_| "client".to_string());

        let paid = charge.and_then(|c| c.installment).or(contract.paid_installments);
        let total = charge
            .and_then(|c| c.bill.as_ref().and_then(|b| b.installments))
            .or(contract.total_installments);

        if let Some((title, message)) =
            notifications::billing_event_notification(&event.event_type, &contact_name, paid, total)
        {
            notifications::notify_owner(
                &mut conn,
                contract.owner_id,
                contract.id,
                &title,
                &message,
                "billing",
            )
            .map_err(|e| {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Notification error: {e}"))
            })?;
        }
    }

    Ok(Json(BillingWebhookResponse {
        success: true,
        contract_id: Some(outcome.contract_id),
        new_status: Some(outcome.new_status.as_str().to_string()),
        new_billing_status: Some(mirror.as_str().to_string()),
        message: None,
    }))
}
