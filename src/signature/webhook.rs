//! Inbound webhook from the signature provider. Events for envelopes this
//! system does not track are acknowledged with 200 so the provider stops
//! retrying.

use axum::{extract::State, http::StatusCode, Json};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::lifecycle::engine;
use crate::lifecycle::signature_transition;
use crate::notifications;
use crate::shared::models::Contract;
use crate::shared::schema::{contacts, contracts};
use crate::shared::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignatureWebhookPayload {
    pub event: Option<SignatureEvent>,
    pub document: Option<SignatureDocument>,
    pub signer: Option<serde_json::Value>,
    pub account: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SignatureEvent {
    pub name: String,
    pub occurred_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignatureDocument {
    pub key: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignatureWebhookResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_clicksign_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SignatureWebhookResponse {
    fn ack(message: &str) -> Self {
        Self {
            success: true,
            contract_id: None,
            event: None,
            new_status: None,
            new_clicksign_status: None,
            message: Some(message.to_string()),
        }
    }
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignatureWebhookPayload>,
) -> Result<Json<SignatureWebhookResponse>, (StatusCode, String)> {
    let event = payload
        .event
        .ok_or((StatusCode::BAD_REQUEST, "Missing event".to_string()))?;
    let document_key = payload
        .document
        .as_ref()
        .and_then(|d| d.key.clone())
        .ok_or((StatusCode::BAD_REQUEST, "Missing document key".to_string()))?;
    let document_status = payload
        .document
        .as_ref()
        .and_then(|d| d.status.clone())
        .unwrap_or_default();

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let contract: Option<Contract> = contracts::table
        .filter(contracts::clicksign_document_key.eq(&document_key))
        .first(&mut conn)
        .optional()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    let Some(contract) = contract else {
        info!(
            "Signature event {} for document {} matches no tracked contract",
            event.name, document_key
        );
        return Ok(Json(SignatureWebhookResponse::ack("no matching contract")));
    };

    let Some(outcome) = signature_transition(&event.name, document_status == "closed") else {
        info!("Ignoring signature event: {}", event.name);
        return Ok(Json(SignatureWebhookResponse::ack("ignored event type")));
    };

    let reason = format!("signature_{}", event.name);
    let transition = engine::apply_signature_outcome(&mut conn, &contract, outcome, &reason)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;

    if transition.status_changed {
        let contact_name: String = contacts::table
            .filter(contacts::id.eq(contract.contact_id))
            .select(contacts::full_name)
            .first(&mut conn)
            .unwrap_or_else(|_| "client".to_string());

        if let Some((title, message)) =
            notifications::signature_event_notification(&event.name, &contact_name)
        {
            notifications::notify_owner(
                &mut conn,
                contract.owner_id,
                contract.id,
                &title,
                &message,
                "signature",
            )
            .map_err(|e| {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Notification error: {e}"))
            })?;
        }
    }

    Ok(Json(SignatureWebhookResponse {
        success: true,
        contract_id: Some(transition.contract_id),
        event: Some(event.name),
        new_status: Some(transition.new_status.as_str().to_string()),
        new_clicksign_status: Some(outcome.mirror.as_str().to_string()),
        message: None,
    }))
}
