use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use diesel::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::billing;
use crate::shared::models::Contract;
use crate::shared::schema::contracts;
use crate::shared::state::AppState;
use crate::signature;
use crate::sweeps;

/// Providers deliver webhooks cross-origin and the manual sweep triggers
/// are called from operator tooling, so every route answers preflight with
/// a permissive CORS policy.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/contracts/:id", get(get_contract))
        .route("/webhooks/billing", post(billing::webhook::handle))
        .route("/webhooks/signature", post(signature::webhook::handle))
        .route("/sweeps/linkage", post(sweeps::linkage::run))
        .route("/sweeps/frozen", post(sweeps::frozen::run))
        .route("/sweeps/cancellation-dates", post(sweeps::cancellation::run))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Operator read endpoint: the contract with its lifecycle status and
/// provider mirrors, for inspecting sweep results.
async fn get_contract(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Contract>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let contract: Contract = contracts::table
        .filter(contracts::id.eq(id))
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Contract not found".to_string()))?;

    Ok(Json(contract))
}
