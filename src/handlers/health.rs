use axum::{extract::State, Json};
use std::sync::Arc;

use crate::AppState;

use super::ApiError;

/// Liveness: the process is up and serving
pub async fn healthcheck() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "netswift-dispatcher",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Readiness: database reachable and dispatcher accepting batches
pub async fn readiness(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    if let Err(e) = state.store.ping().await {
        tracing::warn!("Readiness check failed: {}", e);
        return Err(ApiError::service_unavailable("database unreachable"));
    }
    if !state.dispatcher.is_accepting() {
        return Err(ApiError::service_unavailable("dispatcher is shutting down"));
    }

    let ws_clients = match &state.ws_hub {
        Some(hub) => hub.client_count().await,
        None => 0,
    };
    Ok(Json(serde_json::json!({
        "status": "ready",
        "active_batches": state.dispatcher.active_batches(),
        "adapter_mode": state.config.adapter_mode.to_string(),
        "ws_clients": ws_clients,
    })))
}
