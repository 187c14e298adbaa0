use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::status;
use crate::utils::validate_device_fields;
use crate::AppState;

use super::{created, ApiError};

/// List devices, optionally filtered by platform, hostname substring or status
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<DeviceFilter>,
) -> Result<Json<Vec<Device>>, ApiError> {
    let devices = state.store.list_devices(&filter).await?;
    Ok(Json(devices))
}

/// Get a single device by id
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Device>, ApiError> {
    let device = state
        .store
        .get_device(id)
        .await?
        .ok_or_else(|| ApiError::not_found("device"))?;
    Ok(Json(device))
}

/// Register a device
pub async fn create_device(
    State(state): State<Arc<AppState>>,
    Json(mut req): Json<CreateDeviceRequest>,
) -> Result<(StatusCode, Json<Device>), ApiError> {
    req.hostname = req.hostname.trim().to_string();
    req.management_address = req.management_address.trim().to_string();

    if req.hostname.is_empty() || req.management_address.is_empty() {
        return Err(ApiError::bad_request("hostname and management_address are required"));
    }
    validate_device_fields(&req.hostname, &req.management_address, req.port).map_err(ApiError::bad_request)?;

    let device = state.store.create_device(&req).await?;
    tracing::info!("Registered device {} ({}:{})", device.hostname, device.management_address, device.port);
    Ok(created(device))
}

/// Apply a partial update
pub async fn update_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateDeviceRequest>,
) -> Result<Json<Device>, ApiError> {
    let current = state
        .store
        .get_device(id)
        .await?
        .ok_or_else(|| ApiError::not_found("device"))?;

    let hostname = req.hostname.as_deref().unwrap_or(&current.hostname);
    let address = req.management_address.as_deref().unwrap_or(&current.management_address);
    let port = req.port.unwrap_or(current.port);
    validate_device_fields(hostname, address, port).map_err(ApiError::bad_request)?;

    let device = state.store.update_device(id, &req).await?;
    Ok(Json(device))
}

/// Remove a device from the registry
pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_device(id).await?;
    tracing::info!("Deleted device {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Pin a backup as the device's baseline
pub async fn set_baseline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<SetBaselineRequest>,
) -> Result<Json<Baseline>, ApiError> {
    let baseline = state.backups.set_baseline(id, req.backup_id).await?;
    Ok(Json(baseline))
}

/// Recorded warn and critical deviations for a device, newest first
pub async fn list_deviations(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<DeviationQuery>,
) -> Result<Json<Vec<DeviationEvent>>, ApiError> {
    let history = state.backups.deviation_history(id, query.limit).await?;
    Ok(Json(history))
}

/// Override a device's stored status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<Device>, ApiError> {
    let new_status = req.status.trim().to_ascii_lowercase();
    if !device_status::ALL.contains(&new_status.as_str()) {
        return Err(ApiError::bad_request(format!(
            "status must be one of: {}",
            device_status::ALL.join(", ")
        )));
    }

    let device = status::override_status(&state.store, id, &new_status, state.ws_hub.as_deref()).await?;
    Ok(Json(device))
}

/// On-demand reachability check of named devices, or all of them
pub async fn test_connectivity(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ConnectivityRequest>>,
) -> Result<Json<ConnectivityResponse>, ApiError> {
    let names = body.and_then(|Json(req)| req.devices);
    let results = status::connectivity_report(&state.store, state.connector.as_ref(), names).await?;
    Ok(Json(ConnectivityResponse { results }))
}
