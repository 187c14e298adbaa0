use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::AppState;

use super::{created, ApiError};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

/// Query backups, newest first. `device` accepts an id or hostname.
pub async fn list_backups(
    State(state): State<Arc<AppState>>,
    Query(mut filter): Query<BackupFilter>,
) -> Result<Json<Vec<Backup>>, ApiError> {
    if let (Some(since), Some(until)) = (filter.since, filter.until) {
        if since > until {
            return Err(ApiError::bad_request("since must not be after until"));
        }
    }
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT));

    let backups = state.store.collect_backups(filter).await?;
    Ok(Json(backups))
}

pub async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Backup>, ApiError> {
    let backup = state
        .store
        .get_backup(id)
        .await?
        .ok_or_else(|| ApiError::not_found("backup"))?;
    Ok(Json(backup))
}

/// Explicit deletion; backups are never evicted otherwise
pub async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_backup(id).await?;
    tracing::info!("Deleted backup {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Store output captured outside the dispatcher
pub async fn save_backup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveBackupRequest>,
) -> Result<(StatusCode, Json<Backup>), ApiError> {
    if req.device.trim().is_empty() || req.command.trim().is_empty() {
        return Err(ApiError::bad_request("device and command are required"));
    }
    if req.content.is_empty() {
        return Err(ApiError::bad_request("content is required"));
    }
    let backup = state.backups.save_manual(&req).await?;
    Ok(created(backup))
}

/// Compare a backup with its device's baseline
pub async fn check_deviation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<DeviationReport>, ApiError> {
    let report = state.backups.check_deviation(id).await?;
    Ok(Json(report))
}
