use axum::{extract::State, Json};
use std::sync::Arc;

use crate::models::*;
use crate::AppState;

use super::ApiError;

/// Run one command on one device and wait for the result
pub async fn retrieve_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<ConfigOpResult>, ApiError> {
    if req.command.trim().is_empty() {
        return Err(ApiError::bad_request("command is required"));
    }
    let method: Method = req.method.parse().map_err(ApiError::bad_request)?;
    let device = resolve(&state, &req.device).await?;

    let result = run_single(
        &state,
        BatchRequest {
            device_ids: vec![device.id],
            command: CommandSpec::Literal(req.command),
            method,
            kind: BatchKind::Retrieve,
            validate_only: false,
            deadline: None,
        },
    )
    .await?;
    Ok(Json(result))
}

/// Push config lines to one device (or dry-run them) and wait for the result
pub async fn push_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PushRequest>,
) -> Result<Json<ConfigOpResult>, ApiError> {
    if req.commands.iter().all(|c| c.trim().is_empty()) {
        return Err(ApiError::bad_request("commands must contain at least one line"));
    }
    let method: Method = req.method.parse().map_err(ApiError::bad_request)?;
    let device = resolve(&state, &req.device).await?;

    let result = run_single(
        &state,
        BatchRequest {
            device_ids: vec![device.id],
            command: CommandSpec::Literal(req.commands.join("\n")),
            method,
            kind: BatchKind::Push,
            validate_only: req.validate_only,
            deadline: None,
        },
    )
    .await?;
    Ok(Json(result))
}

async fn resolve(state: &AppState, device: &str) -> Result<Device, ApiError> {
    state
        .store
        .resolve_device(device.trim())
        .await?
        .ok_or_else(|| ApiError::not_found("device"))
}

async fn run_single(state: &AppState, req: BatchRequest) -> Result<ConfigOpResult, ApiError> {
    let result = state.dispatcher.submit(req).await?;
    let job = result
        .jobs
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::internal("batch finished without a job"))?;

    let output = match job.state {
        JobState::Succeeded => state.store.backup_for_job(&job.id).await?.map(|b| b.content),
        _ => None,
    };

    Ok(ConfigOpResult {
        batch_id: result.batch.id,
        device_id: job.device_id,
        device_name: job.device_name,
        state: job.state,
        attempts: job.attempt_count,
        message: job.result_message,
        error_kind: job.error_kind,
        output,
    })
}
