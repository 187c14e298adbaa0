use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::reporter::{self, BatchSummary};
use crate::AppState;

use super::{accepted, ApiError, MessageResponse};

/// Accept a batch and run it in the background
pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<BatchAccepted>), ApiError> {
    let req = req.into_batch_request().map_err(ApiError::bad_request)?;
    let handle = state.dispatcher.start(req).await?;
    Ok(accepted(BatchAccepted {
        batch_id: handle.batch_id,
    }))
}

/// Current summary of a batch (final once every job is terminal)
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchSummary>, ApiError> {
    let result = state
        .dispatcher
        .get_batch(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("batch"))?;
    Ok(Json(reporter::summarize(&result)))
}

pub async fn list_batch_jobs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Job>>, ApiError> {
    if state.store.get_batch(&id).await?.is_none() {
        return Err(ApiError::not_found("batch"));
    }
    let jobs = state.dispatcher.list_jobs(&id).await?;
    Ok(Json(jobs))
}

/// Cancel an in-flight batch; finished batches are a 409
pub async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    if state.dispatcher.cancel(&id) {
        return Ok((StatusCode::ACCEPTED, MessageResponse::new("cancellation requested")));
    }
    match state.store.get_batch(&id).await? {
        Some(batch) => Err(ApiError::conflict(format!("batch {} is already {}", id, batch.state.as_str()))),
        None => Err(ApiError::not_found("batch")),
    }
}
