use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::AppState;

use super::ApiError;

/// Most recent activity log entries, newest first
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let events = state.store.list_events(query.limit).await?;
    Ok(Json(events))
}
