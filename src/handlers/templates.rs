use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::render::{check_syntax, convert_go_template_to_tera, required_placeholders};
use crate::utils::is_valid_hostname;
use crate::AppState;

use super::{created, ApiError};

/// List the template catalog
pub async fn list_templates(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Template>>, ApiError> {
    let templates = state.store.list_templates().await?;
    Ok(Json(templates))
}

/// Get a single template by name
pub async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Template>, ApiError> {
    let template = state
        .store
        .get_template(&name)
        .await?
        .ok_or_else(|| ApiError::not_found("template"))?;
    Ok(Json(template))
}

/// Add a template. Entries are immutable once created.
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<Template>), ApiError> {
    if req.name.is_empty() || req.body.trim().is_empty() {
        return Err(ApiError::bad_request("name and body are required"));
    }
    if !is_valid_hostname(&req.name) {
        return Err(ApiError::bad_request(
            "invalid template name: only alphanumeric, hyphens, dots, and underscores allowed",
        ));
    }
    check_syntax(&req.body)?;

    let template = state.store.create_template(&req).await?;
    tracing::info!("Added template {}", template.name);
    Ok(created(template))
}

/// Render a template with the given parameters without dispatching it
pub async fn preview_template(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<TemplatePreviewRequest>,
) -> Result<Json<TemplatePreviewResponse>, ApiError> {
    let output = state.renderer.render(&name, &req.params).await?;
    let template = state.renderer.load(&name).await?;
    let placeholders = required_placeholders(&convert_go_template_to_tera(&template.body));
    Ok(Json(TemplatePreviewResponse { output, placeholders }))
}
