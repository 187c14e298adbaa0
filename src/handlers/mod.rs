pub mod backups;
pub mod batches;
pub mod config_ops;
pub mod devices;
pub mod events;
pub mod health;
pub mod templates;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::backup::BaselineMismatch;
use crate::db::{DuplicateError, NotFoundError};
use crate::jobs::DispatchError;
use crate::render::RenderError;

/// Error response body: {"error": "message"}
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// API error type
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(resource: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("{} not found", resource),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Request failed: {}", self.message);
        }
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // Typed errors first (no fragile string matching)
        if let Some(nf) = err.downcast_ref::<NotFoundError>() {
            return Self {
                status: StatusCode::NOT_FOUND,
                message: nf.to_string(),
            };
        }
        if let Some(dup) = err.downcast_ref::<DuplicateError>() {
            return Self::conflict(dup.to_string());
        }
        if let Some(mismatch) = err.downcast_ref::<BaselineMismatch>() {
            return Self::bad_request(mismatch.to_string());
        }
        Self::internal(err.to_string())
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Store(e) => e.into(),
            other if other.is_client_error() => Self::bad_request(other.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Validation(msg) => Self::bad_request(msg),
            DispatchError::DeviceNotFound(id) => Self {
                status: StatusCode::NOT_FOUND,
                message: format!("Device not found: {}", id),
            },
            DispatchError::Render(e) => e.into(),
            DispatchError::ShuttingDown => Self::service_unavailable("dispatcher is shutting down"),
            DispatchError::Store(e) => e.into(),
        }
    }
}

/// Message response for simple status messages
#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(msg: impl Into<String>) -> Json<Self> {
        Json(Self { message: msg.into() })
    }
}

/// Response helper: return 201 Created with JSON body
pub fn created<T: Serialize>(item: T) -> (StatusCode, Json<T>) {
    (StatusCode::CREATED, Json(item))
}

/// Response helper: return 202 Accepted with JSON body
pub fn accepted<T: Serialize>(item: T) -> (StatusCode, Json<T>) {
    (StatusCode::ACCEPTED, Json(item))
}
