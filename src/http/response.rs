// src/http/response.rs

//! JSON envelope and error mapping for the management API.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::errors::FleetError;

/// Every JSON response has this shape.
///
/// ```json
/// {"success": true, "data": {...}, "timestamp": "2026-01-01T10:00:00Z"}
/// {"success": false, "error": "Client not found: 42", "timestamp": "..."}
/// ```
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }
}

impl Envelope<()> {
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: Utc::now(),
        }
    }
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(Envelope::ok(data)))
}

/// Failure of a management request.
#[derive(Debug)]
pub enum ApiError {
    Fleet(FleetError),
    BadRequest(String),
    NotFound(String),
}

impl From<FleetError> for ApiError {
    fn from(e: FleetError) -> Self {
        ApiError::Fleet(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

pub fn status_for(e: &FleetError) -> StatusCode {
    match e {
        FleetError::NotFound(_) => StatusCode::NOT_FOUND,
        FleetError::DuplicateId(_) | FleetError::PortInUse { .. } | FleetError::WorkerRunning(_) => {
            StatusCode::CONFLICT
        }
        FleetError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        FleetError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Fleet(e) => {
                let status = status_for(&e);
                if status.is_server_error() {
                    error!(error = %e, "management request failed");
                }
                (status, e.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };
        (status, Json(Envelope::err(message))).into_response()
    }
}
