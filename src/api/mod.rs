//! HTTP API handlers
//!
//! Route modules grouped by area; each exposes a `routes()` builder merged
//! into the service router. Domain outcomes serialize as `result` bodies
//! with their own status mapping; infrastructure errors surface as 503 with
//! a Retry-After hint.

pub mod attendance;
pub mod courses;
pub mod health;
pub mod sessions;
pub mod settings;
pub mod students;
pub mod timetable;
pub mod types;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::Error;

/// Seconds clients should wait before retrying a transient failure.
const RETRY_AFTER_SECS: &str = "5";

/// Wrapper mapping service errors onto HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError(Error::Database(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;

        let status = match &error {
            Error::InvalidImage(_)
            | Error::InvalidIdFormat(_)
            | Error::InvalidInput(_)
            | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::DuplicateStudentId(_) | Error::EnrollmentConflict(_) | Error::InvalidState(_) => {
                StatusCode::CONFLICT
            }
            Error::InsufficientQuality { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Database(_) | Error::Provider(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": error.to_string() }));

        if status == StatusCode::SERVICE_UNAVAILABLE {
            (status, [("Retry-After", RETRY_AFTER_SECS)], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

/// Handler result alias.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
