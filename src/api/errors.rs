use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::gid::IdError;
use crate::iapl::errors::PolicyError;
use crate::query::QueryError;
use crate::storage::StorageError;

/// Errors surfaced by the HTTP layer. Every handler outcome writes exactly
/// one response with the body `{"error": <full>, "message": <user>}`.
///
/// A request canceled by the client or by the deadline never reaches this
/// mapping at all: its handler future is dropped, and the request-deadline
/// guard writes the single 422 response. Handler-chosen statuses therefore
/// pass through untouched.
#[derive(Debug)]
pub enum ApiError {
    /// A transport error with an explicitly chosen status.
    Http { status: StatusCode, message: String },
    /// The request was canceled or a deadline elapsed.
    Canceled,
    Internal(String),
}

impl ApiError {
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Canceled => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"error": "request canceled"})),
            )
                .into_response(),

            ApiError::Http { status, message } => {
                let full = format!("code={}, message={}", status.as_u16(), message);
                (status, Json(json!({"error": full, "message": message}))).into_response()
            }

            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": message, "message": message})),
            )
                .into_response(),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Canceled => ApiError::Canceled,
            QueryError::Id(err) => ApiError::http(StatusCode::BAD_REQUEST, err.to_string()),
            QueryError::InvalidType(message) => ApiError::http(StatusCode::BAD_REQUEST, message),
            QueryError::Precondition(message) => ApiError::http(StatusCode::BAD_REQUEST, message),
            QueryError::Storage(err) => {
                let message = err.to_string();
                match err {
                    StorageError::NotFound { .. } => ApiError::http(StatusCode::NOT_FOUND, message),
                    StorageError::Conflict(_) => ApiError::http(StatusCode::CONFLICT, message),
                    _ => ApiError::Internal(message),
                }
            }
            QueryError::Client(err) if err.is_transient() => {
                ApiError::http(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        ApiError::http(StatusCode::BAD_REQUEST, err.to_string())
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        ApiError::http(StatusCode::BAD_REQUEST, err.to_string())
    }
}
