//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use notifications::NotificationError;

/// API-level error type that maps to HTTP responses.
///
/// Every error body has the shape `{ "success": false, "error": "<reason>" }`.
#[derive(Debug)]
pub enum ApiError {
    /// The `x-seller-id` header is absent or blank.
    MissingSeller,
    /// Bad request from the client.
    BadRequest(String),
    /// Mutation engine error.
    Domain(DomainError),
    /// Audit log read error.
    Notification(NotificationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MissingSeller => (
                StatusCode::UNAUTHORIZED,
                "Missing x-seller-id".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Notification(err) => {
                tracing::error!(error = %err, "audit log query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        let body = serde_json::json!({ "success": false, "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    match &err {
        DomainError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
        DomainError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        DomainError::Store(_) => {
            tracing::error!(error = %err, "store failure");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        DomainError::Emission { .. } => {
            tracing::error!(error = %err, "event emission failure");
            (StatusCode::BAD_GATEWAY, err.to_string())
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<NotificationError> for ApiError {
    fn from(err: NotificationError) -> Self {
        ApiError::Notification(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
