use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dealflow_core::error::{self, ApiError};
use uuid::Uuid;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Event, chain, or action id does not resolve (404)
    NotFound { entity: &'static str, id: Uuid },
    /// Attempted transition on a non-pending action or chain (409).
    /// Expected under concurrent review — the message names the status
    /// someone else already resolved it to.
    AlreadyResolved {
        entity: &'static str,
        id: Uuid,
        status: String,
    },
    /// Malformed policy document submitted by a caller (400). Stored
    /// policies that fail to parse fall back to the default instead.
    InvalidPolicy { message: String },
    /// Chain construction could not complete; nothing was persisted and
    /// the event stays unprocessed for retry (500)
    GenerationFailed(String),
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // TODO: extract request_id from extensions once middleware is wired
        let request_id = Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { entity, id } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{} {} not found", entity, id),
                    field: None,
                    received: Some(serde_json::Value::String(id.to_string())),
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::AlreadyResolved { entity, id, status } => (
                StatusCode::CONFLICT,
                ApiError {
                    error: error::codes::ALREADY_RESOLVED.to_string(),
                    message: format!("{} {} is already {}", entity, id, status),
                    field: None,
                    received: Some(serde_json::Value::String(status)),
                    request_id,
                    docs_hint: Some(
                        "Another reviewer resolved this first. Re-fetch the chain to see \
                         the recorded outcome; retrying will not double-execute."
                            .to_string(),
                    ),
                },
            ),
            AppError::InvalidPolicy { message } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::INVALID_POLICY.to_string(),
                    message,
                    field: Some("thresholds".to_string()),
                    received: None,
                    request_id,
                    docs_hint: Some(
                        "A policy needs at least one tier threshold, each with \
                         min_significance in [0,1]."
                            .to_string(),
                    ),
                },
            ),
            AppError::GenerationFailed(message) => {
                tracing::error!("Chain generation failed: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::GENERATION_FAILED.to_string(),
                        message: "Chain generation failed; the event was left unprocessed \
                                  and is safe to retry"
                            .to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}
