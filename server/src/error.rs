//! Unified error handling for the server.
//!
//! Maps `headway_core::ErrorKind` to HTTP status
//! (`Forbidden -> 403`, `Validation -> 400`, `Conflict -> 409`, ...). Every
//! response carries the stable `kind` code alongside the message so
//! clients can branch on it without string-matching.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use headway_core::ErrorKind;
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Engine(#[from] headway_core::Error),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("search error: {0}")]
    Search(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body: `{ kind, message, fieldErrors?, details? }`.
#[derive(Serialize)]
struct ErrorResponse {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field_errors: Option<Vec<FieldErrorBody>>,
}

#[derive(Serialize)]
struct FieldErrorBody {
    field: String,
    message: String,
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::BadRequest => "BadRequest",
        ErrorKind::Unauthorized => "Unauthorized",
        ErrorKind::Forbidden => "Forbidden",
        ErrorKind::NotFound => "NotFound",
        ErrorKind::Conflict => "Conflict",
        ErrorKind::Validation => "Validation",
        ErrorKind::Timeout => "Timeout",
        ErrorKind::NotImplemented => "NotImplemented",
        ErrorKind::Internal => "Internal",
        ErrorKind::SchemaCollision => "SchemaCollision",
        ErrorKind::InvalidFieldConfig => "InvalidFieldConfig",
        ErrorKind::IllegalTransition => "IllegalTransition",
        ErrorKind::SchedulingUnavailable => "SchedulingUnavailable",
        ErrorKind::NotRestorable => "NotRestorable",
        ErrorKind::MigrationConflict => "MigrationConflict",
    }
}

fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest
        | ErrorKind::InvalidFieldConfig
        | ErrorKind::IllegalTransition
        | ErrorKind::NotRestorable => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::SchemaCollision | ErrorKind::MigrationConflict => {
            StatusCode::CONFLICT
        }
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::SchedulingUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message, field_errors) = match &self {
            AppError::Database(e) => {
                tracing::error!(error = ?e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal",
                    "database error".to_string(),
                    None,
                )
            }
            AppError::Engine(e) => {
                let kind = e.kind();
                if kind == ErrorKind::Internal {
                    tracing::error!(error = %e, "engine error");
                } else {
                    tracing::warn!(error = %e, kind = ?kind, "engine error");
                }
                let field_errors = e.field_errors().map(|errs| {
                    errs.iter()
                        .map(|fe| FieldErrorBody {
                            field: fe.field.clone(),
                            message: fe.message.clone(),
                        })
                        .collect()
                });
                (status_for_kind(kind), kind_label(kind), e.to_string(), field_errors)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BadRequest", msg.clone(), None),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", "unauthorized".into(), None),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden", "forbidden".into(), None),
            AppError::Search(msg) => {
                tracing::warn!(error = %msg, "search error");
                (StatusCode::BAD_GATEWAY, "Internal", msg.clone(), None)
            }
            AppError::Storage(msg) => (StatusCode::BAD_REQUEST, "BadRequest", msg.clone(), None),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal", msg.clone(), None)
            }
        };

        let body = Json(ErrorResponse {
            kind,
            message,
            field_errors,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
