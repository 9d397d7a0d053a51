//! Error types for the Headway data-plane engine.
//!
//! One variant per failure mode, carrying the stable `kind` codes that
//! adapters translate into HTTP statuses and localisable messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error classification, independent of the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    Timeout,
    NotImplemented,
    Internal,
    SchemaCollision,
    InvalidFieldConfig,
    IllegalTransition,
    SchedulingUnavailable,
    NotRestorable,
    MigrationConflict,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// All possible errors from the Headway engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("global not found: {0}")]
    GlobalNotFound(String),

    #[error("record not found: {collection}/{id}")]
    RecordNotFound { collection: String, id: String },

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("field '{field}' collides with a synthesised column")]
    SchemaCollision { field: String },

    #[error("invalid field config: {0}")]
    InvalidFieldConfig(String),

    #[error("no stage '{to}' is reachable from '{from}'")]
    IllegalTransition { from: String, to: String },

    #[error("scheduling unavailable: no queue configured")]
    SchedulingUnavailable,

    #[error("collection '{0}' does not support restore (soft delete disabled)")]
    NotRestorable(String),

    #[error("migration conflict: {0}")]
    MigrationConflict(String),

    #[error("access denied")]
    Forbidden,

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict on field '{field}'")]
    Conflict { field: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("operation timed out")]
    Timeout,

    #[error("database error: {0}")]
    Db(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CollectionNotFound(_)
            | Error::GlobalNotFound(_)
            | Error::RecordNotFound { .. } => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::SchemaCollision { .. } => ErrorKind::SchemaCollision,
            Error::InvalidFieldConfig(_) => ErrorKind::InvalidFieldConfig,
            Error::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            Error::SchedulingUnavailable => ErrorKind::SchedulingUnavailable,
            Error::NotRestorable(_) => ErrorKind::NotRestorable,
            Error::MigrationConflict(_) => ErrorKind::MigrationConflict,
            Error::Forbidden => ErrorKind::Forbidden,
            Error::Unauthorized => ErrorKind::Unauthorized,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
            Error::Timeout => ErrorKind::Timeout,
            Error::Db(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn field_errors(&self) -> Option<&[FieldError]> {
        match self {
            Error::Validation(errs) => Some(errs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::CollectionNotFound("posts".into());
        assert_eq!(err.to_string(), "collection not found: posts");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = Error::IllegalTransition {
            from: "published".into(),
            to: "draft".into(),
        };
        assert_eq!(
            err.to_string(),
            "no stage 'draft' is reachable from 'published'"
        );
        assert_eq!(err.kind(), ErrorKind::IllegalTransition);
    }

    #[test]
    fn validation_carries_field_errors() {
        let err = Error::Validation(vec![FieldError::new("title", "is required")]);
        assert_eq!(err.field_errors().unwrap().len(), 1);
    }
}
