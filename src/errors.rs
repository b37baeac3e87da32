//! Centralized error handling.
//!
//! One error type for the whole data-access layer. Scopes never wrap the
//! errors their bodies return; `DataError` only describes failures raised by
//! the layer itself (configuration, session lifecycle, SeaORM).

use thiserror::Error;

/// Data-access error types
#[derive(Error, Debug)]
pub enum DataError {
    // Configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Update payloads
    #[error("{entity} has no attribute '{field}'")]
    UnknownAttribute { entity: String, field: String },

    #[error("{entity} attribute '{field}' is part of the primary key and cannot be updated")]
    ImmutableAttribute { entity: String, field: String },

    #[error("Invalid update payload: {0}")]
    InvalidPatch(String),

    // Session lifecycle
    #[error("No active session in the current call chain")]
    NoActiveSession,

    #[error("No ambient context is bound to the current call chain")]
    NoAmbientContext,

    #[error("Session has no open transaction")]
    NoOpenTransaction,

    #[error("Session {0} is closed")]
    SessionClosed(uuid::Uuid),

    #[error("Session {0} belongs to another call chain")]
    ForeignSession(uuid::Uuid),

    #[error("Scope closed out of order: expected depth {expected}, found {found}")]
    ScopeOrder { expected: usize, found: usize },

    // External errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DataError {
    /// Short machine-readable code, used in log fields
    pub fn code(&self) -> &'static str {
        match self {
            DataError::Configuration(_) => "CONFIGURATION_ERROR",
            DataError::UnknownAttribute { .. } => "UNKNOWN_ATTRIBUTE",
            DataError::ImmutableAttribute { .. } => "IMMUTABLE_ATTRIBUTE",
            DataError::InvalidPatch(_) => "INVALID_PATCH",
            DataError::NoActiveSession => "NO_ACTIVE_SESSION",
            DataError::NoAmbientContext => "NO_AMBIENT_CONTEXT",
            DataError::NoOpenTransaction => "NO_OPEN_TRANSACTION",
            DataError::SessionClosed(_) => "SESSION_CLOSED",
            DataError::ForeignSession(_) => "FOREIGN_SESSION",
            DataError::ScopeOrder { .. } => "SCOPE_ORDER",
            DataError::Database(_) => "DATABASE_ERROR",
            DataError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the error is an attribute-class failure of an update request
    pub fn is_attribute_error(&self) -> bool {
        matches!(
            self,
            DataError::UnknownAttribute { .. } | DataError::ImmutableAttribute { .. }
        )
    }
}

/// Result type alias
pub type DataResult<T> = Result<T, DataError>;

/// Convenience constructors
impl DataError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        DataError::Configuration(msg.into())
    }

    pub fn unknown_attribute(entity: impl Into<String>, field: impl Into<String>) -> Self {
        DataError::UnknownAttribute {
            entity: entity.into(),
            field: field.into(),
        }
    }

    pub fn invalid_patch(msg: impl Into<String>) -> Self {
        DataError::InvalidPatch(msg.into())
    }
}
