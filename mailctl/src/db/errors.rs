use crate::types::Operation;
use thiserror::Error;

/// Unified error type for store operations that application code can handle
#[derive(Error, Debug)]
pub enum DbError {
    /// Entity not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// Unique constraint violation
    #[error("Unique constraint violation on {table}.{field}")]
    UniqueViolation {
        table: &'static str,
        field: &'static str,
        /// The conflicting value that caused the violation
        value: String,
    },

    /// Check constraint violation
    #[error("Check constraint violation on {table}: {message}")]
    CheckViolation { table: &'static str, message: String },

    /// Entity cannot be modified or deleted due to protection rules
    #[error("{operation:?} cannot be applied to entity of type {entity_type}: {reason}")]
    ProtectedEntity {
        operation: Operation,
        reason: String,
        entity_type: String,
        entity_id: Option<String>,
    },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;
