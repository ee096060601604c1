use crate::checker::CheckError;
use crate::db::errors::DbError;
use crate::jobs::JobError;
use crate::ledger::LedgerError;
use crate::payment_providers::PaymentError;
use crate::types::{Credits, Operation};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// User lacks required permissions for the operation
    #[error("Insufficient permissions to {action} {resource}")]
    InsufficientPermissions { action: Operation, resource: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// The request conflicts with the current state of a resource
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Rate limit or capacity limit exceeded
    #[error("Too many requests: {message}")]
    TooManyRequests { message: String },

    /// A reservation was refused because the balance cannot cover it
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: Credits, available: Credits },

    /// An upstream collaborator (checker, payment provider) failed
    #[error("Upstream failure: {message}")]
    BadGateway { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Store operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::ProtectedEntity { .. } => StatusCode::FORBIDDEN,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::InsufficientPermissions { action, resource } => {
                format!("Insufficient permissions to {action} {resource}")
            }
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::Conflict { message } => message.clone(),
            Error::TooManyRequests { message } => message.clone(),
            Error::InsufficientCredits { required, available } => {
                format!("Insufficient credits: this request needs {required} credits but only {available} are available")
            }
            Error::BadGateway { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { table, field, .. } => match (*table, *field) {
                    ("users", "email") => "An account with this email address already exists".to_string(),
                    ("coupons", "code") => "A coupon with this code already exists".to_string(),
                    ("plans", "name") => "A plan with this name already exists".to_string(),
                    ("servers", "url") => "A server with this URL already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::CheckViolation { message, .. } => message.clone(),
                DbError::ProtectedEntity {
                    operation,
                    entity_type,
                    reason,
                    ..
                } => format!("Cannot {operation} {entity_type}: {reason}"),
                DbError::Other(_) => "Storage error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::BadGateway { .. } => {
                tracing::error!("Upstream error: {}", self);
            }
            Error::Database(_) | Error::Conflict { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::InsufficientPermissions { .. } | Error::TooManyRequests { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::InsufficientCredits { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();

        match &self {
            Error::InsufficientCredits { required, available } => {
                let body = json!({
                    "message": self.user_message(),
                    "required": required,
                    "available": available,
                });
                (status, axum::response::Json(body)).into_response()
            }
            Error::Database(DbError::UniqueViolation { table, field, .. }) => {
                let body = json!({
                    "message": self.user_message(),
                    "resource": table,
                    "field": field,
                });
                (status, axum::response::Json(body)).into_response()
            }
            _ => (status, self.user_message()).into_response(),
        }
    }
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits { required, available } => Error::InsufficientCredits { required, available },
            LedgerError::AccountNotFound(user_id) => Error::NotFound {
                resource: "Credit account".to_string(),
                id: user_id.to_string(),
            },
            LedgerError::ReservationNotFound(id) => Error::NotFound {
                resource: "Reservation".to_string(),
                id: id.to_string(),
            },
            LedgerError::InvalidAmount(message) => Error::BadRequest { message },
            err @ (LedgerError::BelowHeld { .. } | LedgerError::OutstandingReservations(_) | LedgerError::AccountExists(_)) => {
                Error::Conflict { message: err.to_string() }
            }
            err @ (LedgerError::SettlementMismatch { .. } | LedgerError::Overconsumption { .. }) => Error::Internal {
                operation: format!("settle credits: {err}"),
            },
        }
    }
}

impl From<JobError> for Error {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => Error::NotFound {
                resource: "Job".to_string(),
                id: id.to_string(),
            },
            err @ (JobError::InvalidTransition { .. } | JobError::AlreadyTerminal { .. }) => Error::Conflict { message: err.to_string() },
            JobError::Empty => Error::BadRequest {
                message: "No email addresses to validate".to_string(),
            },
            JobError::Ledger(ledger) => ledger.into(),
        }
    }
}

impl From<CheckError> for Error {
    fn from(err: CheckError) -> Self {
        Error::BadGateway {
            message: format!("Email checker unavailable: {err}"),
        }
    }
}

impl From<PaymentError> for Error {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::SessionNotFound(id) => Error::NotFound {
                resource: "Checkout session".to_string(),
                id,
            },
            PaymentError::NotPaid(id) => Error::BadRequest {
                message: format!("Payment for session {id} has not completed"),
            },
            PaymentError::Provider(e) => Error::BadGateway {
                message: format!("Payment provider error: {e}"),
            },
        }
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
