use thiserror::Error;

use super::types::JobStatus;
use crate::ledger::LedgerError;
use crate::types::JobId;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job cannot move from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job {id} is already {status}")]
    AlreadyTerminal { id: JobId, status: JobStatus },

    #[error("no email addresses to validate")]
    Empty,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, JobError>;
