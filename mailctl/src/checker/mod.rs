//! The email checker collaborator.
//!
//! Classification itself happens elsewhere: [`HttpEmailChecker`] forwards each address to a
//! validation server from the pool, [`LocalEmailChecker`] classifies offline for development and
//! tests. Either way the orchestrator only cares about the verdict and that the address was checked.

pub mod http;
pub mod local;
pub mod syntax;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::{CheckerMode, ValidationConfig};
use crate::jobs::types::Verdict;
use crate::servers::ServerPool;

pub use http::HttpEmailChecker;
pub use local::LocalEmailChecker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckOptions {
    /// Open an SMTP conversation with the mailbox host
    #[serde(default)]
    pub verify_smtp: bool,
}

/// Individual signals behind a verdict. `None` means the check was not performed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Checks {
    pub syntax: bool,
    pub mx_found: Option<bool>,
    pub smtp_valid: Option<bool>,
    pub disposable: bool,
    pub role_based: bool,
    pub catch_all: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckOutcome {
    #[serde(rename = "status")]
    pub verdict: Verdict,
    pub score: u8,
    #[serde(default)]
    pub checks: Checks,
}

#[derive(Debug, Error)]
pub enum CheckError {
    /// The check did not finish in time; the address is recorded as unknown
    #[error("check timed out")]
    Timeout,

    /// Retryable failure of the checker; the address is recorded as unknown
    #[error("checker unavailable: {0}")]
    Transient(String),

    /// The checker cannot serve this job at all
    #[error("checker rejected the request: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait EmailChecker: Send + Sync {
    async fn check(&self, email: &str, options: &CheckOptions) -> Result<CheckOutcome, CheckError>;
}

pub fn build_checker(config: &ValidationConfig, pool: ServerPool) -> anyhow::Result<Arc<dyn EmailChecker>> {
    Ok(match config.checker {
        CheckerMode::Http => Arc::new(HttpEmailChecker::new(pool, config.check_timeout)?),
        CheckerMode::Local => Arc::new(LocalEmailChecker::new()),
    })
}
