//! Checker that forwards addresses to the validation-server pool.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use super::{CheckError, CheckOptions, CheckOutcome, EmailChecker};
use crate::servers::ServerPool;

#[derive(Serialize)]
struct CheckRequest<'a> {
    email: &'a str,
    verify_smtp: bool,
}

pub struct HttpEmailChecker {
    pool: ServerPool,
    client: reqwest::Client,
}

impl HttpEmailChecker {
    pub fn new(pool: ServerPool, timeout: Duration) -> anyhow::Result<Self> {
        let client = crate::crypto::http_client(timeout)?;
        Ok(Self { pool, client })
    }
}

#[async_trait]
impl EmailChecker for HttpEmailChecker {
    #[instrument(skip(self, email, options), err)]
    async fn check(&self, email: &str, options: &CheckOptions) -> Result<CheckOutcome, CheckError> {
        let server = self
            .pool
            .pick()
            .map_err(|e| CheckError::Fatal(e.to_string()))?
            .ok_or_else(|| CheckError::Fatal("no healthy validation servers".to_string()))?;

        let response = self
            .client
            .post(format!("{}/check", server.url))
            .json(&CheckRequest {
                email,
                verify_smtp: options.verify_smtp,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CheckError::Timeout
                } else {
                    CheckError::Transient(format!("{}: {e}", server.name))
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(CheckError::Transient(format!("{} returned HTTP {}", server.name, status.as_u16())));
        }
        if !status.is_success() {
            return Err(CheckError::Fatal(format!("{} returned HTTP {}", server.name, status.as_u16())));
        }

        let outcome = response.json::<CheckOutcome>().await.map_err(|e| {
            if e.is_timeout() {
                CheckError::Timeout
            } else {
                CheckError::Transient(format!("malformed response from {}: {e}", server.name))
            }
        })?;
        debug!(server = %server.name, verdict = outcome.verdict.as_str(), "Address checked");
        Ok(outcome)
    }
}
