//! Validation daemon: claims queued bulk jobs and runs the checker over their addresses.
//!
//! Each claimed job gets its own task holding a permit from the job semaphore. Inside a job,
//! checks run with bounded parallelism but results are fed back through a single loop, which is
//! the only writer for that job.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream;
use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::Result;
use super::manager::{ClaimedJob, JobManager, RecordOutcome};
use super::types::{EmailResult, JobKind, Verdict};
use crate::checker::{CheckError, CheckOptions, Checks, EmailChecker, syntax};
use crate::config::DaemonConfig;
use crate::errors::Error;
use crate::types::{UserId, abbrev_uuid};

/// Run one address through the checker, bounded by `timeout`.
///
/// Timeouts and transient failures still produce a result: the address is `unknown` and is
/// charged like any other. Only fatal checker errors are returned.
pub async fn check_address(
    checker: &dyn EmailChecker,
    index: usize,
    email: String,
    options: CheckOptions,
    timeout: Duration,
) -> std::result::Result<EmailResult, CheckError> {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, checker.check(&email, &options))
        .await
        .unwrap_or(Err(CheckError::Timeout));
    let response_time_ms = started.elapsed().as_millis() as u64;

    let result = match outcome {
        Ok(outcome) => EmailResult {
            index,
            email,
            status: outcome.verdict,
            score: outcome.score.min(100),
            checks: outcome.checks,
            error: None,
            response_time_ms,
        },
        Err(e @ (CheckError::Timeout | CheckError::Transient(_))) => {
            debug!(index, error = %e, "Check did not produce a verdict");
            EmailResult {
                index,
                checks: Checks {
                    syntax: syntax::is_valid(&email),
                    ..Default::default()
                },
                email,
                status: Verdict::Unknown,
                score: 0,
                error: Some(e.to_string()),
                response_time_ms,
            }
        }
        Err(fatal) => return Err(fatal),
    };
    counter!("mailctl_emails_checked_total", "verdict" => result.status.as_str()).increment(1);
    Ok(result)
}

/// Validate one address inline through the job state machine.
///
/// The single job is reserved, claimed, checked, recorded and finished before returning, so the
/// daemon never sees it. If the future is dropped first, the job fails and its hold is released.
pub async fn validate_single(
    manager: &JobManager,
    checker: &dyn EmailChecker,
    user_id: UserId,
    email: String,
    options: CheckOptions,
    timeout: Duration,
) -> crate::errors::Result<EmailResult> {
    let job = manager.submit(user_id, JobKind::Single, vec![email.clone()], None, None)?;
    let job_id = job.id;
    let token = Uuid::new_v4();

    // Dropping this future mid-check (client gone) fails the job and releases its hold. A no-op
    // once the job is terminal.
    let _abandoned = scopeguard::guard((), |_| {
        if let Err(e) = manager.fail(job_id, None, "validation request was abandoned") {
            warn!(job_id = %abbrev_uuid(&job_id), error = %e, "Failed to release abandoned validation");
        }
    });
    manager.claim(job_id, token)?;

    match check_address(checker, 0, email, options, timeout).await {
        Ok(result) => match manager.record_result(job_id, token, result.clone())? {
            RecordOutcome::Recorded { .. } | RecordOutcome::Duplicate => {
                manager.complete(job_id, token)?;
                Ok(result)
            }
            RecordOutcome::Halt => Err(Error::Conflict {
                message: "validation was cancelled".to_string(),
            }),
        },
        Err(e) => {
            manager.fail(job_id, Some(token), &e.to_string())?;
            Err(e.into())
        }
    }
}

pub struct ValidationDaemon {
    manager: JobManager,
    checker: Arc<dyn EmailChecker>,
    config: DaemonConfig,
    check_timeout: Duration,
    semaphore: Arc<Semaphore>,
    jobs_in_flight: Arc<AtomicUsize>,
}

impl ValidationDaemon {
    pub fn new(manager: JobManager, checker: Arc<dyn EmailChecker>, config: DaemonConfig, check_timeout: Duration) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            manager,
            checker,
            config,
            check_timeout,
            semaphore,
            jobs_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn jobs_in_flight(&self) -> usize {
        self.jobs_in_flight.load(Ordering::Relaxed)
    }

    async fn idle(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.claim_interval) => {}
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            per_job_concurrency = self.config.per_job_concurrency,
            "Validation daemon starting"
        );
        let lease_timeout = chrono::Duration::from_std(self.config.lease_timeout).unwrap_or(chrono::Duration::MAX);
        let mut join_set: JoinSet<Result<()>> = JoinSet::new();

        while !shutdown.is_cancelled() {
            // Poll for completed tasks (non-blocking)
            while let Some(result) = join_set.try_join_next() {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!(error = %e, "Job task failed"),
                    Err(join_error) => tracing::error!(error = %join_error, "Job task panicked"),
                }
            }

            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                tracing::trace!("No job capacity, sleeping");
                self.idle(&shutdown).await;
                continue;
            };

            let Some(claimed) = self.manager.claim_next(Uuid::new_v4(), lease_timeout) else {
                tracing::trace!("No queued jobs, sleeping");
                drop(permit);
                self.idle(&shutdown).await;
                continue;
            };

            let manager = self.manager.clone();
            let checker = self.checker.clone();
            let concurrency = self.config.per_job_concurrency.max(1);
            let timeout = self.check_timeout;
            let jobs_in_flight = self.jobs_in_flight.clone();
            let shutdown = shutdown.clone();
            jobs_in_flight.fetch_add(1, Ordering::Relaxed);

            join_set.spawn(async move {
                let _permit = permit;
                let _guard = scopeguard::guard((), |_| {
                    jobs_in_flight.fetch_sub(1, Ordering::Relaxed);
                });
                process_job(&manager, checker, claimed, concurrency, timeout, &shutdown).await
            });
        }

        info!(in_flight = join_set.len(), "Validation daemon stopping");
        while let Some(result) = join_set.join_next().await {
            if let Ok(Err(e)) = result {
                tracing::error!(error = %e, "Job task failed during shutdown");
            }
        }
    }
}

async fn process_job(
    manager: &JobManager,
    checker: Arc<dyn EmailChecker>,
    claimed: ClaimedJob,
    concurrency: usize,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> Result<()> {
    let ClaimedJob { job_id, token, pending, .. } = claimed;
    info!(job_id = %abbrev_uuid(&job_id), pending = pending.len(), "Processing job");

    let options = CheckOptions::default();
    let mut results = pin!(
        stream::iter(pending)
            .map(move |(index, email)| {
                let checker = checker.clone();
                async move { check_address(checker.as_ref(), index, email, options, timeout).await }
            })
            .buffer_unordered(concurrency)
    );

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                // The lease goes stale and another worker resumes the job
                info!(job_id = %abbrev_uuid(&job_id), "Shutdown requested, leaving job for reclaim");
                return Ok(());
            }
            next = results.next() => next,
        };
        let Some(checked) = next else { break };

        match checked {
            Ok(result) => {
                if manager.record_result(job_id, token, result)? == RecordOutcome::Halt {
                    info!(job_id = %abbrev_uuid(&job_id), "Job no longer owned by this worker, stopping");
                    return Ok(());
                }
            }
            Err(e) => {
                warn!(job_id = %abbrev_uuid(&job_id), error = %e, "Fatal checker error");
                manager.fail(job_id, Some(token), &e.to_string())?;
                return Ok(());
            }
        }
    }

    manager.complete(job_id, token)?;
    Ok(())
}
