//! Job lifecycle operations.
//!
//! [`JobManager`] is the only writer of job records. Every transition happens under the job's own
//! lock, and anything that moves credits (commit, settle, release) is done while that lock is held,
//! so a job's progress and the credits consumed for it can never disagree. Lock order is job, then
//! ledger account.
//!
//! Webhooks for terminal transitions are queued after the job lock is released.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::error::{JobError, Result};
use super::store::{JobEntry, JobStore, Lease, SharedEntry};
use super::types::{EmailResult, Job, JobFilter, JobKind, JobStatus, VerdictCounts};
use crate::db::handlers::paginate;
use crate::ledger::Ledger;
use crate::types::{Credits, JobId, UserId, abbrev_uuid};
use crate::webhooks::{WebhookEvent, WebhookSender};

/// Work handed to a worker that claimed a job.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: JobId,
    pub user_id: UserId,
    pub token: Uuid,
    /// `(index, address)` pairs that still need a result
    pub pending: Vec<(usize, String)>,
}

/// What happened to a submitted per-address result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { processed: u64, total: u64 },
    /// The address already had a result, nothing was charged
    Duplicate,
    /// The job is no longer ours to write (cancelled, failed, or the lease was reclaimed)
    Halt,
}

#[derive(Clone)]
pub struct JobManager {
    store: JobStore,
    ledger: Ledger,
    webhooks: Option<WebhookSender>,
    unit_cost: Credits,
}

fn transition(job: &mut Job, next: JobStatus) -> Result<()> {
    if job.status.is_terminal() {
        return Err(JobError::AlreadyTerminal {
            id: job.id,
            status: job.status,
        });
    }
    if !job.status.can_transition_to(next) {
        return Err(JobError::InvalidTransition { from: job.status, to: next });
    }
    debug!(job_id = %abbrev_uuid(&job.id), from = %job.status, to = %next, "Job transition");
    job.status = next;
    Ok(())
}

impl JobManager {
    pub fn new(store: JobStore, ledger: Ledger, webhooks: Option<WebhookSender>, unit_cost: Credits) -> Self {
        Self {
            store,
            ledger,
            webhooks,
            unit_cost,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn unit_cost(&self) -> Credits {
        self.unit_cost
    }

    /// Reserve credits for `emails` and create a queued job.
    ///
    /// If the reservation is refused no job is created.
    #[instrument(skip(self, emails, webhook_url, source_filename), fields(user_id = %abbrev_uuid(&user_id), total = emails.len()), err)]
    pub fn submit(
        &self,
        user_id: UserId,
        kind: JobKind,
        emails: Vec<String>,
        webhook_url: Option<String>,
        source_filename: Option<String>,
    ) -> Result<Job> {
        if emails.is_empty() {
            return Err(JobError::Empty);
        }
        let id = Uuid::new_v4();
        let total = emails.len() as u64;
        let cost = (total as Credits).saturating_mul(self.unit_cost);
        let reservation = self.ledger.reserve(user_id, cost, Some(id))?;

        let job = Job {
            id,
            user_id,
            kind,
            status: JobStatus::CreditsReserved,
            total_emails: total,
            processed_emails: 0,
            counts: VerdictCounts::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            webhook_url,
            result_file: None,
            source_filename,
            error: None,
            credits_reserved: cost,
            credits_consumed: 0,
            credits_refunded: 0,
        };
        let shared = self.store.insert(JobEntry::new(job, emails, reservation));
        let mut entry = shared.lock();
        transition(&mut entry.job, JobStatus::Queued)?;

        counter!("mailctl_jobs_submitted_total", "kind" => match kind {
            JobKind::Single => "single",
            JobKind::Bulk => "bulk",
        })
        .increment(1);
        info!(job_id = %abbrev_uuid(&id), cost, "Job queued");
        Ok(entry.job.clone())
    }

    /// Look up a job. With `owner` set, jobs belonging to anyone else are reported as missing.
    fn entry_for(&self, id: JobId, owner: Option<UserId>) -> Result<SharedEntry> {
        let shared = self.store.get(id).ok_or(JobError::NotFound(id))?;
        if let Some(owner) = owner
            && shared.lock().job.user_id != owner
        {
            return Err(JobError::NotFound(id));
        }
        Ok(shared)
    }

    pub fn get(&self, id: JobId, owner: Option<UserId>) -> Result<Job> {
        Ok(self.entry_for(id, owner)?.lock().job.clone())
    }

    /// Matching jobs, newest first, with the total before pagination.
    pub fn list(&self, filter: &JobFilter) -> (Vec<Job>, usize) {
        let mut jobs: Vec<Job> = self
            .store
            .all()
            .into_iter()
            .map(|entry| entry.lock().job.clone())
            .filter(|job| filter.user_id.is_none_or(|user| job.user_id == user))
            .filter(|job| filter.status.is_none_or(|status| job.status == status))
            .filter(|job| filter.kind.is_none_or(|kind| job.kind == kind))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        let total = jobs.len();
        (paginate(jobs, filter.skip, filter.limit), total)
    }

    /// Recorded results in submission order, paginated, with the recorded total.
    pub fn results(&self, id: JobId, owner: Option<UserId>, skip: i64, limit: i64) -> Result<(Vec<EmailResult>, usize)> {
        let shared = self.entry_for(id, owner)?;
        let entry = shared.lock();
        let recorded = entry.results.iter().flatten();
        let total = recorded.clone().count();
        Ok((paginate(recorded.cloned(), skip, limit), total))
    }

    pub fn all_results(&self, id: JobId, owner: Option<UserId>) -> Result<Vec<EmailResult>> {
        let shared = self.entry_for(id, owner)?;
        let entry = shared.lock();
        Ok(entry.results.iter().flatten().cloned().collect())
    }

    /// Close out the job's reservation and move it to a terminal state. Caller holds the job lock.
    fn finish_locked(&self, entry: &mut JobEntry, status: JobStatus, error: Option<String>) -> Result<()> {
        transition(&mut entry.job, status)?;
        if let Some(reservation) = entry.reservation {
            let consumed = entry.job.credits_consumed;
            let settlement = self
                .ledger
                .settle(reservation, consumed, entry.job.credits_reserved - consumed)?;
            entry.reservation = None;
            entry.job.credits_consumed = settlement.consumed;
            entry.job.credits_refunded = settlement.refunded;
        }

        let job = &mut entry.job;
        job.completed_at = Some(Utc::now());
        job.error = error;
        if status == JobStatus::Completed {
            job.result_file = Some(format!("/api/v1/validate/jobs/{}/results?format=csv", job.id));
        }
        entry.lease = None;

        counter!("mailctl_jobs_finished_total", "status" => status.to_string()).increment(1);
        info!(
            job_id = %abbrev_uuid(&entry.job.id),
            status = %status,
            processed = entry.job.processed_emails,
            consumed = entry.job.credits_consumed,
            refunded = entry.job.credits_refunded,
            "Job finished"
        );
        Ok(())
    }

    fn notify(&self, job: &Job) {
        if let (Some(sender), Some(url)) = (&self.webhooks, &job.webhook_url)
            && let Some(event) = WebhookEvent::job_terminal(job)
        {
            sender.notify(url, &event);
        }
    }

    /// Cancel a job and refund whatever it has not consumed.
    ///
    /// Cancelling an already cancelled job is a no-op and returns `false`. Other terminal states
    /// are a conflict.
    #[instrument(skip(self), fields(job_id = %abbrev_uuid(&id)), err)]
    pub fn cancel(&self, id: JobId, owner: Option<UserId>) -> Result<(Job, bool)> {
        let shared = self.entry_for(id, owner)?;
        let job = {
            let mut entry = shared.lock();
            if entry.job.status == JobStatus::Cancelled {
                return Ok((entry.job.clone(), false));
            }
            self.finish_locked(&mut entry, JobStatus::Cancelled, None)?;
            entry.job.clone()
        };
        self.notify(&job);
        Ok((job, true))
    }

    /// Claim the oldest bulk job that needs a worker.
    ///
    /// Queued jobs move to `processing`. Processing jobs whose lease heartbeat is older than
    /// `lease_timeout` are taken over and resume from their unrecorded addresses.
    pub fn claim_next(&self, token: Uuid, lease_timeout: Duration) -> Option<ClaimedJob> {
        let now = Utc::now();
        let is_claimable = |entry: &JobEntry| {
            entry.job.kind == JobKind::Bulk
                && match entry.job.status {
                    JobStatus::Queued => true,
                    JobStatus::Processing => entry.lease.is_none_or(|lease| now - lease.heartbeat > lease_timeout),
                    _ => false,
                }
        };

        let mut candidates: Vec<(DateTime<Utc>, SharedEntry)> = self
            .store
            .all()
            .into_iter()
            .filter_map(|shared| {
                let created_at = {
                    let entry = shared.lock();
                    is_claimable(&*entry).then_some(entry.job.created_at)
                }?;
                Some((created_at, shared))
            })
            .collect();
        candidates.sort_by_key(|(created_at, _)| *created_at);

        for (_, shared) in candidates {
            let mut entry = shared.lock();
            // Someone else may have claimed it since the scan
            if !is_claimable(&*entry) {
                continue;
            }
            if entry.job.status == JobStatus::Queued {
                if transition(&mut entry.job, JobStatus::Processing).is_err() {
                    continue;
                }
                entry.job.started_at = Some(now);
            } else {
                warn!(job_id = %abbrev_uuid(&entry.job.id), "Reclaiming job with stale lease");
            }
            entry.lease = Some(Lease { token, heartbeat: now });
            return Some(ClaimedJob {
                job_id: entry.job.id,
                user_id: entry.job.user_id,
                token,
                pending: entry.pending(),
            });
        }
        None
    }

    /// Claim a specific queued job for inline processing.
    pub fn claim(&self, id: JobId, token: Uuid) -> Result<ClaimedJob> {
        let shared = self.entry_for(id, None)?;
        let mut entry = shared.lock();
        transition(&mut entry.job, JobStatus::Processing)?;
        let now = Utc::now();
        entry.job.started_at = Some(now);
        entry.lease = Some(Lease { token, heartbeat: now });
        Ok(ClaimedJob {
            job_id: id,
            user_id: entry.job.user_id,
            token,
            pending: entry.pending(),
        })
    }

    /// Record one address result and commit its credit.
    ///
    /// The credit commit and the progress update happen under the job lock, so a replayed result
    /// is never charged twice.
    pub fn record_result(&self, id: JobId, token: Uuid, result: EmailResult) -> Result<RecordOutcome> {
        let shared = self.store.get(id).ok_or(JobError::NotFound(id))?;
        let mut entry = shared.lock();
        if entry.job.status != JobStatus::Processing || !entry.holds_lease(token) {
            return Ok(RecordOutcome::Halt);
        }
        let index = result.index;
        match entry.results.get(index) {
            Some(None) => {}
            Some(Some(_)) => return Ok(RecordOutcome::Duplicate),
            None => {
                warn!(job_id = %abbrev_uuid(&id), index, "Result index out of range");
                return Ok(RecordOutcome::Duplicate);
            }
        }

        let consumed_total = (entry.job.processed_emails + 1) as Credits * self.unit_cost;
        if let Some(reservation) = entry.reservation {
            self.ledger.commit_usage(reservation, consumed_total)?;
        }

        entry.job.processed_emails += 1;
        entry.job.counts.record(result.status);
        entry.job.credits_consumed = consumed_total;
        entry.results[index] = Some(result);
        if let Some(lease) = entry.lease.as_mut() {
            lease.heartbeat = Utc::now();
        }
        Ok(RecordOutcome::Recorded {
            processed: entry.job.processed_emails,
            total: entry.job.total_emails,
        })
    }

    /// Finish a processed job. Returns `None` if the worker no longer owns it.
    #[instrument(skip(self, token), fields(job_id = %abbrev_uuid(&id)), err)]
    pub fn complete(&self, id: JobId, token: Uuid) -> Result<Option<Job>> {
        let shared = self.store.get(id).ok_or(JobError::NotFound(id))?;
        let job = {
            let mut entry = shared.lock();
            if entry.job.status != JobStatus::Processing || !entry.holds_lease(token) {
                return Ok(None);
            }
            let unprocessed = entry.job.total_emails - entry.job.processed_emails;
            if unprocessed == 0 {
                self.finish_locked(&mut entry, JobStatus::Completed, None)?;
            } else {
                let reason = format!("finished with {unprocessed} unprocessed addresses");
                self.finish_locked(&mut entry, JobStatus::Failed, Some(reason))?;
            }
            entry.job.clone()
        };
        self.notify(&job);
        Ok(Some(job))
    }

    /// Fail a job and refund its unconsumed credits.
    ///
    /// With `lease` set, the call only applies while that lease is held. Jobs that never started
    /// pass through `processing` so the recorded history stays a legal path. Returns `None` if
    /// nothing changed.
    #[instrument(skip(self, lease), fields(job_id = %abbrev_uuid(&id)), err)]
    pub fn fail(&self, id: JobId, lease: Option<Uuid>, reason: &str) -> Result<Option<Job>> {
        let shared = self.store.get(id).ok_or(JobError::NotFound(id))?;
        let job = {
            let mut entry = shared.lock();
            if entry.job.status.is_terminal() || lease.is_some_and(|token| !entry.holds_lease(token)) {
                return Ok(None);
            }
            self.fail_locked(&mut entry, reason)?;
            entry.job.clone()
        };
        self.notify(&job);
        Ok(Some(job))
    }

    fn fail_locked(&self, entry: &mut JobEntry, reason: &str) -> Result<()> {
        if entry.job.status == JobStatus::CreditsReserved {
            transition(&mut entry.job, JobStatus::Queued)?;
        }
        if entry.job.status == JobStatus::Queued {
            transition(&mut entry.job, JobStatus::Processing)?;
            entry.job.started_at.get_or_insert_with(Utc::now);
        }
        warn!(job_id = %abbrev_uuid(&entry.job.id), reason, "Failing job");
        self.finish_locked(entry, JobStatus::Failed, Some(reason.to_string()))
    }

    /// Force-fail every live job older than `max_duration` at `now`.
    ///
    /// A started job's age runs from its first claim, so time spent waiting in the queue does not
    /// count against its run. A job that never started is aged from creation, so a queue that never
    /// drains still ends every job.
    pub fn watchdog_sweep(&self, now: DateTime<Utc>, max_duration: Duration) -> usize {
        let mut failed = Vec::new();
        for shared in self.store.all() {
            let mut entry = shared.lock();
            let since = entry.job.started_at.unwrap_or(entry.job.created_at);
            if entry.job.status.is_terminal() || now - since <= max_duration {
                continue;
            }
            match self.fail_locked(&mut entry, "exceeded maximum duration") {
                Ok(()) => failed.push(entry.job.clone()),
                Err(e) => warn!(job_id = %abbrev_uuid(&entry.job.id), error = %e, "Watchdog could not fail job"),
            }
        }
        for job in &failed {
            self.notify(job);
        }
        failed.len()
    }

    /// Cancel and remove every job owned by `user_id`. Returns the number of jobs removed.
    pub fn delete_user_jobs(&self, user_id: UserId) -> Result<usize> {
        let mut removed = 0;
        for id in self.store.ids_for_user(user_id) {
            match self.cancel(id, None) {
                Ok(_) | Err(JobError::AlreadyTerminal { .. }) => {}
                Err(e) => return Err(e),
            }
            if self.store.remove(id) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::Checks;
    use crate::db::Database;
    use crate::jobs::types::Verdict;
    use crate::config::WebhookConfig;
    use crate::ledger::LedgerError;
    use rust_decimal::Decimal;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn setup(credits: Credits) -> (JobManager, UserId) {
        setup_with(credits, None)
    }

    fn setup_with(credits: Credits, webhooks: Option<WebhookSender>) -> (JobManager, UserId) {
        let db = Database::new();
        let ledger = Ledger::new(db);
        let user = Uuid::new_v4();
        ledger.open_account(user, None).unwrap();
        if credits > 0 {
            ledger
                .credit_purchase(user, credits, Decimal::ZERO, "seed".to_string(), None)
                .unwrap();
        }
        (JobManager::new(JobStore::new(), ledger, webhooks, 1), user)
    }

    fn webhook_sender(shutdown: &CancellationToken) -> WebhookSender {
        let config = WebhookConfig {
            timeout_secs: 5,
            max_concurrent_sends: 4,
            channel_capacity: 10,
            signing_secret: None,
        };
        WebhookSender::spawn(&config, shutdown.clone()).unwrap().0
    }

    fn emails(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user{i}@example.com")).collect()
    }

    fn result(index: usize, email: &str, status: Verdict) -> EmailResult {
        EmailResult {
            index,
            email: email.to_string(),
            status,
            score: 50,
            checks: Checks::default(),
            error: None,
            response_time_ms: 1,
        }
    }

    fn process(manager: &JobManager, claimed: &ClaimedJob, n: usize) {
        for (index, email) in claimed.pending.iter().take(n) {
            let outcome = manager
                .record_result(claimed.job_id, claimed.token, result(*index, email, Verdict::Valid))
                .unwrap();
            assert!(matches!(outcome, RecordOutcome::Recorded { .. }));
        }
    }

    #[test]
    fn test_submit_reserves_and_queues() {
        let (manager, user) = setup(10);
        let job = manager.submit(user, JobKind::Bulk, emails(4), None, None).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.credits_reserved, 4);

        let balance = manager.ledger().balance(user).unwrap();
        assert_eq!(balance.balance, 10);
        assert_eq!(balance.reserved, 4);
        assert_eq!(balance.available, 6);
    }

    #[test]
    fn test_insufficient_credits_creates_no_job() {
        let (manager, user) = setup(3);
        let err = manager.submit(user, JobKind::Bulk, emails(4), None, None).unwrap_err();
        assert!(matches!(
            err,
            JobError::Ledger(LedgerError::InsufficientCredits { required: 4, available: 3 })
        ));
        assert_eq!(manager.list(&JobFilter::new(0, 10)).1, 0);
        assert_eq!(manager.ledger().balance(user).unwrap().reserved, 0);
    }

    #[test]
    fn test_empty_submission_rejected() {
        let (manager, user) = setup(3);
        assert!(matches!(
            manager.submit(user, JobKind::Bulk, vec![], None, None),
            Err(JobError::Empty)
        ));
    }

    #[test]
    fn test_full_run_completes_and_charges() {
        let (manager, user) = setup(10);
        let job = manager.submit(user, JobKind::Bulk, emails(3), None, None).unwrap();
        let claimed = manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).unwrap();
        assert_eq!(claimed.job_id, job.id);
        assert_eq!(claimed.pending.len(), 3);

        process(&manager, &claimed, 3);
        let done = manager.complete(job.id, claimed.token).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.processed_emails, 3);
        assert_eq!(done.counts.total(), 3);
        assert_eq!(done.credits_consumed, 3);
        assert_eq!(done.credits_refunded, 0);
        assert!(done.result_file.unwrap().ends_with("format=csv"));

        let balance = manager.ledger().balance(user).unwrap();
        assert_eq!(balance.balance, 7);
        assert_eq!(balance.reserved, 0);
    }

    #[test]
    fn test_cancel_mid_processing_refunds_remainder() {
        let (manager, user) = setup(100);
        let job = manager.submit(user, JobKind::Bulk, emails(100), None, None).unwrap();
        let claimed = manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).unwrap();
        process(&manager, &claimed, 40);

        let (cancelled, changed) = manager.cancel(job.id, Some(user)).unwrap();
        assert!(changed);
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(cancelled.credits_consumed, 40);
        assert_eq!(cancelled.credits_refunded, 60);

        let balance = manager.ledger().balance(user).unwrap();
        assert_eq!(balance.balance, 60);
        assert_eq!(balance.available, 60);

        // Worker notices on its next write
        let (index, email) = &claimed.pending[40];
        let outcome = manager
            .record_result(job.id, claimed.token, result(*index, email, Verdict::Valid))
            .unwrap();
        assert_eq!(outcome, RecordOutcome::Halt);
        assert_eq!(manager.ledger().balance(user).unwrap().balance, 60);
    }

    #[test]
    fn test_double_cancel_is_noop() {
        let (manager, user) = setup(10);
        let job = manager.submit(user, JobKind::Bulk, emails(5), None, None).unwrap();
        assert!(manager.cancel(job.id, None).unwrap().1);
        let (again, changed) = manager.cancel(job.id, None).unwrap();
        assert!(!changed);
        assert_eq!(again.credits_refunded, 5);
        assert_eq!(manager.ledger().balance(user).unwrap().balance, 10);
    }

    #[test]
    fn test_cancel_completed_job_conflicts() {
        let (manager, user) = setup(10);
        let job = manager.submit(user, JobKind::Bulk, emails(1), None, None).unwrap();
        let claimed = manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).unwrap();
        process(&manager, &claimed, 1);
        manager.complete(job.id, claimed.token).unwrap();

        assert!(matches!(
            manager.cancel(job.id, Some(user)),
            Err(JobError::AlreadyTerminal {
                status: JobStatus::Completed,
                ..
            })
        ));
    }

    #[test]
    fn test_other_users_cannot_see_job() {
        let (manager, user) = setup(10);
        let job = manager.submit(user, JobKind::Bulk, emails(1), None, None).unwrap();
        assert!(matches!(manager.get(job.id, Some(Uuid::new_v4())), Err(JobError::NotFound(_))));
        assert!(matches!(manager.cancel(job.id, Some(Uuid::new_v4())), Err(JobError::NotFound(_))));
        assert!(manager.get(job.id, Some(user)).is_ok());
    }

    #[test]
    fn test_duplicate_results_are_not_charged() {
        let (manager, user) = setup(10);
        let job = manager.submit(user, JobKind::Bulk, emails(2), None, None).unwrap();
        let claimed = manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).unwrap();
        let first = result(0, "user0@example.com", Verdict::Invalid);
        manager.record_result(job.id, claimed.token, first.clone()).unwrap();
        assert_eq!(
            manager.record_result(job.id, claimed.token, first).unwrap(),
            RecordOutcome::Duplicate
        );

        let job = manager.get(job.id, None).unwrap();
        assert_eq!(job.processed_emails, 1);
        assert_eq!(job.counts.invalid_count, 1);
        assert_eq!(manager.ledger().balance(user).unwrap().balance, 9);
    }

    #[test]
    fn test_stale_lease_is_reclaimed_and_resumes() {
        let (manager, user) = setup(10);
        let job = manager.submit(user, JobKind::Bulk, emails(3), None, None).unwrap();
        let first = manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).unwrap();
        process(&manager, &first, 1);

        // Fresh lease: nothing to claim
        assert!(manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).is_none());

        let second = manager.claim_next(Uuid::new_v4(), Duration::seconds(-1)).unwrap();
        assert_eq!(second.job_id, job.id);
        assert_eq!(second.pending.len(), 2);

        // The old worker lost its lease
        let (index, email) = &first.pending[1];
        assert_eq!(
            manager
                .record_result(job.id, first.token, result(*index, email, Verdict::Valid))
                .unwrap(),
            RecordOutcome::Halt
        );
        assert!(manager.complete(job.id, first.token).unwrap().is_none());

        process(&manager, &second, 2);
        let done = manager.complete(job.id, second.token).unwrap().unwrap();
        assert_eq!(done.processed_emails, 3);
        assert_eq!(manager.ledger().balance(user).unwrap().balance, 7);
    }

    #[test]
    fn test_claim_order_is_oldest_first_and_skips_single_jobs() {
        let (manager, user) = setup(10);
        manager.submit(user, JobKind::Single, emails(1), None, None).unwrap();
        let older = manager.submit(user, JobKind::Bulk, emails(1), None, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let newer = manager.submit(user, JobKind::Bulk, emails(1), None, None).unwrap();

        let token = Uuid::new_v4();
        assert_eq!(manager.claim_next(token, Duration::minutes(2)).unwrap().job_id, older.id);
        assert_eq!(manager.claim_next(token, Duration::minutes(2)).unwrap().job_id, newer.id);
        assert!(manager.claim_next(token, Duration::minutes(2)).is_none());
    }

    #[test]
    fn test_fail_refunds_unprocessed() {
        let (manager, user) = setup(10);
        let job = manager.submit(user, JobKind::Bulk, emails(5), None, None).unwrap();
        let claimed = manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).unwrap();
        process(&manager, &claimed, 2);

        let failed = manager.fail(job.id, Some(claimed.token), "checker rejected request").unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("checker rejected request"));
        assert_eq!(failed.credits_refunded, 3);
        assert_eq!(manager.ledger().balance(user).unwrap().balance, 8);

        assert!(manager.fail(job.id, None, "again").unwrap().is_none());
    }

    #[test]
    fn test_watchdog_fails_overdue_jobs() {
        let (manager, user) = setup(10);
        let queued = manager.submit(user, JobKind::Bulk, emails(2), None, None).unwrap();
        let swept = manager.watchdog_sweep(Utc::now() + Duration::hours(7), Duration::hours(6));
        assert_eq!(swept, 1);

        let job = manager.get(queued.id, None).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("exceeded maximum duration"));
        assert!(job.started_at.is_some());
        assert_eq!(manager.ledger().balance(user).unwrap().available, 10);

        assert_eq!(manager.watchdog_sweep(Utc::now() + Duration::hours(7), Duration::hours(6)), 0);
    }

    #[test]
    fn test_watchdog_ages_started_jobs_from_first_claim() {
        let (manager, user) = setup(10);
        let job = manager.submit(user, JobKind::Bulk, emails(2), None, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(60));
        manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).unwrap();

        let started_at = manager.get(job.id, None).unwrap().started_at.unwrap();
        let max = Duration::milliseconds(40);
        assert!(started_at - job.created_at > max);

        // Overdue counted from creation, but not from the claim
        assert_eq!(manager.watchdog_sweep(started_at + Duration::milliseconds(10), max), 0);
        assert_eq!(manager.get(job.id, None).unwrap().status, JobStatus::Processing);

        assert_eq!(manager.watchdog_sweep(started_at + Duration::milliseconds(50), max), 1);
        assert_eq!(manager.get(job.id, None).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_terminal_transitions_send_one_webhook_each() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/done"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cancelled"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let shutdown = CancellationToken::new();
        let (manager, user) = setup_with(10, Some(webhook_sender(&shutdown)));

        let done = manager
            .submit(user, JobKind::Bulk, emails(2), Some(format!("{}/done", server.uri())), None)
            .unwrap();
        let claimed = manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).unwrap();
        assert_eq!(claimed.job_id, done.id);
        process(&manager, &claimed, 2);
        assert!(manager.complete(done.id, claimed.token).unwrap().is_some());
        assert!(manager.complete(done.id, claimed.token).unwrap().is_none());
        assert!(manager.fail(done.id, None, "late").unwrap().is_none());

        let cancelled = manager
            .submit(user, JobKind::Bulk, emails(3), Some(format!("{}/cancelled", server.uri())), None)
            .unwrap();
        let claimed = manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).unwrap();
        assert_eq!(claimed.job_id, cancelled.id);
        process(&manager, &claimed, 1);
        assert!(manager.cancel(cancelled.id, None).unwrap().1);
        assert!(!manager.cancel(cancelled.id, None).unwrap().1);

        let (index, email) = &claimed.pending[1];
        let late = manager
            .record_result(cancelled.id, claimed.token, result(*index, email, Verdict::Valid))
            .unwrap();
        assert_eq!(late, RecordOutcome::Halt);
        assert!(manager.complete(cancelled.id, claimed.token).unwrap().is_none());

        for _ in 0..200 {
            if server.received_requests().await.unwrap_or_default().len() >= 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        // Room for any extra delivery to show up
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
        server.verify().await;

        shutdown.cancel();
    }

    #[test]
    fn test_counts_always_sum_to_processed() {
        let (manager, user) = setup(20);
        let job = manager.submit(user, JobKind::Bulk, emails(6), None, None).unwrap();
        let claimed = manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).unwrap();
        let verdicts = [
            Verdict::Valid,
            Verdict::Invalid,
            Verdict::CatchAll,
            Verdict::Disposable,
            Verdict::RoleBased,
            Verdict::Unknown,
        ];
        for ((index, email), verdict) in claimed.pending.iter().zip(verdicts) {
            manager
                .record_result(job.id, claimed.token, result(*index, email, verdict))
                .unwrap();
            let current = manager.get(job.id, None).unwrap();
            assert_eq!(current.counts.total(), current.processed_emails);
            assert!(current.processed_emails <= current.total_emails);
        }
    }

    #[test]
    fn test_results_are_paginated_in_order() {
        let (manager, user) = setup(10);
        let job = manager.submit(user, JobKind::Bulk, emails(5), None, None).unwrap();
        let claimed = manager.claim_next(Uuid::new_v4(), Duration::minutes(2)).unwrap();
        for (index, email) in claimed.pending.iter().rev() {
            manager
                .record_result(job.id, claimed.token, result(*index, email, Verdict::Valid))
                .unwrap();
        }
        let (page, total) = manager.results(job.id, Some(user), 2, 2).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.iter().map(|r| r.index).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_delete_user_jobs_refunds_and_removes() {
        let (manager, user) = setup(10);
        manager.submit(user, JobKind::Bulk, emails(3), None, None).unwrap();
        manager.submit(user, JobKind::Bulk, emails(2), None, None).unwrap();
        assert_eq!(manager.delete_user_jobs(user).unwrap(), 2);
        assert_eq!(manager.list(&JobFilter::new(0, 10)).1, 0);
        assert_eq!(manager.ledger().balance(user).unwrap().reserved, 0);
    }

    #[test]
    fn test_list_filters_by_user_and_status() {
        let (manager, user) = setup(10);
        let other = Uuid::new_v4();
        manager.ledger().open_account(other, None).unwrap();
        manager
            .ledger()
            .credit_purchase(other, 5, Decimal::ZERO, "seed".to_string(), None)
            .unwrap();
        let mine = manager.submit(user, JobKind::Bulk, emails(1), None, None).unwrap();
        manager.submit(other, JobKind::Bulk, emails(1), None, None).unwrap();
        manager.cancel(mine.id, None).unwrap();

        let mut filter = JobFilter::new(0, 10);
        filter.user_id = Some(user);
        let (jobs, total) = manager.list(&filter);
        assert_eq!(total, 1);
        assert_eq!(jobs[0].id, mine.id);

        filter.user_id = None;
        filter.status = Some(JobStatus::Queued);
        assert_eq!(manager.list(&filter).1, 1);
    }
}
