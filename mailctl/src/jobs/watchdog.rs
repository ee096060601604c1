//! Force-fails jobs that have been alive longer than the configured ceiling.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::JobManager;

pub async fn run_watchdog(manager: JobManager, interval: Duration, max_job_duration: Duration, shutdown: CancellationToken) {
    let max_job_duration = chrono::Duration::from_std(max_job_duration).unwrap_or(chrono::Duration::MAX);
    info!(interval = ?interval, max_job_duration = %max_job_duration, "Starting job watchdog");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Job watchdog shutting down");
                break;
            }
            _ = ticker.tick() => {
                let failed = manager.watchdog_sweep(Utc::now(), max_job_duration);
                if failed > 0 {
                    warn!(failed, "Watchdog failed overdue jobs");
                } else {
                    debug!("Watchdog sweep found nothing overdue");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::jobs::{JobKind, JobStatus, JobStore};
    use crate::ledger::Ledger;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_watchdog_fails_stuck_job() {
        let ledger = Ledger::new(Database::new());
        let user = Uuid::new_v4();
        ledger.open_account(user, None).unwrap();
        ledger
            .credit_purchase(user, 3, Decimal::ZERO, "seed".to_string(), None)
            .unwrap();
        let manager = JobManager::new(JobStore::new(), ledger, None, 1);
        let job = manager
            .submit(user, JobKind::Bulk, vec!["a@example.io".to_string()], None, None)
            .unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_watchdog(
            manager.clone(),
            Duration::from_millis(10),
            Duration::ZERO,
            shutdown.clone(),
        ));

        let mut status = JobStatus::Queued;
        for _ in 0..100 {
            status = manager.get(job.id, None).unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(manager.ledger().balance(user).unwrap().available, 3);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
