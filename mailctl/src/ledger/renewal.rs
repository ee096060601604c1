//! Background task resetting plan credits at the end of each billing period.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Ledger;

/// Check for due renewals every `interval` until `shutdown` is cancelled.
pub async fn run_plan_renewer(ledger: Ledger, interval: Duration, shutdown: CancellationToken) {
    info!(interval = ?interval, "Starting plan renewer");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Plan renewer shutting down");
                break;
            }
            _ = ticker.tick() => {
                let renewed = ledger.renew_due(Utc::now());
                debug!(renewed, "Plan renewal sweep finished");
            }
        }
    }
}
