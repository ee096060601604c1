//! Validation-server pool: weighted selection and health probing.

use std::time::{Duration, Instant};

use chrono::Utc;
use rand::prelude::RngExt;
use rand::rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::db::{
    Database,
    errors::Result,
    handlers::{Repository, Servers},
    models::servers::{ServerDBResponse, ServerFilter, ServerHealthUpdate},
};
use crate::types::{ServerId, abbrev_uuid};

/// Result of probing `{url}/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProbeResult {
    pub is_healthy: bool,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ServerPool {
    db: Database,
    client: reqwest::Client,
}

/// Pick the server whose cumulative weight range contains `roll`, with `roll < total weight`.
pub fn pick_weighted(servers: &[ServerDBResponse], roll: u64) -> Option<&ServerDBResponse> {
    let mut cursor = roll;
    for server in servers {
        let weight = u64::from(server.weight);
        if cursor < weight {
            return Some(server);
        }
        cursor -= weight;
    }
    None
}

impl ServerPool {
    pub fn new(db: Database, probe_timeout: Duration) -> anyhow::Result<Self> {
        let client = crate::crypto::http_client(probe_timeout)?;
        Ok(Self { db, client })
    }

    /// Weighted random choice among healthy servers.
    pub fn pick(&self) -> Result<Option<ServerDBResponse>> {
        let healthy = Servers::new(&self.db).list(&ServerFilter { healthy_only: true })?;
        let total: u64 = healthy.iter().map(|s| u64::from(s.weight)).sum();
        if total == 0 {
            return Ok(None);
        }
        let roll = rng().random_range(0..total);
        Ok(pick_weighted(&healthy, roll).cloned())
    }

    pub async fn probe(&self, url: &str) -> ProbeResult {
        let started = Instant::now();
        let outcome = self.client.get(format!("{}/health", url.trim_end_matches('/'))).send().await;
        let response_time_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(response) if response.status().is_success() => ProbeResult {
                is_healthy: true,
                response_time_ms,
                error: None,
            },
            Ok(response) => ProbeResult {
                is_healthy: false,
                response_time_ms,
                error: Some(format!("HTTP {}", response.status().as_u16())),
            },
            Err(e) => ProbeResult {
                is_healthy: false,
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }

    /// Probe a registered server and store the result. `None` if the server does not exist.
    pub async fn probe_and_record(&self, id: ServerId) -> Result<Option<ServerDBResponse>> {
        let Some(server) = Servers::new(&self.db).get_by_id(id)? else {
            return Ok(None);
        };
        let result = self.probe(&server.url).await;
        if !result.is_healthy && server.is_healthy {
            warn!(server = %server.name, error = ?result.error, "Validation server became unhealthy");
        }
        let update = ServerHealthUpdate {
            is_healthy: result.is_healthy,
            response_time_ms: result.response_time_ms,
            error: result.error,
            checked_at: Utc::now(),
        };
        Servers::new(&self.db).record_probe(id, &update).map(Some)
    }

    pub async fn probe_all(&self) -> Result<usize> {
        let servers = Servers::new(&self.db).list(&ServerFilter::default())?;
        let mut healthy = 0;
        for server in servers {
            if let Some(updated) = self.probe_and_record(server.id).await?
                && updated.is_healthy
            {
                healthy += 1;
            }
        }
        Ok(healthy)
    }
}

/// Refresh pool health every `interval` until `shutdown` is cancelled.
pub async fn run_health_prober(pool: ServerPool, interval: Duration, shutdown: CancellationToken) {
    info!(interval = ?interval, "Starting server health prober");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Server health prober shutting down");
                break;
            }
            _ = ticker.tick() => {
                match pool.probe_all().await {
                    Ok(healthy) => debug!(healthy, "Server health sweep finished"),
                    Err(e) => warn!(error = %e, "Server health sweep failed"),
                }
            }
        }
    }
}
