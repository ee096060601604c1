use chrono::{DateTime, Utc};

use crate::types::ServerId;

/// Entry in the validation-server pool.
#[derive(Debug, Clone)]
pub struct ServerDBResponse {
    pub id: ServerId,
    pub name: String,
    pub url: String,
    pub weight: u32,
    pub is_healthy: bool,
    pub response_time_ms: Option<u64>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ServerCreateDBRequest {
    pub name: String,
    pub url: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ServerUpdateDBRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub weight: Option<u32>,
    pub is_healthy: Option<bool>,
}

/// Outcome of a health probe, stored on the server record.
#[derive(Debug, Clone)]
pub struct ServerHealthUpdate {
    pub is_healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ServerFilter {
    pub healthy_only: bool,
}
