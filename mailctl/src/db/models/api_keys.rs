use chrono::{DateTime, Utc};

use crate::types::{ApiKeyId, UserId};

/// Stored API key. The raw secret is never stored, only its digest and a preview.
#[derive(Debug, Clone)]
pub struct ApiKeyDBResponse {
    pub id: ApiKeyId,
    pub user_id: UserId,
    pub name: String,
    pub key_hash: String,
    pub preview: String,
    pub is_active: bool,
    pub usage_count: u64,
    pub rate_limit_per_minute: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ApiKeyCreateDBRequest {
    pub user_id: UserId,
    pub name: String,
    pub key_hash: String,
    pub preview: String,
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ApiKeyUpdateDBRequest {
    pub name: Option<String>,
    pub rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ApiKeyFilter {
    pub user_id: Option<UserId>,
    pub is_active: Option<bool>,
    pub skip: i64,
    pub limit: i64,
}

impl ApiKeyFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            user_id: None,
            is_active: None,
            skip,
            limit,
        }
    }
}
