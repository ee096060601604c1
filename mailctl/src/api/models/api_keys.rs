//! API request/response models for API keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

use super::pagination::PageQuery;
use crate::db::models::api_keys::ApiKeyDBResponse;
use crate::types::{ApiKeyId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyCreate {
    pub name: String,
    /// Defaults to the platform limit
    pub rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyUpdate {
    pub name: Option<String>,
    pub rate_limit_per_minute: Option<u32>,
}

/// Key metadata. Never contains the secret.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ApiKeyId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub name: String,
    pub preview: String,
    pub is_active: bool,
    pub usage_count: u64,
    pub rate_limit_per_minute: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyDBResponse> for ApiKeyResponse {
    fn from(db: ApiKeyDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            name: db.name,
            preview: db.preview,
            is_active: db.is_active,
            usage_count: db.usage_count,
            rate_limit_per_minute: db.rate_limit_per_minute,
            created_at: db.created_at,
            last_used_at: db.last_used_at,
            revoked_at: db.revoked_at,
        }
    }
}

/// Returned once, at creation. `key` cannot be retrieved again.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyCreatedResponse {
    #[serde(flatten)]
    pub info: ApiKeyResponse,
    pub key: String,
}

impl ApiKeyCreatedResponse {
    pub fn new(db: ApiKeyDBResponse, key: String) -> Self {
        Self { info: db.into(), key }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListApiKeysQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: PageQuery,

    /// Admin listing only
    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub is_active: Option<bool>,
}
