//! API request/response models for the validation-server pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::servers::ServerDBResponse;
use crate::types::ServerId;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServerCreate {
    pub name: String,
    pub url: String,
    pub weight: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ServerUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub weight: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServerTestRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServerResponse {
    #[schema(value_type = String, format = "uuid")]
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

impl From<ServerDBResponse> for ServerResponse {
    fn from(db: ServerDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            url: db.url,
            weight: db.weight,
            is_healthy: db.is_healthy,
            response_time_ms: db.response_time_ms,
            last_checked_at: db.last_checked_at,
            last_error: db.last_error,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}
