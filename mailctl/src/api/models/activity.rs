//! API response models for the admin activity log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::PageQuery;
use crate::db::models::activity::{ActivityAction, ActivityDBResponse, TargetType};
use crate::types::{ActivityId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActivityResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ActivityId,
    pub action: ActivityAction,
    #[schema(value_type = String, format = "uuid")]
    pub admin_id: UserId,
    pub admin_email: String,
    pub target_type: TargetType,
    pub target_id: Option<String>,
    pub target_label: String,
    pub details: serde_json::Value,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ActivityDBResponse> for ActivityResponse {
    fn from(db: ActivityDBResponse) -> Self {
        Self {
            id: db.id,
            action: db.action,
            admin_id: db.admin_id,
            admin_email: db.admin_email,
            target_type: db.target_type,
            target_id: db.target_id,
            target_label: db.target_label,
            details: db.details,
            ip: db.ip,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListActivityQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: PageQuery,

    pub action: Option<ActivityAction>,
    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub admin_id: Option<UserId>,
}
