use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{ActivityId, UserId};

/// Admin operations recorded in the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    CreateUser,
    UpdateUser,
    DeleteUser,
    ActivateUser,
    DeactivateUser,
    ChangeRole,
    ResetPassword,
    AdjustCredits,
    SetCredits,
    SetPlan,
    RevokeApiKey,
    DeleteApiKey,
    CancelJob,
    CreatePlan,
    UpdatePlan,
    DeletePlan,
    CreateCoupon,
    UpdateCoupon,
    DeleteCoupon,
    CreateServer,
    UpdateServer,
    DeleteServer,
    TestServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    User,
    ApiKey,
    Job,
    Plan,
    Coupon,
    Server,
}

/// The authenticated admin performing an operation.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: UserId,
    pub email: String,
    pub ip: Option<String>,
}

/// Append-only admin activity entry.
#[derive(Debug, Clone)]
pub struct ActivityDBResponse {
    pub id: ActivityId,
    pub action: ActivityAction,
    pub admin_id: UserId,
    pub admin_email: String,
    pub target_type: TargetType,
    pub target_id: Option<String>,
    pub target_label: String,
    pub details: serde_json::Value,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ActivityCreateDBRequest {
    pub action: ActivityAction,
    pub target_type: TargetType,
    pub target_id: Option<String>,
    pub target_label: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ActivityFilter {
    pub action: Option<ActivityAction>,
    pub admin_id: Option<UserId>,
    pub skip: i64,
    pub limit: i64,
}

impl ActivityFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            action: None,
            admin_id: None,
            skip,
            limit,
        }
    }
}
