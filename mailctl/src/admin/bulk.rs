//! Bulk user operations.
//!
//! A bulk request is a batch of independent per-user commands. Each user is processed on its own:
//! a failure for one user is reported in its outcome and never rolls back or blocks the others.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use super::users::UserAdmin;
use crate::db::models::activity::Actor;
use crate::errors::{Error, Result};
use crate::types::{Credits, PlanId, Role, UserId, abbrev_uuid};

/// Largest number of users accepted in one request.
pub const MAX_BULK_USERS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Activate,
    Deactivate,
    /// Requires `params.amount`; negative amounts remove credits
    AddCredits,
    /// Requires `params.plan_id`
    SetPlan,
    MakeAdmin,
    Delete,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BulkParams {
    pub amount: Option<Credits>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub plan_id: Option<PlanId>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BulkRequest {
    #[schema(value_type = Vec<String>)]
    pub user_ids: Vec<UserId>,
    pub action: BulkAction,
    #[serde(default)]
    pub params: BulkParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BulkOutcome {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BulkResponse {
    pub action: BulkAction,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BulkOutcome>,
}

impl UserAdmin {
    fn bulk_one(&self, actor: &Actor, request: &BulkRequest, user_id: UserId) -> Result<()> {
        let reason = request.params.reason.as_deref();
        match request.action {
            BulkAction::Activate => self.set_active(actor, user_id, true).map(drop),
            BulkAction::Deactivate => self.set_active(actor, user_id, false).map(drop),
            BulkAction::AddCredits => {
                let amount = request.params.amount.unwrap_or_default();
                self.adjust_credits(actor, user_id, amount, reason.or(Some("Bulk credit adjustment")))
                    .map(drop)
            }
            BulkAction::SetPlan => match request.params.plan_id {
                Some(plan_id) => self.set_plan(actor, user_id, plan_id).map(drop),
                None => Err(Error::BadRequest {
                    message: "set_plan requires params.plan_id".to_string(),
                }),
            },
            BulkAction::MakeAdmin => self.set_role(actor, user_id, Role::Admin).map(drop),
            BulkAction::Delete => self.delete(actor, user_id),
        }
    }

    /// Apply one action to many users, reporting an outcome per user in request order.
    ///
    /// Only a malformed request fails as a whole. Duplicate ids are processed once.
    #[instrument(skip(self, actor, request), fields(action = ?request.action, users = request.user_ids.len()), err)]
    pub fn bulk(&self, actor: &Actor, request: &BulkRequest) -> Result<BulkResponse> {
        if request.user_ids.is_empty() {
            return Err(Error::BadRequest {
                message: "user_ids cannot be empty".to_string(),
            });
        }
        if request.user_ids.len() > MAX_BULK_USERS {
            return Err(Error::BadRequest {
                message: format!("At most {MAX_BULK_USERS} users can be processed per request"),
            });
        }
        match request.action {
            BulkAction::AddCredits if request.params.amount.is_none_or(|amount| amount == 0) => {
                return Err(Error::BadRequest {
                    message: "add_credits requires a non-zero params.amount".to_string(),
                });
            }
            BulkAction::SetPlan if request.params.plan_id.is_none() => {
                return Err(Error::BadRequest {
                    message: "set_plan requires params.plan_id".to_string(),
                });
            }
            _ => {}
        }

        let mut seen = HashSet::new();
        let results: Vec<BulkOutcome> = request
            .user_ids
            .iter()
            .filter(|id| seen.insert(**id))
            .map(|&user_id| match self.bulk_one(actor, request, user_id) {
                Ok(()) => BulkOutcome {
                    user_id,
                    success: true,
                    error: None,
                },
                Err(e) => {
                    warn!(user_id = %abbrev_uuid(&user_id), error = %e, "Bulk operation failed for user");
                    BulkOutcome {
                        user_id,
                        success: false,
                        error: Some(e.user_message()),
                    }
                }
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        info!(succeeded, failed, "Bulk operation finished");
        Ok(BulkResponse {
            action: request.action,
            succeeded,
            failed,
            results,
        })
    }
}
