//! API request/response models for users and authentication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

use super::api_keys::ApiKeyCreatedResponse;
use super::pagination::PageQuery;
use crate::db::models::users::UserDBResponse;
use crate::ledger::BalanceSnapshot;
use crate::types::{ApiKeyId, Credits, PlanId, Role, UserId};

/// The principal of an authenticated request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
    /// Key the request authenticated with
    #[schema(value_type = String, format = "uuid")]
    pub api_key_id: ApiKeyId,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            name: db.name,
            role: db.role,
            is_active: db.is_active,
            created_at: db.created_at,
            updated_at: db.updated_at,
            last_login_at: db.last_login_at,
        }
    }
}

/// A user together with their credit account.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserDetailResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    /// Absent if the account has been closed
    pub credits: Option<BalanceSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned by register, login and admin user creation. `api_key.key` is shown only here.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub api_key: ApiKeyCreatedResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminUserCreate {
    pub email: String,
    pub name: String,
    /// Without a password the user can only authenticate with the returned key
    pub password: Option<String>,
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AdminUserUpdate {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleUpdate {
    pub role: Role,
}

/// Add (positive) or remove (negative) credits. Removal beyond the balance zeroes it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditAdjustRequest {
    pub amount: Credits,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditSetRequest {
    pub credits: Credits,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditChangeResponse {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub before: Credits,
    pub after: Credits,
    #[schema(value_type = String, format = "uuid")]
    pub transaction_id: uuid::Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetPlanRequest {
    #[schema(value_type = String, format = "uuid")]
    pub plan_id: PlanId,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PasswordResetResponse {
    /// One-time password; the user should change it after logging in
    pub temporary_password: String,
}

#[serde_as]
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListUsersQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: PageQuery,

    /// Case-insensitive substring match on email or name
    pub search: Option<String>,
    pub role: Option<Role>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub is_active: Option<bool>,
}
