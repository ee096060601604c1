//! Admin user management.
//!
//! Every mutation is performed through [`UserAdmin`](crate::admin::UserAdmin) on behalf of the
//! calling admin, which writes the activity entry.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::{info, instrument};

use crate::{
    AppState,
    admin::{BulkRequest, BulkResponse, NewUser},
    api::models::{
        api_keys::ApiKeyCreatedResponse,
        billing::TransactionResponse,
        pagination::Paginated,
        users::{
            AdminUserCreate, AdminUserUpdate, AuthResponse, CreditAdjustRequest, CreditChangeResponse, CreditSetRequest, ListUsersQuery,
            PasswordResetResponse, RoleUpdate, SetPlanRequest, UserDetailResponse, UserResponse,
        },
    },
    auth::current_user::AdminUser,
    db::{
        handlers::{Repository, Users},
        models::users::UserFilter,
    },
    errors::Result,
    ledger::CreditChange,
    types::{UserId, abbrev_uuid},
};

fn credit_change_response(user_id: UserId, change: CreditChange) -> CreditChangeResponse {
    CreditChangeResponse {
        user_id,
        before: change.before,
        after: change.after,
        transaction_id: change.transaction.id,
    }
}

#[utoipa::path(
    get,
    path = "/admin/users",
    tag = "admin_users",
    summary = "List users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Page of users", body = Paginated<UserResponse>),
        (status = 403, description = "Caller is not an admin"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Paginated<UserResponse>>> {
    let users = Users::new(&state.db);
    let filter = UserFilter {
        search: query.search.filter(|s| !s.trim().is_empty()),
        role: query.role,
        is_active: query.is_active,
        ..UserFilter::new(query.pagination.skip(), query.pagination.limit())
    };
    let total = users.count(&filter)?;
    let data = users.list(&filter)?.into_iter().map(UserResponse::from).collect();
    Ok(Json(Paginated::new(data, total, &query.pagination)))
}

/// Create a user. The response carries the user's first API key, shown only once.
#[utoipa::path(
    post,
    path = "/admin/users",
    tag = "admin_users",
    summary = "Create user",
    request_body = AdminUserCreate,
    responses(
        (status = 201, description = "User created", body = AuthResponse),
        (status = 400, description = "Invalid email, name or password"),
        (status = 409, description = "Email already in use"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(email = %request.email))]
pub async fn create_user(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(request): Json<AdminUserCreate>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    let provisioned = state.users.create(
        &admin.actor,
        NewUser {
            email: request.email,
            name: request.name,
            role: request.role,
            password: request.password,
        },
    )?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: provisioned.user.into(),
            api_key: ApiKeyCreatedResponse::new(provisioned.key, provisioned.secret),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/admin/users/{id}",
    tag = "admin_users",
    summary = "Get user",
    description = "The user and their credit account.",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User with balance", body = UserDetailResponse),
        (status = 404, description = "User not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn get_user(State(state): State<AppState>, _admin: AdminUser, Path(id): Path<UserId>) -> Result<Json<UserDetailResponse>> {
    let (user, credits) = state.users.get(id)?;
    Ok(Json(UserDetailResponse {
        user: user.into(),
        credits,
    }))
}

#[utoipa::path(
    put,
    path = "/admin/users/{id}",
    tag = "admin_users",
    summary = "Update user",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    request_body = AdminUserUpdate,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Invalid email or name"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Email already in use"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<UserId>,
    Json(request): Json<AdminUserUpdate>,
) -> Result<Json<UserResponse>> {
    Ok(Json(state.users.update(&admin.actor, id, request.email, request.name)?.into()))
}

/// Delete a user: their jobs are cancelled and refunded, then removed along with their keys and
/// credit account.
#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    tag = "admin_users",
    summary = "Delete user",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 403, description = "Admins cannot delete themselves"),
        (status = 404, description = "User not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin), fields(user_id = %abbrev_uuid(&id)))]
pub async fn delete_user(State(state): State<AppState>, admin: AdminUser, Path(id): Path<UserId>) -> Result<StatusCode> {
    state.users.delete(&admin.actor, id)?;
    info!("User deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Add or remove credits. Removing more than the balance zeroes it.
#[utoipa::path(
    patch,
    path = "/admin/users/{id}/credits",
    tag = "admin_users",
    summary = "Adjust credits",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    request_body = CreditAdjustRequest,
    responses(
        (status = 200, description = "Balance before and after", body = CreditChangeResponse),
        (status = 400, description = "Zero amount"),
        (status = 404, description = "User not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn adjust_credits(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<UserId>,
    Json(request): Json<CreditAdjustRequest>,
) -> Result<Json<CreditChangeResponse>> {
    let change = state
        .users
        .adjust_credits(&admin.actor, id, request.amount, request.reason.as_deref())?;
    Ok(Json(credit_change_response(id, change)))
}

/// Set the balance to an absolute value
#[utoipa::path(
    put,
    path = "/admin/users/{id}/credits",
    tag = "admin_users",
    summary = "Set credits",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    request_body = CreditSetRequest,
    responses(
        (status = 200, description = "Balance before and after", body = CreditChangeResponse),
        (status = 400, description = "Negative value"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Value below credits held by running jobs"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn set_credits(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<UserId>,
    Json(request): Json<CreditSetRequest>,
) -> Result<Json<CreditChangeResponse>> {
    let change = state
        .users
        .set_credits(&admin.actor, id, request.credits, request.reason.as_deref())?;
    Ok(Json(credit_change_response(id, change)))
}

#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    tag = "admin_users",
    summary = "Change role",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    request_body = RoleUpdate,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 403, description = "Admins cannot demote themselves"),
        (status = 404, description = "User not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn set_role(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<UserId>,
    Json(request): Json<RoleUpdate>,
) -> Result<Json<UserResponse>> {
    Ok(Json(state.users.set_role(&admin.actor, id, request.role)?.into()))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/activate",
    tag = "admin_users",
    summary = "Activate user",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 404, description = "User not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn activate_user(State(state): State<AppState>, admin: AdminUser, Path(id): Path<UserId>) -> Result<Json<UserResponse>> {
    Ok(Json(state.users.set_active(&admin.actor, id, true)?.into()))
}

/// Deactivate a user. Their keys stop authenticating until they are reactivated.
#[utoipa::path(
    post,
    path = "/admin/users/{id}/deactivate",
    tag = "admin_users",
    summary = "Deactivate user",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 403, description = "Admins cannot deactivate themselves"),
        (status = 404, description = "User not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn deactivate_user(State(state): State<AppState>, admin: AdminUser, Path(id): Path<UserId>) -> Result<Json<UserResponse>> {
    Ok(Json(state.users.set_active(&admin.actor, id, false)?.into()))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/reset-password",
    tag = "admin_users",
    summary = "Reset password",
    description = "Replaces the password with a generated one. The temporary password is returned only in this response.",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Temporary password", body = PasswordResetResponse),
        (status = 404, description = "User not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn reset_password(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<UserId>,
) -> Result<Json<PasswordResetResponse>> {
    let temporary_password = state.users.reset_password(&admin.actor, id)?;
    Ok(Json(PasswordResetResponse { temporary_password }))
}

/// Move a user onto a plan without payment
#[utoipa::path(
    put,
    path = "/admin/users/{id}/plan",
    tag = "admin_users",
    summary = "Set plan",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    request_body = SetPlanRequest,
    responses(
        (status = 200, description = "Subscription transaction", body = TransactionResponse),
        (status = 404, description = "User or plan not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn set_plan(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<UserId>,
    Json(request): Json<SetPlanRequest>,
) -> Result<Json<TransactionResponse>> {
    Ok(Json(state.users.set_plan(&admin.actor, id, request.plan_id)?.into()))
}

/// Apply one action to many users. Each user succeeds or fails on its own.
#[utoipa::path(
    post,
    path = "/admin/users/bulk",
    tag = "admin_users",
    summary = "Bulk user action",
    request_body = BulkRequest,
    responses(
        (status = 200, description = "Per-user outcomes", body = BulkResponse),
        (status = 400, description = "No users, too many users, or missing action parameters"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(action = ?request.action, count = request.user_ids.len()))]
pub async fn bulk_action(State(state): State<AppState>, admin: AdminUser, Json(request): Json<BulkRequest>) -> Result<Json<BulkResponse>> {
    Ok(Json(state.users.bulk(&admin.actor, &request)?))
}

#[cfg(test)]
mod tests {
    use crate::admin::BulkResponse;
    use crate::api::models::users::{AuthResponse, CreditChangeResponse, PasswordResetResponse, UserResponse};
    use crate::db::handlers::Activity;
    use crate::db::models::activity::{ActivityAction, ActivityFilter};
    use crate::ledger::MAX_BALANCE;
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    #[test_log::test(tokio::test)]
    async fn test_requires_admin() {
        let app = create_test_app().await;
        let (_, key) = create_test_user(&app.state, 0);
        let (name, value) = auth_header(&key);

        app.server
            .get("/api/v1/admin/users")
            .add_header(name, value)
            .await
            .assert_status(StatusCode::FORBIDDEN);
        app.server.get("/api/v1/admin/users").await.assert_status_unauthorized();
    }

    #[test_log::test(tokio::test)]
    async fn test_create_and_search_users() {
        let app = create_test_app().await;
        let (_, admin_key) = create_test_admin(&app.state);
        let (name, value) = auth_header(&admin_key);

        let response = app
            .server
            .post("/api/v1/admin/users")
            .add_header(name.clone(), value.clone())
            .json(&json!({"email": "findme@acme.io", "name": "Find Me"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: AuthResponse = response.json();
        assert!(created.api_key.key.starts_with("sk-"));

        let page: Value = app
            .server
            .get("/api/v1/admin/users")
            .add_query_param("search", "FINDME")
            .add_header(name.clone(), value.clone())
            .await
            .json();
        assert_eq!(page["pagination"]["total"], 1);
        assert_eq!(page["data"][0]["id"], created.user.id.to_string());

        let detail: Value = app
            .server
            .get(&format!("/api/v1/admin/users/{}", created.user.id))
            .add_header(name, value)
            .await
            .json();
        assert_eq!(detail["email"], "findme@acme.io");
        assert_eq!(detail["credits"]["balance"], 0);

        let entries = Activity::new(&app.state.db)
            .list(&ActivityFilter {
                action: Some(ActivityAction::CreateUser),
                ..ActivityFilter::new(0, 10)
            })
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target_label, "findme@acme.io");
    }

    #[test_log::test(tokio::test)]
    async fn test_adjust_clamps_and_set_credits() {
        let app = create_test_app().await;
        let (_, admin_key) = create_test_admin(&app.state);
        let (user, _) = create_test_user(&app.state, 30);
        let (name, value) = auth_header(&admin_key);

        let change: CreditChangeResponse = app
            .server
            .patch(&format!("/api/v1/admin/users/{}/credits", user.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"amount": -100, "reason": "chargeback"}))
            .await
            .json();
        assert_eq!((change.before, change.after), (30, 0));

        let change: CreditChangeResponse = app
            .server
            .put(&format!("/api/v1/admin/users/{}/credits", user.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"credits": 250}))
            .await
            .json();
        assert_eq!((change.before, change.after), (0, 250));
        assert_eq!(app.state.ledger.balance(user.id).unwrap().balance, 250);

        app.server
            .patch(&format!("/api/v1/admin/users/{}/credits", user.id))
            .add_header(name, value)
            .json(&json!({"amount": 0}))
            .await
            .assert_status_bad_request();
    }

    #[test_log::test(tokio::test)]
    async fn test_credit_amounts_past_the_ceiling_are_rejected() {
        let app = create_test_app().await;
        let (_, admin_key) = create_test_admin(&app.state);
        let (user, _) = create_test_user(&app.state, 10);
        let (name, value) = auth_header(&admin_key);

        for _ in 0..2 {
            app.server
                .patch(&format!("/api/v1/admin/users/{}/credits", user.id))
                .add_header(name.clone(), value.clone())
                .json(&json!({"amount": i64::MAX}))
                .await
                .assert_status_bad_request();
        }
        app.server
            .put(&format!("/api/v1/admin/users/{}/credits", user.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"credits": i64::MAX}))
            .await
            .assert_status_bad_request();

        // A legal top-up to the ceiling, then any further addition is refused by the ledger
        app.server
            .put(&format!("/api/v1/admin/users/{}/credits", user.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"credits": MAX_BALANCE}))
            .await
            .assert_status_ok();
        app.server
            .patch(&format!("/api/v1/admin/users/{}/credits", user.id))
            .add_header(name, value)
            .json(&json!({"amount": MAX_BALANCE}))
            .await
            .assert_status_bad_request();

        let snapshot = app.state.ledger.balance(user.id).unwrap();
        assert_eq!(snapshot.balance, MAX_BALANCE);
    }

    #[test_log::test(tokio::test)]
    async fn test_deactivate_blocks_keys() {
        let app = create_test_app().await;
        let (admin, admin_key) = create_test_admin(&app.state);
        let (user, user_key) = create_test_user(&app.state, 0);
        let (name, value) = auth_header(&admin_key);

        let updated: UserResponse = app
            .server
            .post(&format!("/api/v1/admin/users/{}/deactivate", user.id))
            .add_header(name.clone(), value.clone())
            .await
            .json();
        assert!(!updated.is_active);

        let (user_name, user_value) = auth_header(&user_key);
        app.server
            .get("/api/v1/auth/me")
            .add_header(user_name.clone(), user_value.clone())
            .await
            .assert_status_unauthorized();

        app.server
            .post(&format!("/api/v1/admin/users/{}/activate", user.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status_ok();
        app.server
            .get("/api/v1/auth/me")
            .add_header(user_name, user_value)
            .await
            .assert_status_ok();

        // Admins cannot lock themselves out
        app.server
            .post(&format!("/api/v1/admin/users/{}/deactivate", admin.id))
            .add_header(name, value)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[test_log::test(tokio::test)]
    async fn test_role_change_and_password_reset() {
        let app = create_test_app().await;
        let (_, admin_key) = create_test_admin(&app.state);
        let (user, user_key) = create_test_user(&app.state, 0);
        let (name, value) = auth_header(&admin_key);

        let updated: UserResponse = app
            .server
            .put(&format!("/api/v1/admin/users/{}/role", user.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"role": "admin"}))
            .await
            .json();
        assert!(matches!(updated.role, crate::types::Role::Admin));

        let (user_name, user_value) = auth_header(&user_key);
        app.server
            .get("/api/v1/admin/users")
            .add_header(user_name, user_value)
            .await
            .assert_status_ok();

        let reset: PasswordResetResponse = app
            .server
            .post(&format!("/api/v1/admin/users/{}/reset-password", user.id))
            .add_header(name, value)
            .await
            .json();
        app.server
            .post("/api/v1/auth/login")
            .json(&json!({"email": user.email, "password": reset.temporary_password}))
            .await
            .assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_user() {
        let app = create_test_app().await;
        let (_, admin_key) = create_test_admin(&app.state);
        let (user, user_key) = create_test_user(&app.state, 10);
        let (name, value) = auth_header(&admin_key);

        app.server
            .delete(&format!("/api/v1/admin/users/{}", user.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        app.server
            .get(&format!("/api/v1/admin/users/{}", user.id))
            .add_header(name, value)
            .await
            .assert_status_not_found();

        let (user_name, user_value) = auth_header(&user_key);
        app.server
            .get("/api/v1/auth/me")
            .add_header(user_name, user_value)
            .await
            .assert_status_unauthorized();
    }

    #[test_log::test(tokio::test)]
    async fn test_bulk_add_credits_with_deleted_user() {
        let app = create_test_app().await;
        let (_, admin_key) = create_test_admin(&app.state);
        let (a, _) = create_test_user(&app.state, 0);
        let (b, _) = create_test_user(&app.state, 0);
        let (c, _) = create_test_user(&app.state, 0);
        let (name, value) = auth_header(&admin_key);

        app.server
            .delete(&format!("/api/v1/admin/users/{}", b.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let response: BulkResponse = app
            .server
            .post("/api/v1/admin/users/bulk")
            .add_header(name, value)
            .json(&json!({
                "user_ids": [a.id, b.id, c.id],
                "action": "add_credits",
                "params": {"amount": 500},
            }))
            .await
            .json();
        assert_eq!((response.succeeded, response.failed), (2, 1));
        let failed = response.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.user_id, b.id);
        assert_eq!(app.state.ledger.balance(a.id).unwrap().balance, 500);
        assert_eq!(app.state.ledger.balance(c.id).unwrap().balance, 500);
    }
}
