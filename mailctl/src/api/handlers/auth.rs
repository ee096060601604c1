use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Utc;
use tracing::{info, instrument};

use crate::{
    AppState,
    admin::NewUser,
    api::models::{
        api_keys::ApiKeyCreatedResponse,
        users::{AuthResponse, CurrentUser, LoginRequest, RegisterRequest, UserResponse},
    },
    auth::password,
    db::{
        handlers::{ApiKeys, Repository, Users},
        models::users::UserUpdateDBRequest,
    },
    errors::{Error, Result},
    types::{Role, abbrev_uuid},
};

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    }
}

/// Create an account and return its first API key.
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    summary = "Register",
    description = "Create an account on the default plan. The returned API key is shown only once.",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid email, name or password"),
        (status = 409, description = "An account with this email already exists"),
    )
)]
#[instrument(skip_all, fields(email = %request.email))]
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> Result<(StatusCode, Json<AuthResponse>)> {
    let provisioned = state.users.provision(NewUser {
        email: request.email,
        name: request.name,
        role: Role::User,
        password: Some(request.password),
    })?;
    info!(user_id = %abbrev_uuid(&provisioned.user.id), "User registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: provisioned.user.into(),
            api_key: ApiKeyCreatedResponse::new(provisioned.key, provisioned.secret),
        }),
    ))
}

/// Exchange email and password for a new API key.
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    summary = "Log in",
    description = "Verify the password and issue a fresh API key.",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid credentials or disabled account"),
    )
)]
#[instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<Json<AuthResponse>> {
    let users = Users::new(&state.db);
    let user = users.get_by_email(request.email.trim())?.ok_or_else(invalid_credentials)?;
    let Some(hash) = user.password_hash.as_deref() else {
        return Err(invalid_credentials());
    };
    if !password::verify_password(&request.password, hash)? {
        return Err(invalid_credentials());
    }
    if !user.is_active {
        return Err(Error::Unauthenticated {
            message: Some("Account is disabled".to_string()),
        });
    }

    let user = users.update(
        user.id,
        &UserUpdateDBRequest {
            last_login_at: Some(Utc::now()),
            ..Default::default()
        },
    )?;
    let (key, secret) = ApiKeys::new(&state.db).issue(user.id, "login", state.users.default_rate_limit())?;
    info!(user_id = %abbrev_uuid(&user.id), "User logged in");

    Ok(Json(AuthResponse {
        user: user.into(),
        api_key: ApiKeyCreatedResponse::new(key, secret),
    }))
}

/// The authenticated user.
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    summary = "Current user",
    responses(
        (status = 200, description = "The caller's account", body = UserResponse),
        (status = 401, description = "Missing or invalid API key"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserResponse>> {
    let user = state.users.user(current_user.id)?;
    Ok(Json(user.into()))
}
