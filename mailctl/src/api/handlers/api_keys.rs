use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::{
        api_keys::{ApiKeyCreate, ApiKeyCreatedResponse, ApiKeyResponse, ApiKeyUpdate, ListApiKeysQuery},
        pagination::Paginated,
        users::CurrentUser,
    },
    db::{
        handlers::{ApiKeys, Repository},
        models::api_keys::{ApiKeyDBResponse, ApiKeyFilter, ApiKeyUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{ApiKeyId, abbrev_uuid},
};

fn key_not_found(id: ApiKeyId) -> Error {
    Error::NotFound {
        resource: "API key".to_string(),
        id: id.to_string(),
    }
}

/// Load a key owned by the caller. Keys owned by anyone else are reported as missing.
fn owned_key(state: &AppState, current_user: &CurrentUser, id: ApiKeyId) -> Result<ApiKeyDBResponse> {
    ApiKeys::new(&state.db)
        .get_by_id(id)?
        .filter(|key| key.user_id == current_user.id)
        .ok_or_else(|| key_not_found(id))
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "API key name cannot be empty".to_string(),
        });
    }
    Ok(())
}

/// List the caller's API keys
#[utoipa::path(
    get,
    path = "/keys",
    tag = "api_keys",
    summary = "List API keys",
    params(ListApiKeysQuery),
    responses(
        (status = 200, description = "Page of keys", body = Paginated<ApiKeyResponse>),
        (status = 401, description = "Missing or invalid API key"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_keys(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListApiKeysQuery>,
) -> Result<Json<Paginated<ApiKeyResponse>>> {
    let keys = ApiKeys::new(&state.db);
    let filter = ApiKeyFilter {
        user_id: Some(current_user.id),
        is_active: query.is_active,
        ..ApiKeyFilter::new(query.pagination.skip(), query.pagination.limit())
    };
    let total = keys.count(&filter)?;
    let data = keys.list(&filter)?.into_iter().map(ApiKeyResponse::from).collect();
    Ok(Json(Paginated::new(data, total, &query.pagination)))
}

/// Create an API key. The secret is returned once and cannot be retrieved later.
#[utoipa::path(
    post,
    path = "/keys",
    tag = "api_keys",
    summary = "Create API key",
    request_body = ApiKeyCreate,
    responses(
        (status = 201, description = "Key created", body = ApiKeyCreatedResponse),
        (status = 400, description = "Invalid name or rate limit"),
        (status = 401, description = "Missing or invalid API key"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn create_key(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ApiKeyCreate>,
) -> Result<(StatusCode, Json<ApiKeyCreatedResponse>)> {
    check_name(&request.name)?;
    let rate_limit = request.rate_limit_per_minute.unwrap_or(state.users.default_rate_limit());
    let (key, secret) = ApiKeys::new(&state.db).issue(current_user.id, &request.name, rate_limit)?;
    info!(api_key_id = %abbrev_uuid(&key.id), "API key created");
    Ok((StatusCode::CREATED, Json(ApiKeyCreatedResponse::new(key, secret))))
}

#[utoipa::path(
    get,
    path = "/keys/{id}",
    tag = "api_keys",
    summary = "Get API key",
    params(("id" = uuid::Uuid, Path, description = "API key ID")),
    responses(
        (status = 200, description = "Key metadata", body = ApiKeyResponse),
        (status = 404, description = "Key not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn get_key(State(state): State<AppState>, current_user: CurrentUser, Path(id): Path<ApiKeyId>) -> Result<Json<ApiKeyResponse>> {
    Ok(Json(owned_key(&state, &current_user, id)?.into()))
}

/// Rename a key or change its rate limit
#[utoipa::path(
    put,
    path = "/keys/{id}",
    tag = "api_keys",
    summary = "Update API key",
    params(("id" = uuid::Uuid, Path, description = "API key ID")),
    request_body = ApiKeyUpdate,
    responses(
        (status = 200, description = "Updated key", body = ApiKeyResponse),
        (status = 400, description = "Invalid name or rate limit"),
        (status = 404, description = "Key not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, current_user, request), fields(api_key_id = %abbrev_uuid(&id)))]
pub async fn update_key(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<ApiKeyId>,
    Json(request): Json<ApiKeyUpdate>,
) -> Result<Json<ApiKeyResponse>> {
    owned_key(&state, &current_user, id)?;
    if let Some(name) = &request.name {
        check_name(name)?;
    }
    let key = ApiKeys::new(&state.db).update(
        id,
        &ApiKeyUpdateDBRequest {
            name: request.name,
            rate_limit_per_minute: request.rate_limit_per_minute,
        },
    )?;
    Ok(Json(key.into()))
}

/// Revoke a key. The key stops authenticating immediately; its record and usage are kept.
#[utoipa::path(
    delete,
    path = "/keys/{id}",
    tag = "api_keys",
    summary = "Revoke API key",
    params(("id" = uuid::Uuid, Path, description = "API key ID")),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 404, description = "Key not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, current_user), fields(api_key_id = %abbrev_uuid(&id)))]
pub async fn revoke_key(State(state): State<AppState>, current_user: CurrentUser, Path(id): Path<ApiKeyId>) -> Result<StatusCode> {
    owned_key(&state, &current_user, id)?;
    ApiKeys::new(&state.db).revoke(id)?;
    info!("API key revoked");
    Ok(StatusCode::NO_CONTENT)
}
