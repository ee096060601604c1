//! Cross-user admin views: jobs, transactions, API keys and the activity log.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde_json::json;
use tracing::{info, instrument};

use crate::{
    AppState,
    admin::activity::record,
    api::models::{
        activity::{ActivityResponse, ListActivityQuery},
        api_keys::{ApiKeyResponse, ListApiKeysQuery},
        billing::{ListTransactionsQuery, TransactionResponse},
        jobs::{CancelJobResponse, JobResponse, ListJobsQuery},
        pagination::Paginated,
    },
    auth::current_user::AdminUser,
    db::{
        handlers::{Activity, ApiKeys, Repository},
        models::{
            activity::{ActivityAction, ActivityFilter, TargetType},
            api_keys::{ApiKeyDBResponse, ApiKeyFilter},
            transactions::TransactionFilter,
        },
    },
    errors::{Error, Result},
    jobs::JobFilter,
    types::{ApiKeyId, JobId, abbrev_uuid},
};

/// Jobs across all users, newest first
#[utoipa::path(
    get,
    path = "/admin/jobs",
    tag = "admin",
    summary = "List all jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Page of jobs", body = Paginated<JobResponse>),
        (status = 403, description = "Caller is not an admin"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_jobs(State(state): State<AppState>, _admin: AdminUser, Query(query): Query<ListJobsQuery>) -> Result<Json<Paginated<JobResponse>>> {
    let filter = JobFilter {
        user_id: query.user_id,
        status: query.status,
        kind: query.kind,
        skip: query.pagination.skip(),
        limit: query.pagination.limit(),
    };
    let (jobs, total) = state.jobs.list(&filter);
    Ok(Json(Paginated::new(
        jobs.into_iter().map(JobResponse::from).collect(),
        total as i64,
        &query.pagination,
    )))
}

/// Cancel any user's job and refund its unconsumed credits
#[utoipa::path(
    delete,
    path = "/admin/jobs/{id}",
    tag = "admin",
    summary = "Cancel job",
    params(("id" = uuid::Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job after cancellation", body = CancelJobResponse),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job already completed or failed"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin), fields(job_id = %abbrev_uuid(&id)))]
pub async fn cancel_job(State(state): State<AppState>, admin: AdminUser, Path(id): Path<JobId>) -> Result<Json<CancelJobResponse>> {
    let (job, cancelled) = state.jobs.cancel(id, None)?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::CancelJob,
        TargetType::Job,
        Some(id.to_string()),
        job.source_filename.clone().unwrap_or_else(|| format!("job {}", abbrev_uuid(&id))),
        json!({
            "user_id": job.user_id,
            "cancelled": cancelled,
            "credits_refunded": job.credits_refunded,
        }),
    );
    Ok(Json(CancelJobResponse {
        job: job.into(),
        cancelled,
    }))
}

/// Transactions across all users, newest first
#[utoipa::path(
    get,
    path = "/admin/transactions",
    tag = "admin",
    summary = "List all transactions",
    params(ListTransactionsQuery),
    responses(
        (status = 200, description = "Page of transactions", body = Paginated<TransactionResponse>),
        (status = 403, description = "Caller is not an admin"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<Paginated<TransactionResponse>>> {
    let filter = TransactionFilter {
        user_id: query.user_id,
        transaction_type: query.transaction_type,
        ..TransactionFilter::new(query.pagination.skip(), query.pagination.limit())
    };
    let (transactions, total) = state.billing.transactions(&filter)?;
    Ok(Json(Paginated::new(
        transactions.into_iter().map(TransactionResponse::from).collect(),
        total,
        &query.pagination,
    )))
}

/// API keys across all users
#[utoipa::path(
    get,
    path = "/admin/api-keys",
    tag = "admin",
    summary = "List all API keys",
    params(ListApiKeysQuery),
    responses(
        (status = 200, description = "Page of keys", body = Paginated<ApiKeyResponse>),
        (status = 403, description = "Caller is not an admin"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_api_keys(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListApiKeysQuery>,
) -> Result<Json<Paginated<ApiKeyResponse>>> {
    let keys = ApiKeys::new(&state.db);
    let filter = ApiKeyFilter {
        user_id: query.user_id,
        is_active: query.is_active,
        ..ApiKeyFilter::new(query.pagination.skip(), query.pagination.limit())
    };
    let total = keys.count(&filter)?;
    let data = keys.list(&filter)?.into_iter().map(ApiKeyResponse::from).collect();
    Ok(Json(Paginated::new(data, total, &query.pagination)))
}

fn api_key(state: &AppState, id: ApiKeyId) -> Result<ApiKeyDBResponse> {
    ApiKeys::new(&state.db).get_by_id(id)?.ok_or_else(|| Error::NotFound {
        resource: "API key".to_string(),
        id: id.to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/admin/api-keys/{id}/revoke",
    tag = "admin",
    summary = "Revoke API key",
    params(("id" = uuid::Uuid, Path, description = "API key ID")),
    responses(
        (status = 200, description = "Revoked key", body = ApiKeyResponse),
        (status = 404, description = "Key not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin), fields(api_key_id = %abbrev_uuid(&id)))]
pub async fn revoke_api_key(State(state): State<AppState>, admin: AdminUser, Path(id): Path<ApiKeyId>) -> Result<Json<ApiKeyResponse>> {
    let before = api_key(&state, id)?;
    let key = ApiKeys::new(&state.db).revoke(id)?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::RevokeApiKey,
        TargetType::ApiKey,
        Some(id.to_string()),
        &key.name,
        json!({ "user_id": key.user_id, "preview": key.preview, "was_active": before.is_active }),
    );
    info!("API key revoked by admin");
    Ok(Json(key.into()))
}

/// Delete a key record entirely
#[utoipa::path(
    delete,
    path = "/admin/api-keys/{id}",
    tag = "admin",
    summary = "Delete API key",
    params(("id" = uuid::Uuid, Path, description = "API key ID")),
    responses(
        (status = 204, description = "Key deleted"),
        (status = 404, description = "Key not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin), fields(api_key_id = %abbrev_uuid(&id)))]
pub async fn delete_api_key(State(state): State<AppState>, admin: AdminUser, Path(id): Path<ApiKeyId>) -> Result<StatusCode> {
    let key = api_key(&state, id)?;
    if !ApiKeys::new(&state.db).delete(id)? {
        return Err(Error::NotFound {
            resource: "API key".to_string(),
            id: id.to_string(),
        });
    }
    record(
        &state.db,
        &admin.actor,
        ActivityAction::DeleteApiKey,
        TargetType::ApiKey,
        Some(id.to_string()),
        &key.name,
        json!({ "user_id": key.user_id, "preview": key.preview }),
    );
    info!("API key deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

/// The admin activity log, newest first
#[utoipa::path(
    get,
    path = "/admin/activity",
    tag = "admin",
    summary = "Activity log",
    params(ListActivityQuery),
    responses(
        (status = 200, description = "Page of activity entries", body = Paginated<ActivityResponse>),
        (status = 403, description = "Caller is not an admin"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_activity(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListActivityQuery>,
) -> Result<Json<Paginated<ActivityResponse>>> {
    let activity = Activity::new(&state.db);
    let filter = ActivityFilter {
        action: query.action,
        admin_id: query.admin_id,
        ..ActivityFilter::new(query.pagination.skip(), query.pagination.limit())
    };
    let total = activity.count(&filter)?;
    let data = activity.list(&filter)?.into_iter().map(ActivityResponse::from).collect();
    Ok(Json(Paginated::new(data, total, &query.pagination)))
}
