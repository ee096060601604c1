//! Validation-server pool administration under `/admin/servers`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::json;
use tracing::{info, instrument};

use crate::{
    AppState,
    admin::activity::record,
    api::models::servers::{ServerCreate, ServerResponse, ServerTestRequest, ServerUpdate},
    auth::current_user::AdminUser,
    db::{
        handlers::{Repository, Servers, servers::normalize_url},
        models::{
            activity::{ActivityAction, TargetType},
            servers::{ServerCreateDBRequest, ServerDBResponse, ServerFilter, ServerUpdateDBRequest},
        },
    },
    errors::{Error, Result},
    servers::ProbeResult,
    types::{ServerId, abbrev_uuid},
};

fn server_not_found(id: ServerId) -> Error {
    Error::NotFound {
        resource: "Server".to_string(),
        id: id.to_string(),
    }
}

fn server(state: &AppState, id: ServerId) -> Result<ServerDBResponse> {
    Servers::new(&state.db).get_by_id(id)?.ok_or_else(|| server_not_found(id))
}

#[utoipa::path(
    get,
    path = "/admin/servers",
    tag = "admin_servers",
    summary = "List servers",
    responses(
        (status = 200, description = "The server pool", body = Vec<ServerResponse>),
        (status = 403, description = "Caller is not an admin"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_servers(State(state): State<AppState>, _admin: AdminUser) -> Result<Json<Vec<ServerResponse>>> {
    let servers = Servers::new(&state.db).list(&ServerFilter::default())?;
    Ok(Json(servers.into_iter().map(ServerResponse::from).collect()))
}

/// Register a validation server. It is treated as healthy until its first failed probe.
#[utoipa::path(
    post,
    path = "/admin/servers",
    tag = "admin_servers",
    summary = "Add server",
    request_body = ServerCreate,
    responses(
        (status = 201, description = "Server added", body = ServerResponse),
        (status = 400, description = "Invalid name, URL or weight"),
        (status = 409, description = "URL already registered"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(name = %request.name))]
pub async fn create_server(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(request): Json<ServerCreate>,
) -> Result<(StatusCode, Json<ServerResponse>)> {
    let server = Servers::new(&state.db).create(&ServerCreateDBRequest {
        name: request.name,
        url: request.url,
        weight: request.weight.unwrap_or(1),
    })?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::CreateServer,
        TargetType::Server,
        Some(server.id.to_string()),
        &server.name,
        json!({ "url": server.url, "weight": server.weight }),
    );
    info!(server_id = %abbrev_uuid(&server.id), "Validation server added");
    Ok((StatusCode::CREATED, Json(server.into())))
}

#[utoipa::path(
    get,
    path = "/admin/servers/{id}",
    tag = "admin_servers",
    summary = "Get server",
    params(("id" = uuid::Uuid, Path, description = "Server ID")),
    responses(
        (status = 200, description = "Server", body = ServerResponse),
        (status = 404, description = "Server not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn get_server(State(state): State<AppState>, _admin: AdminUser, Path(id): Path<ServerId>) -> Result<Json<ServerResponse>> {
    Ok(Json(server(&state, id)?.into()))
}

#[utoipa::path(
    put,
    path = "/admin/servers/{id}",
    tag = "admin_servers",
    summary = "Update server",
    params(("id" = uuid::Uuid, Path, description = "Server ID")),
    request_body = ServerUpdate,
    responses(
        (status = 200, description = "Updated server", body = ServerResponse),
        (status = 400, description = "Invalid name, URL or weight"),
        (status = 404, description = "Server not found"),
        (status = 409, description = "URL already registered"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin, request), fields(server_id = %abbrev_uuid(&id)))]
pub async fn update_server(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<ServerId>,
    Json(request): Json<ServerUpdate>,
) -> Result<Json<ServerResponse>> {
    server(&state, id)?;
    let changes = serde_json::to_value(&request).unwrap_or_default();
    let updated = Servers::new(&state.db).update(
        id,
        &ServerUpdateDBRequest {
            name: request.name,
            url: request.url,
            weight: request.weight,
            ..Default::default()
        },
    )?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::UpdateServer,
        TargetType::Server,
        Some(id.to_string()),
        &updated.name,
        changes,
    );
    Ok(Json(updated.into()))
}

#[utoipa::path(
    delete,
    path = "/admin/servers/{id}",
    tag = "admin_servers",
    summary = "Remove server",
    params(("id" = uuid::Uuid, Path, description = "Server ID")),
    responses(
        (status = 204, description = "Server removed"),
        (status = 404, description = "Server not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin), fields(server_id = %abbrev_uuid(&id)))]
pub async fn delete_server(State(state): State<AppState>, admin: AdminUser, Path(id): Path<ServerId>) -> Result<StatusCode> {
    let existing = server(&state, id)?;
    Servers::new(&state.db).delete(id)?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::DeleteServer,
        TargetType::Server,
        Some(id.to_string()),
        &existing.name,
        json!({ "url": existing.url }),
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Probe `{url}/health` without registering anything
#[utoipa::path(
    post,
    path = "/admin/servers/test",
    tag = "admin_servers",
    summary = "Test a server URL",
    request_body = ServerTestRequest,
    responses(
        (status = 200, description = "Probe result", body = ProbeResult),
        (status = 400, description = "Not an http(s) URL"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(url = %request.url))]
pub async fn test_url(State(state): State<AppState>, admin: AdminUser, Json(request): Json<ServerTestRequest>) -> Result<Json<ProbeResult>> {
    let url = normalize_url(&request.url);
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::BadRequest {
            message: "url must be an http(s) URL".to_string(),
        });
    }
    let result = state.servers.probe(&url).await;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::TestServer,
        TargetType::Server,
        None,
        &url,
        json!({ "is_healthy": result.is_healthy, "response_time_ms": result.response_time_ms }),
    );
    Ok(Json(result))
}

/// Probe a registered server and store the result
#[utoipa::path(
    post,
    path = "/admin/servers/{id}/test",
    tag = "admin_servers",
    summary = "Test a registered server",
    params(("id" = uuid::Uuid, Path, description = "Server ID")),
    responses(
        (status = 200, description = "Server with refreshed health", body = ServerResponse),
        (status = 404, description = "Server not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, admin), fields(server_id = %abbrev_uuid(&id)))]
pub async fn test_server(State(state): State<AppState>, admin: AdminUser, Path(id): Path<ServerId>) -> Result<Json<ServerResponse>> {
    let updated = state.servers.probe_and_record(id).await?.ok_or_else(|| server_not_found(id))?;
    record(
        &state.db,
        &admin.actor,
        ActivityAction::TestServer,
        TargetType::Server,
        Some(id.to_string()),
        &updated.name,
        json!({ "is_healthy": updated.is_healthy, "response_time_ms": updated.response_time_ms }),
    );
    Ok(Json(updated.into()))
}

#[cfg(test)]
mod tests {
    use crate::api::models::servers::ServerResponse;
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test_log::test(tokio::test)]
    async fn test_server_crud_and_probe() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&upstream)
            .await;

        let app = create_test_app().await;
        let (_, admin_key) = create_test_admin(&app.state);
        let (name, value) = auth_header(&admin_key);

        let response = app
            .server
            .post("/api/v1/admin/servers")
            .add_header(name.clone(), value.clone())
            .json(&json!({"name": "primary", "url": format!("{}/", upstream.uri()), "weight": 3}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: ServerResponse = response.json();
        assert_eq!(created.url, upstream.uri());
        assert_eq!(created.weight, 3);

        app.server
            .post("/api/v1/admin/servers")
            .add_header(name.clone(), value.clone())
            .json(&json!({"name": "dup", "url": upstream.uri()}))
            .await
            .assert_status(StatusCode::CONFLICT);

        let probed: ServerResponse = app
            .server
            .post(&format!("/api/v1/admin/servers/{}/test", created.id))
            .add_header(name.clone(), value.clone())
            .await
            .json();
        assert!(probed.is_healthy);
        assert!(probed.last_checked_at.is_some());

        let updated: ServerResponse = app
            .server
            .put(&format!("/api/v1/admin/servers/{}", created.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"weight": 5}))
            .await
            .json();
        assert_eq!(updated.weight, 5);

        app.server
            .put(&format!("/api/v1/admin/servers/{}", created.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"weight": 0}))
            .await
            .assert_status_bad_request();

        app.server
            .delete(&format!("/api/v1/admin/servers/{}", created.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let servers: Value = app.server.get("/api/v1/admin/servers").add_header(name, value).await.json();
        assert!(servers.as_array().unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_probe_url() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&upstream)
            .await;

        let app = create_test_app().await;
        let (_, admin_key) = create_test_admin(&app.state);
        let (name, value) = auth_header(&admin_key);

        let result: Value = app
            .server
            .post("/api/v1/admin/servers/test")
            .add_header(name.clone(), value.clone())
            .json(&json!({"url": upstream.uri()}))
            .await
            .json();
        assert_eq!(result["is_healthy"], false);
        assert_eq!(result["error"], "HTTP 503");

        app.server
            .post("/api/v1/admin/servers/test")
            .add_header(name.clone(), value.clone())
            .json(&json!({"url": "ftp://files.example.com"}))
            .await
            .assert_status_bad_request();

        let log: Value = app
            .server
            .get("/api/v1/admin/activity")
            .add_query_param("action", "test_server")
            .add_header(name, value)
            .await
            .json();
        assert_eq!(log["pagination"]["total"], 1);
    }
}
