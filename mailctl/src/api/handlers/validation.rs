//! Validation endpoints: single checks, bulk uploads, and job polling.

use std::collections::HashSet;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use tracing::{info, instrument};
use url::Url;

use crate::{
    AppState,
    api::models::{
        jobs::{
            BulkSubmitResponse, CancelJobResponse, JobResponse, JobResultsQuery, ListJobsQuery, ResultFormat, SingleValidationRequest,
            SingleValidationResponse,
        },
        pagination::Paginated,
        users::CurrentUser,
    },
    checker::syntax,
    errors::{Error, Result},
    jobs::{EmailResult, JobFilter, JobKind, validate_single},
    types::{JobId, abbrev_uuid},
};

/// Extract the address list from an uploaded file.
///
/// One address per line; for CSV, TSV or semicolon separated rows only the first column is used.
/// Surrounding quotes are stripped, tokens without `@` (such as a header row) are skipped, and
/// duplicates are dropped case-insensitively keeping the first occurrence.
pub fn parse_email_list(text: &str, max_emails: usize) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut emails = Vec::new();

    for line in text.trim_start_matches('\u{feff}').lines() {
        let first_column = line.split([',', ';', '\t']).next().unwrap_or_default();
        let token = first_column.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        if !token.contains('@') || !seen.insert(token.to_lowercase()) {
            continue;
        }
        if emails.len() == max_emails {
            return Err(Error::BadRequest {
                message: format!("File contains more than the maximum of {max_emails} email addresses"),
            });
        }
        emails.push(token.to_string());
    }

    if emails.is_empty() {
        return Err(Error::BadRequest {
            message: "No email addresses found in the uploaded file".to_string(),
        });
    }
    Ok(emails)
}

fn parse_webhook_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim()).map_err(|e| Error::BadRequest {
        message: format!("Invalid webhook_url: {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::BadRequest {
            message: "webhook_url must use http or https".to_string(),
        });
    }
    Ok(url.to_string())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_flag(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "true",
        Some(false) => "false",
        None => "",
    }
}

/// Render per-address results as CSV, one row per address in submission order.
pub fn results_csv(results: &[EmailResult]) -> String {
    let mut out = String::from("email,status,score,syntax,mx_found,smtp_valid,disposable,role_based,catch_all,error\n");
    for result in results {
        let checks = &result.checks;
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            csv_field(&result.email),
            result.status.as_str(),
            result.score,
            checks.syntax,
            csv_flag(checks.mx_found),
            csv_flag(checks.smtp_valid),
            checks.disposable,
            checks.role_based,
            csv_flag(checks.catch_all),
            csv_field(result.error.as_deref().unwrap_or_default()),
        ));
    }
    out
}

/// Validate one address synchronously.
#[utoipa::path(
    post,
    path = "/validate/single",
    tag = "validation",
    summary = "Validate a single address",
    description = "Checks one address inline and charges one credit. Malformed addresses are rejected before any credit is held.",
    request_body = SingleValidationRequest,
    responses(
        (status = 200, description = "Validation result", body = SingleValidationResponse),
        (status = 400, description = "Malformed email address"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 402, description = "Insufficient credits"),
        (status = 502, description = "Checker unavailable"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn validate_one(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<SingleValidationRequest>,
) -> Result<Json<SingleValidationResponse>> {
    let email = request.email.trim();
    if !syntax::is_valid(email) {
        return Err(Error::BadRequest {
            message: format!("'{email}' is not a valid email address"),
        });
    }

    let result = validate_single(
        &state.jobs,
        state.checker.as_ref(),
        current_user.id,
        syntax::normalize(email),
        request.options,
        state.config.validation.check_timeout,
    )
    .await?;
    Ok(Json(result.into()))
}

/// Upload a list of addresses for background validation.
#[utoipa::path(
    post,
    path = "/validate/bulk",
    tag = "validation",
    summary = "Submit a bulk validation job",
    description = "Multipart upload with a `file` field (one address per line, or CSV with addresses in the first column) and an optional `webhook_url` field. Credits for every address are reserved up front; unused credits are refunded when the job ends.",
    request_body(content_type = "multipart/form-data", description = "`file` and optional `webhook_url`"),
    responses(
        (status = 201, description = "Job created", body = BulkSubmitResponse),
        (status = 400, description = "No addresses found, too many addresses, or bad webhook URL"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 402, description = "Insufficient credits"),
        (status = 413, description = "File too large"),
        (status = 429, description = "Too many concurrent uploads"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn submit_bulk(
    State(state): State<AppState>,
    current_user: CurrentUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<BulkSubmitResponse>)> {
    let _permit = match &state.limiters.file_uploads {
        Some(limiter) => Some(limiter.acquire().await?),
        None => None,
    };

    let mut contents: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut webhook_url: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Failed to parse multipart data: {e}"),
    })? {
        match field.name().unwrap_or_default() {
            "file" => {
                filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| Error::BadRequest {
                    message: format!("Failed to read uploaded file: {e}"),
                })?;
                contents = Some(String::from_utf8(bytes.to_vec()).map_err(|_| Error::BadRequest {
                    message: "File must be valid UTF-8 text".to_string(),
                })?);
            }
            "webhook_url" => {
                let raw = field.text().await.map_err(|e| Error::BadRequest {
                    message: format!("Failed to read webhook_url: {e}"),
                })?;
                if !raw.trim().is_empty() {
                    webhook_url = Some(parse_webhook_url(&raw)?);
                }
            }
            _ => {}
        }
    }

    let contents = contents.ok_or_else(|| Error::BadRequest {
        message: "Missing 'file' field".to_string(),
    })?;
    let emails = parse_email_list(&contents, state.config.validation.max_bulk_emails)?;
    let job = state.jobs.submit(current_user.id, JobKind::Bulk, emails, webhook_url, filename)?;

    let estimated_time_seconds = (job.total_emails * state.config.validation.estimated_ms_per_email).div_ceil(1000);
    info!(job_id = %abbrev_uuid(&job.id), total = job.total_emails, "Bulk job submitted");

    Ok((
        StatusCode::CREATED,
        Json(BulkSubmitResponse {
            job_id: job.id,
            total_emails: job.total_emails,
            status: job.status,
            estimated_time_seconds,
        }),
    ))
}

/// List the caller's jobs, newest first.
#[utoipa::path(
    get,
    path = "/validate/jobs",
    tag = "validation",
    summary = "List jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Page of jobs", body = Paginated<JobResponse>),
        (status = 401, description = "Missing or invalid API key"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Paginated<JobResponse>>> {
    let filter = JobFilter {
        user_id: Some(current_user.id),
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

#[utoipa::path(
    get,
    path = "/validate/jobs/{id}",
    tag = "validation",
    summary = "Get job",
    description = "Poll a job for status, progress and category counts.",
    params(("id" = uuid::Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job", body = JobResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 404, description = "Job not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn get_job(State(state): State<AppState>, current_user: CurrentUser, Path(id): Path<JobId>) -> Result<Json<JobResponse>> {
    Ok(Json(state.jobs.get(id, Some(current_user.id))?.into()))
}

/// Cancel a job that has not finished. Unconsumed credits are refunded.
#[utoipa::path(
    delete,
    path = "/validate/jobs/{id}",
    tag = "validation",
    summary = "Cancel job",
    description = "Cancelling an already cancelled job is a no-op. Completed or failed jobs cannot be cancelled.",
    params(("id" = uuid::Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job after cancellation", body = CancelJobResponse),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job already completed or failed"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip(state, current_user), fields(job_id = %abbrev_uuid(&id)))]
pub async fn cancel_job(State(state): State<AppState>, current_user: CurrentUser, Path(id): Path<JobId>) -> Result<Json<CancelJobResponse>> {
    let (job, cancelled) = state.jobs.cancel(id, Some(current_user.id))?;
    Ok(Json(CancelJobResponse {
        job: job.into(),
        cancelled,
    }))
}

/// Per-address results, as a JSON page or a CSV download.
#[utoipa::path(
    get,
    path = "/validate/jobs/{id}/results",
    tag = "validation",
    summary = "Job results",
    description = "Results recorded so far. With `format=csv` all results are returned as a file download.",
    params(("id" = uuid::Uuid, Path, description = "Job ID"), JobResultsQuery),
    responses(
        (status = 200, description = "Page of results", body = Paginated<EmailResult>),
        (status = 200, description = "CSV download", content_type = "text/csv"),
        (status = 404, description = "Job not found"),
    ),
    security(("BearerAuth" = []))
)]
pub async fn job_results(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<JobId>,
    Query(query): Query<JobResultsQuery>,
) -> Result<Response> {
    match query.format.unwrap_or_default() {
        ResultFormat::Csv => {
            let results = state.jobs.all_results(id, Some(current_user.id))?;
            let headers = [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (header::CONTENT_DISPOSITION, format!("attachment; filename=\"job-{id}.csv\"")),
            ];
            Ok((headers, results_csv(&results)).into_response())
        }
        ResultFormat::Json => {
            let (results, total) = state
                .jobs
                .results(id, Some(current_user.id), query.pagination.skip(), query.pagination.limit())?;
            Ok(Json(Paginated::new(results, total as i64, &query.pagination)).into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::jobs::{BulkSubmitResponse, CancelJobResponse, JobResponse, SingleValidationResponse};
    use crate::jobs::{JobStatus, Verdict};
    use crate::test_utils::*;
    use axum_test::multipart::{MultipartForm, Part};
    use serde_json::{Value, json};
    use std::time::Duration;

    #[test]
    fn test_parse_email_list_formats() {
        let text = "\u{feff}email,name\n\"a@x.io\",Alice\nb@x.io;Bob\nc@x.io\tCarol\n\nA@X.IO\nnot-an-address\n";
        let emails = parse_email_list(text, 10).unwrap();
        assert_eq!(emails, vec!["a@x.io", "b@x.io", "c@x.io"]);
    }

    #[test]
    fn test_parse_email_list_limits() {
        assert!(matches!(parse_email_list("header\n\n", 10), Err(Error::BadRequest { .. })));
        assert!(parse_email_list("a@x.io\nb@x.io\nc@x.io", 2).is_err());
        // Duplicates do not count towards the limit
        assert_eq!(parse_email_list("a@x.io\nA@x.io\nb@x.io", 2).unwrap().len(), 2);
    }

    #[test]
    fn test_results_csv_escapes() {
        let result = EmailResult {
            index: 0,
            email: "a@x.io".to_string(),
            status: Verdict::Unknown,
            score: 0,
            checks: Default::default(),
            error: Some("timed out, retry".to_string()),
            response_time_ms: 5,
        };
        let csv = results_csv(&[result]);
        let row = csv.lines().nth(1).unwrap();
        assert_eq!(row, "a@x.io,unknown,0,false,,,false,false,,\"timed out, retry\"");
    }

    fn upload(contents: &str) -> MultipartForm {
        MultipartForm::new().add_part("file", Part::bytes(contents.as_bytes().to_vec()).file_name("list.csv"))
    }

    async fn wait_terminal(app: &TestApp, key: &str, id: JobId) -> JobResponse {
        let (name, value) = auth_header(key);
        for _ in 0..300 {
            let job: JobResponse = app
                .server
                .get(&format!("/api/v1/validate/jobs/{id}"))
                .add_header(name.clone(), value.clone())
                .await
                .json();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[test_log::test(tokio::test)]
    async fn test_single_validation_debits_one_credit() {
        let app = create_test_app().await;
        let (user, key) = create_test_user(&app.state, 10);
        let (name, value) = auth_header(&key);

        let response = app
            .server
            .post("/api/v1/validate/single")
            .add_header(name, value)
            .json(&json!({"email": "jane@company.io"}))
            .await;
        response.assert_status_ok();
        let result: SingleValidationResponse = response.json();
        assert_eq!(result.status, Verdict::Valid);
        assert_eq!(app.state.ledger.balance(user.id).unwrap().balance, 9);
    }

    #[test_log::test(tokio::test)]
    async fn test_single_validation_rejects_malformed_without_charge() {
        let app = create_test_app().await;
        let (user, key) = create_test_user(&app.state, 10);
        let (name, value) = auth_header(&key);

        app.server
            .post("/api/v1/validate/single")
            .add_header(name, value)
            .json(&json!({"email": "not an address"}))
            .await
            .assert_status_bad_request();
        assert_eq!(app.state.ledger.balance(user.id).unwrap().balance, 10);
    }

    #[test_log::test(tokio::test)]
    async fn test_single_validation_without_credits() {
        let app = create_test_app().await;
        let (_, key) = create_test_user(&app.state, 0);
        let (name, value) = auth_header(&key);

        let response = app
            .server
            .post("/api/v1/validate/single")
            .add_header(name, value)
            .json(&json!({"email": "jane@company.io"}))
            .await;
        response.assert_status(StatusCode::PAYMENT_REQUIRED);
        let body: Value = response.json();
        assert_eq!(body["required"], 1);
        assert_eq!(body["available"], 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_bulk_job_runs_to_completion() {
        let app = create_test_app().await;
        let (user, key) = create_test_user(&app.state, 10);
        let (name, value) = auth_header(&key);

        let response = app
            .server
            .post("/api/v1/validate/bulk")
            .add_header(name.clone(), value.clone())
            .multipart(upload("email\njane@company.io\nsales@company.io\nx@mailinator.com\njane@company.io\n"))
            .await;
        response.assert_status(StatusCode::CREATED);
        let submitted: BulkSubmitResponse = response.json();
        assert_eq!(submitted.total_emails, 3);

        let job = wait_terminal(&app, &key, submitted.job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_emails, 3);
        assert_eq!((job.valid_count, job.role_based_count, job.disposable_count), (1, 1, 1));
        assert_eq!(job.credits_consumed, 3);
        assert_eq!(job.source_filename.as_deref(), Some("list.csv"));
        assert_eq!(app.state.ledger.balance(user.id).unwrap().balance, 7);

        let page: Value = app
            .server
            .get(&format!("/api/v1/validate/jobs/{}/results", submitted.job_id))
            .add_header(name.clone(), value.clone())
            .await
            .json();
        assert_eq!(page["pagination"]["total"], 3);
        assert_eq!(page["data"][0]["email"], "jane@company.io");

        let csv = app
            .server
            .get(&format!("/api/v1/validate/jobs/{}/results", submitted.job_id))
            .add_query_param("format", "csv")
            .add_header(name, value)
            .await;
        csv.assert_status_ok();
        assert_eq!(csv.text().lines().count(), 4);
    }

    #[test_log::test(tokio::test)]
    async fn test_bulk_insufficient_credits_creates_no_job() {
        let app = create_test_app().await;
        let (user, key) = create_test_user(&app.state, 1);
        let (name, value) = auth_header(&key);

        app.server
            .post("/api/v1/validate/bulk")
            .add_header(name, value)
            .multipart(upload("a@company.io\nb@company.io\n"))
            .await
            .assert_status(StatusCode::PAYMENT_REQUIRED);

        let (jobs, total) = app.state.jobs.list(&JobFilter {
            user_id: Some(user.id),
            ..JobFilter::new(0, 10)
        });
        assert!(jobs.is_empty());
        assert_eq!(total, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_bulk_rejects_bad_webhook_url() {
        let app = create_test_app().await;
        let (_, key) = create_test_user(&app.state, 10);
        let (name, value) = auth_header(&key);

        app.server
            .post("/api/v1/validate/bulk")
            .add_header(name, value)
            .multipart(upload("a@company.io\n").add_text("webhook_url", "ftp://hooks.example.com"))
            .await
            .assert_status_bad_request();
    }

    #[test_log::test(tokio::test)]
    async fn test_jobs_are_private_and_cancellable() {
        let app = create_test_app().await;
        let (owner, owner_key) = create_test_user(&app.state, 10);
        let (_, other_key) = create_test_user(&app.state, 10);

        // Submitted directly so no worker races the cancellation
        let job = app
            .state
            .jobs
            .submit(owner.id, JobKind::Single, vec!["a@company.io".to_string()], None, None)
            .unwrap();

        let (name, value) = auth_header(&other_key);
        app.server
            .get(&format!("/api/v1/validate/jobs/{}", job.id))
            .add_header(name, value)
            .await
            .assert_status_not_found();

        let (name, value) = auth_header(&owner_key);
        let first: CancelJobResponse = app
            .server
            .delete(&format!("/api/v1/validate/jobs/{}", job.id))
            .add_header(name.clone(), value.clone())
            .await
            .json();
        assert!(first.cancelled);
        assert_eq!(first.job.credits_refunded, 1);

        let second: CancelJobResponse = app
            .server
            .delete(&format!("/api/v1/validate/jobs/{}", job.id))
            .add_header(name.clone(), value.clone())
            .await
            .json();
        assert!(!second.cancelled);
        assert_eq!(app.state.ledger.balance(owner.id).unwrap().balance, 10);

        let page: Value = app.server.get("/api/v1/validate/jobs").add_header(name.clone(), value.clone()).await.json();
        assert_eq!(page["pagination"]["total"], 1);
        assert_eq!(page["data"][0]["status"], "cancelled");

        let response = app
            .server
            .get(&format!("/api/v1/validate/jobs?page={}&limit=100", i64::MAX))
            .add_header(name.clone(), value.clone())
            .await;
        response.assert_status_ok();
        let page: Value = response.json();
        assert_eq!(page["pagination"]["total"], 1);
        assert_eq!(page["data"].as_array().unwrap().len(), 0);

        let response = app
            .server
            .get(&format!("/api/v1/validate/jobs/{}/results?page={}", job.id, i64::MAX))
            .add_header(name, value)
            .await;
        response.assert_status_ok();
    }
}
