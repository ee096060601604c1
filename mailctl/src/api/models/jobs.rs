//! API request/response models for validation and jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::PageQuery;
use crate::checker::{CheckOptions, Checks};
use crate::jobs::{EmailResult, Job, JobKind, JobStatus, Verdict, VerdictCounts};
use crate::types::{Credits, JobId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SingleValidationRequest {
    pub email: String,
    #[serde(default)]
    pub options: CheckOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SingleValidationResponse {
    pub email: String,
    pub status: Verdict,
    pub score: u8,
    pub checks: Checks,
    pub response_time_ms: u64,
}

impl From<EmailResult> for SingleValidationResponse {
    fn from(result: EmailResult) -> Self {
        Self {
            email: result.email,
            status: result.status,
            score: result.score,
            checks: result.checks,
            response_time_ms: result.response_time_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BulkSubmitResponse {
    #[schema(value_type = String, format = "uuid")]
    pub job_id: JobId,
    pub total_emails: u64,
    pub status: JobStatus,
    pub estimated_time_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: JobId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub total_emails: u64,
    pub processed_emails: u64,
    /// Percentage of addresses processed, 0 to 100
    pub progress: f64,
    pub valid_count: u64,
    pub invalid_count: u64,
    pub catch_all_count: u64,
    pub disposable_count: u64,
    pub role_based_count: u64,
    pub unknown_count: u64,
    pub credits_reserved: Credits,
    pub credits_consumed: Credits,
    pub credits_refunded: Credits,
    pub source_filename: Option<String>,
    pub webhook_url: Option<String>,
    pub result_file: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let VerdictCounts {
            valid_count,
            invalid_count,
            catch_all_count,
            disposable_count,
            role_based_count,
            unknown_count,
        } = job.counts;
        let progress = if job.total_emails == 0 {
            0.0
        } else {
            (job.processed_emails as f64 * 10_000.0 / job.total_emails as f64).round() / 100.0
        };
        Self {
            id: job.id,
            user_id: job.user_id,
            kind: job.kind,
            status: job.status,
            total_emails: job.total_emails,
            processed_emails: job.processed_emails,
            progress,
            valid_count,
            invalid_count,
            catch_all_count,
            disposable_count,
            role_based_count,
            unknown_count,
            credits_reserved: job.credits_reserved,
            credits_consumed: job.credits_consumed,
            credits_refunded: job.credits_refunded,
            source_filename: job.source_filename,
            webhook_url: job.webhook_url,
            result_file: job.result_file,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// Body of a cancel request's response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelJobResponse {
    pub job: JobResponse,
    /// False when the job had already been cancelled
    pub cancelled: bool,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListJobsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: PageQuery,

    pub status: Option<JobStatus>,
    #[serde(rename = "type")]
    pub kind: Option<JobKind>,
    /// Admin listing only
    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResultFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct JobResultsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: PageQuery,

    /// `csv` downloads every result, ignoring pagination
    pub format: Option<ResultFormat>,
}
