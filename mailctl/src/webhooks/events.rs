//! Webhook payloads for job terminal states.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::jobs::types::{Job, JobStatus, VerdictCounts};
use crate::types::{Credits, JobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum WebhookEventType {
    #[serde(rename = "job.completed")]
    JobCompleted,
    #[serde(rename = "job.failed")]
    JobFailed,
    #[serde(rename = "job.cancelled")]
    JobCancelled,
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JobCompleted => write!(f, "job.completed"),
            Self::JobFailed => write!(f, "job.failed"),
            Self::JobCancelled => write!(f, "job.cancelled"),
        }
    }
}

/// Final job summary carried in the webhook body.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobSummary {
    #[schema(value_type = String, format = "uuid")]
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_emails: u64,
    pub processed_emails: u64,
    #[serde(flatten)]
    pub counts: VerdictCounts,
    pub credits_consumed: Credits,
    pub credits_refunded: Credits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    pub timestamp: DateTime<Utc>,
    pub data: JobSummary,
}

impl WebhookEvent {
    /// Event for a job that has reached a terminal state, `None` otherwise.
    pub fn job_terminal(job: &Job) -> Option<Self> {
        let event_type = match job.status {
            JobStatus::Completed => WebhookEventType::JobCompleted,
            JobStatus::Failed => WebhookEventType::JobFailed,
            JobStatus::Cancelled => WebhookEventType::JobCancelled,
            _ => return None,
        };
        Some(Self {
            event_type,
            timestamp: Utc::now(),
            data: JobSummary {
                job_id: job.id,
                status: job.status,
                total_emails: job.total_emails,
                processed_emails: job.processed_emails,
                counts: job.counts,
                credits_consumed: job.credits_consumed,
                credits_refunded: job.credits_refunded,
                result_file: job.result_file.clone(),
                error: job.error.clone(),
                created_at: job.created_at,
                completed_at: job.completed_at.unwrap_or_else(Utc::now),
            },
        })
    }
}
