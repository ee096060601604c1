use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::checker::Checks;
use crate::types::{Credits, JobId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Single,
    Bulk,
}

/// Job lifecycle.
///
/// ```text
/// credits_reserved -> queued -> processing -> completed | failed
/// credits_reserved | queued | processing -> cancelled
/// ```
///
/// Progression is strictly forward and terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    CreditsReserved,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (CreditsReserved, Queued)
                | (Queued, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (CreditsReserved | Queued | Processing, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::CreditsReserved => "credits_reserved",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Classification of one checked address. Every processed address lands in exactly one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Invalid,
    CatchAll,
    Disposable,
    RoleBased,
    Unknown,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Valid => "valid",
            Verdict::Invalid => "invalid",
            Verdict::CatchAll => "catch_all",
            Verdict::Disposable => "disposable",
            Verdict::RoleBased => "role_based",
            Verdict::Unknown => "unknown",
        }
    }
}

/// Per-category tallies of processed addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct VerdictCounts {
    pub valid_count: u64,
    pub invalid_count: u64,
    pub catch_all_count: u64,
    pub disposable_count: u64,
    pub role_based_count: u64,
    pub unknown_count: u64,
}

impl VerdictCounts {
    pub fn record(&mut self, verdict: Verdict) {
        let bucket = match verdict {
            Verdict::Valid => &mut self.valid_count,
            Verdict::Invalid => &mut self.invalid_count,
            Verdict::CatchAll => &mut self.catch_all_count,
            Verdict::Disposable => &mut self.disposable_count,
            Verdict::RoleBased => &mut self.role_based_count,
            Verdict::Unknown => &mut self.unknown_count,
        };
        *bucket += 1;
    }

    pub fn total(&self) -> u64 {
        self.valid_count + self.invalid_count + self.catch_all_count + self.disposable_count + self.role_based_count + self.unknown_count
    }
}

/// A validation job as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total_emails: u64,
    pub processed_emails: u64,
    pub counts: VerdictCounts,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub webhook_url: Option<String>,
    pub result_file: Option<String>,
    pub source_filename: Option<String>,
    pub error: Option<String>,
    pub credits_reserved: Credits,
    pub credits_consumed: Credits,
    pub credits_refunded: Credits,
}

/// Outcome for one address of a job.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct EmailResult {
    /// Position of the address in the submitted list
    pub index: usize,
    pub email: String,
    pub status: Verdict,
    /// Deliverability confidence, 0 to 100
    pub score: u8,
    pub checks: Checks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub user_id: Option<UserId>,
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub skip: i64,
    pub limit: i64,
}

impl JobFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::*;

    const ALL: [JobStatus; 6] = [CreditsReserved, Queued, Processing, Completed, Failed, Cancelled];

    #[test]
    fn test_terminal_states_are_final() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} should be refused");
            }
        }
    }

    #[test]
    fn test_no_backward_transitions() {
        assert!(!Processing.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(CreditsReserved));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!CreditsReserved.can_transition_to(Processing));
    }

    #[test]
    fn test_cancellable_from_every_live_state() {
        for from in [CreditsReserved, Queued, Processing] {
            assert!(from.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&CreditsReserved).unwrap(), "\"credits_reserved\"");
        assert_eq!(CreditsReserved.to_string(), "credits_reserved");
        assert_eq!(serde_json::to_string(&Verdict::CatchAll).unwrap(), "\"catch_all\"");
    }

    #[test]
    fn test_counts_sum() {
        let mut counts = VerdictCounts::default();
        for verdict in [Verdict::Valid, Verdict::Valid, Verdict::Unknown, Verdict::RoleBased] {
            counts.record(verdict);
        }
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.valid_count, 2);
    }
}
