//! Validation jobs.
//!
//! - [`types`]: job records, statuses and per-address results
//! - [`store`]: per-job locked records
//! - [`manager`]: state machine transitions and credit settlement
//! - [`daemon`]: claims bulk jobs and drives the checker
//! - [`watchdog`]: force-fails jobs that exceed the maximum duration

pub mod daemon;
pub mod error;
pub mod manager;
pub mod store;
pub mod types;
pub mod watchdog;

pub use daemon::{ValidationDaemon, validate_single};
pub use error::JobError;
pub use manager::{ClaimedJob, JobManager, RecordOutcome};
pub use store::JobStore;
pub use types::{EmailResult, Job, JobFilter, JobKind, JobStatus, Verdict, VerdictCounts};
