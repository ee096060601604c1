//! In-memory job records.
//!
//! Each job lives behind its own mutex together with its address list, per-address results, the
//! worker lease, and the credit reservation backing it. Holding that mutex is what makes progress
//! and credit commits for one job a single-writer affair.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::types::{EmailResult, Job};
use crate::types::{JobId, ReservationId, UserId};

/// Claim held by the worker processing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub token: Uuid,
    pub heartbeat: DateTime<Utc>,
}

#[derive(Debug)]
pub struct JobEntry {
    pub job: Job,
    pub emails: Vec<String>,
    pub results: Vec<Option<EmailResult>>,
    pub lease: Option<Lease>,
    pub reservation: Option<ReservationId>,
}

impl JobEntry {
    pub fn new(job: Job, emails: Vec<String>, reservation: ReservationId) -> Self {
        let results = vec![None; emails.len()];
        Self {
            job,
            emails,
            results,
            lease: None,
            reservation: Some(reservation),
        }
    }

    /// Addresses without a recorded result, in submission order.
    pub fn pending(&self) -> Vec<(usize, String)> {
        self.results
            .iter()
            .enumerate()
            .filter(|(_, result)| result.is_none())
            .map(|(index, _)| (index, self.emails[index].clone()))
            .collect()
    }

    pub fn holds_lease(&self, token: Uuid) -> bool {
        self.lease.is_some_and(|lease| lease.token == token)
    }
}

pub type SharedEntry = Arc<Mutex<JobEntry>>;

#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<DashMap<JobId, SharedEntry>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: JobEntry) -> SharedEntry {
        let id = entry.job.id;
        let shared = Arc::new(Mutex::new(entry));
        self.jobs.insert(id, shared.clone());
        shared
    }

    /// The map guard is released before the caller locks the entry.
    pub fn get(&self, id: JobId) -> Option<SharedEntry> {
        self.jobs.get(&id).map(|entry| entry.clone())
    }

    pub fn remove(&self, id: JobId) -> bool {
        self.jobs.remove(&id).is_some()
    }

    pub fn all(&self) -> Vec<SharedEntry> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn ids_for_user(&self, user_id: UserId) -> Vec<JobId> {
        self.all()
            .into_iter()
            .filter_map(|entry| {
                let entry = entry.lock();
                (entry.job.user_id == user_id).then_some(entry.job.id)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
