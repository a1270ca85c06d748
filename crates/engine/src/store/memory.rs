//! In-memory job store for tests and local runs.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::Job;

use super::{JobFilter, JobPatch, JobStore};

/// Insertion-ordered job store backed by a `Vec`.
///
/// Jobs are expected to be inserted in creation order, which is then the
/// order `find` reports.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<Vec<Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) -> Result<(), AppError> {
        let mut jobs = self.write()?;
        if jobs.iter().any(|existing| existing.id == job.id) {
            return Err(AppError::Validation(format!("Job {} already exists", job.id)));
        }
        jobs.push(job);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        Ok(self.read()?.iter().find(|job| job.id == id).cloned())
    }

    /// Number of stored jobs.
    pub fn count(&self) -> Result<usize, AppError> {
        Ok(self.read()?.len())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Job>>, AppError> {
        self.jobs
            .read()
            .map_err(|_| AppError::Internal("job store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Job>>, AppError> {
        self.jobs
            .write()
            .map_err(|_| AppError::Internal("job store lock poisoned".to_string()))
    }
}

fn set_digest_events(job: &mut Job, events: &[Value]) {
    let events = Value::Array(events.to_vec());
    match job.digest.as_mut() {
        Some(Value::Object(digest)) => {
            digest.insert("events".to_string(), events);
        }
        _ => job.digest = Some(json!({ "events": events })),
    }
    job.updated_at = Utc::now();
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn find(&self, filter: &JobFilter) -> Result<Vec<Job>, AppError> {
        Ok(self
            .read()?
            .iter()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect())
    }

    async fn find_payloads(&self, filter: &JobFilter) -> Result<Vec<Value>, AppError> {
        Ok(self
            .read()?
            .iter()
            .filter(|job| filter.matches(job))
            .map(|job| job.payload.clone())
            .collect())
    }

    async fn find_one(&self, filter: &JobFilter) -> Result<Option<Job>, AppError> {
        Ok(self.read()?.iter().find(|job| filter.matches(job)).cloned())
    }

    async fn update(&self, filter: &JobFilter, patch: &JobPatch) -> Result<u64, AppError> {
        let mut jobs = self.write()?;
        let mut affected = 0u64;
        for job in jobs.iter_mut().filter(|job| filter.matches(job)) {
            match patch {
                JobPatch::SetDigestEvents(events) => set_digest_events(job, events),
            }
            affected += 1;
        }
        Ok(affected)
    }
}
