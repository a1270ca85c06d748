//! Job store: the persistence seam of the digest engine.
//!
//! Every query goes through a typed [`JobFilter`] that can only be built with an
//! environment id, so a store call can never escape its environment.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Job, JobStatus, StepType};

pub use memory::InMemoryJobStore;
pub use postgres::PgJobStore;

/// Criterion on the job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdMatch {
    Eq(Uuid),
    Ne(Uuid),
    In(Vec<Uuid>),
}

impl IdMatch {
    fn matches(&self, id: Uuid) -> bool {
        match self {
            IdMatch::Eq(expected) => id == *expected,
            IdMatch::Ne(excluded) => id != *excluded,
            IdMatch::In(ids) => ids.contains(&id),
        }
    }
}

/// Conjunction of equality predicates over jobs, always scoped to one environment.
#[derive(Debug, Clone)]
pub struct JobFilter {
    environment_id: Uuid,
    id: Option<IdMatch>,
    transaction_id: Option<String>,
    subscriber_id: Option<Uuid>,
    template_id: Option<Uuid>,
    merged_digest_id: Option<Uuid>,
    status: Option<JobStatus>,
    step_type: Option<StepType>,
    created_since: Option<DateTime<Utc>>,
    payload_field: Option<(String, Value)>,
}

impl JobFilter {
    pub fn in_environment(environment_id: Uuid) -> Self {
        Self {
            environment_id,
            id: None,
            transaction_id: None,
            subscriber_id: None,
            template_id: None,
            merged_digest_id: None,
            status: None,
            step_type: None,
            created_since: None,
            payload_field: None,
        }
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(IdMatch::Eq(id));
        self
    }

    pub fn excluding_id(mut self, id: Uuid) -> Self {
        self.id = Some(IdMatch::Ne(id));
        self
    }

    pub fn ids(mut self, ids: Vec<Uuid>) -> Self {
        self.id = Some(IdMatch::In(ids));
        self
    }

    pub fn transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn subscriber(mut self, subscriber_id: Uuid) -> Self {
        self.subscriber_id = Some(subscriber_id);
        self
    }

    pub fn template(mut self, template_id: Uuid) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn merged_into(mut self, digest_job_id: Uuid) -> Self {
        self.merged_digest_id = Some(digest_job_id);
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn step_type(mut self, step_type: StepType) -> Self {
        self.step_type = Some(step_type);
        self
    }

    /// Only jobs created at or after `since`.
    pub fn created_since(mut self, since: DateTime<Utc>) -> Self {
        self.created_since = Some(since);
        self
    }

    /// Only jobs whose payload holds `value` at the dot-separated `path`.
    pub fn payload_field(mut self, path: impl Into<String>, value: Value) -> Self {
        self.payload_field = Some((path.into(), value));
        self
    }

    /// Reference semantics of the filter; adapters must agree with it.
    pub fn matches(&self, job: &Job) -> bool {
        if job.environment_id != self.environment_id {
            return false;
        }
        if let Some(id) = &self.id
            && !id.matches(job.id)
        {
            return false;
        }
        if let Some(transaction_id) = &self.transaction_id
            && job.transaction_id != *transaction_id
        {
            return false;
        }
        if self.subscriber_id.is_some_and(|s| s != job.subscriber_id)
            || self.template_id.is_some_and(|t| t != job.template_id)
            || self.status.is_some_and(|s| s != job.status)
            || self.step_type.is_some_and(|t| t != job.step_type)
            || self.created_since.is_some_and(|since| job.created_at < since)
        {
            return false;
        }
        if let Some(merged_into) = self.merged_digest_id
            && job.merged_digest_id != Some(merged_into)
        {
            return false;
        }
        if let Some((path, value)) = &self.payload_field
            && job.payload_value(path) != Some(value)
        {
            return false;
        }
        true
    }
}

/// Mutations a store may apply to matched jobs.
///
/// No variant touches `merged_digest_id`; it is immutable once set.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPatch {
    /// Set `digest.events` to the aggregated event set.
    SetDigestEvents(Vec<Value>),
}

/// Durable store of jobs.
///
/// `find` and `find_payloads` return jobs ordered by `created_at`, then `id`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find(&self, filter: &JobFilter) -> Result<Vec<Job>, AppError>;

    /// Same selection as `find`, projected to the payload column.
    async fn find_payloads(&self, filter: &JobFilter) -> Result<Vec<Value>, AppError>;

    async fn find_one(&self, filter: &JobFilter) -> Result<Option<Job>, AppError>;

    /// Apply `patch` to every matching job; returns the number of jobs affected.
    async fn update(&self, filter: &JobFilter, patch: &JobPatch) -> Result<u64, AppError>;
}
