//! Event aggregation paths, chosen once per digest by the merged-digest-id flag.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use courier_common::error::AppError;
use courier_common::types::{DigestCommand, Job, JobStatus, StepType};

use crate::store::{JobFilter, JobStore};
use crate::strategy::{DigestEventsCommand, DigestEventsStrategy};

/// Builds the aggregated event set for the current digest job.
#[async_trait]
pub trait EventAggregator: Send + Sync {
    async fn aggregate(
        &self,
        current_job: &Job,
        command: &DigestCommand,
    ) -> Result<Vec<Value>, AppError>;

    fn name(&self) -> &'static str;
}

/// Current scheme: digest jobs merged into this one carry its id.
pub struct MergedDigestAggregator {
    jobs: Arc<dyn JobStore>,
}

impl MergedDigestAggregator {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl EventAggregator for MergedDigestAggregator {
    async fn aggregate(
        &self,
        current_job: &Job,
        command: &DigestCommand,
    ) -> Result<Vec<Value>, AppError> {
        let filter = JobFilter::in_environment(current_job.environment_id)
            .merged_into(current_job.id)
            .status(JobStatus::Merged)
            .step_type(StepType::Digest)
            .subscriber(command.subscriber_id);
        let merged = self.jobs.find_payloads(&filter).await?;

        let mut events = Vec::with_capacity(merged.len() + 1);
        events.push(current_job.payload.clone());
        events.extend(merged);
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "merged_digest_id"
    }
}

/// Backward-compatible scheme: delegate to the regular or backoff strategy.
pub struct LegacyAggregator {
    regular: Arc<dyn DigestEventsStrategy>,
    backoff: Arc<dyn DigestEventsStrategy>,
}

impl LegacyAggregator {
    pub fn new(
        regular: Arc<dyn DigestEventsStrategy>,
        backoff: Arc<dyn DigestEventsStrategy>,
    ) -> Self {
        Self { regular, backoff }
    }

    /// Backoff when the metadata says so, including regular digests still
    /// carrying the legacy `backoff` marker. Missing metadata means regular.
    pub fn select(&self, current_job: &Job) -> &Arc<dyn DigestEventsStrategy> {
        match current_job.digest_metadata() {
            Some(metadata) if metadata.uses_backoff() => &self.backoff,
            _ => &self.regular,
        }
    }
}

#[async_trait]
impl EventAggregator for LegacyAggregator {
    async fn aggregate(
        &self,
        current_job: &Job,
        command: &DigestCommand,
    ) -> Result<Vec<Value>, AppError> {
        let strategy = self.select(current_job);
        tracing::debug!(
            job_id = %current_job.id,
            strategy = strategy.name(),
            "Using legacy digest strategy"
        );

        let strategy_command = DigestEventsCommand {
            current_job: current_job.clone(),
            subscriber_id: command.subscriber_id,
        };
        strategy.execute(&strategy_command).await
    }

    fn name(&self) -> &'static str {
        "legacy"
    }
}
