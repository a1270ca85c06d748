//! Digest coordinator.
//!
//! When a digest step completes:
//! 1. Resolve the merged-digest-id flag once for the whole invocation
//! 2. Load the current digest job (missing job is fatal)
//! 3. Aggregate events via the merged-id path or the legacy strategies
//! 4. Find the sibling jobs of the same transaction that still need the events
//! 5. Record a `digested_events_provided` execution detail
//! 6. Write `digest.events` on every sibling in one batch update
//!
//! The audit record is written before the update. If the update then fails,
//! the audit describes an update that never happened; callers see the error
//! and own any retry.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    DigestCommand, ExecutionDetail, ExecutionDetailKind, Job, JobStatus, StepType,
};

use crate::aggregation::{EventAggregator, LegacyAggregator, MergedDigestAggregator};
use crate::audit::ExecutionAuditLog;
use crate::error::DigestError;
use crate::flags::FeatureFlagResolver;
use crate::store::{JobFilter, JobPatch, JobStore};
use crate::strategy::{BackoffDigestEvents, DigestEventsStrategy, RegularDigestEvents};

/// Result of one coordination.
#[derive(Debug, Clone, Serialize)]
pub struct DigestOutcome {
    /// Aggregation path that produced the events.
    pub aggregator: &'static str,
    pub events: Vec<Value>,
    /// Sibling jobs selected to receive the events.
    pub targeted_job_ids: Vec<Uuid>,
    /// Jobs the store reported as updated.
    pub updated: u64,
}

/// Whether a sibling job still needs the aggregated events.
///
/// In-app steps may already be completed and still render the digest later;
/// any other step only needs the events while it has not finished.
pub fn needs_digest_events(job: &Job) -> bool {
    if job.step_type == StepType::InApp && job.status == JobStatus::Completed {
        return true;
    }
    !matches!(job.status, JobStatus::Completed | JobStatus::Failed)
}

/// Stateless orchestrator of digest completion.
pub struct DigestCoordinator {
    jobs: Arc<dyn JobStore>,
    flags: Arc<dyn FeatureFlagResolver>,
    audit: Arc<dyn ExecutionAuditLog>,
    merged: MergedDigestAggregator,
    legacy: LegacyAggregator,
}

impl DigestCoordinator {
    /// Build a coordinator with the store-backed regular and backoff strategies.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        flags: Arc<dyn FeatureFlagResolver>,
        audit: Arc<dyn ExecutionAuditLog>,
    ) -> Self {
        let regular = Arc::new(RegularDigestEvents::new(jobs.clone(), audit.clone()));
        let backoff = Arc::new(BackoffDigestEvents::new(jobs.clone(), audit.clone()));
        Self::with_strategies(jobs, flags, audit, regular, backoff)
    }

    pub fn with_strategies(
        jobs: Arc<dyn JobStore>,
        flags: Arc<dyn FeatureFlagResolver>,
        audit: Arc<dyn ExecutionAuditLog>,
        regular: Arc<dyn DigestEventsStrategy>,
        backoff: Arc<dyn DigestEventsStrategy>,
    ) -> Self {
        Self {
            merged: MergedDigestAggregator::new(jobs.clone()),
            legacy: LegacyAggregator::new(regular, backoff),
            jobs,
            flags,
            audit,
        }
    }

    /// Aggregate the digest's events and hand them to every sibling job that needs them.
    pub async fn execute(&self, command: &DigestCommand) -> Result<DigestOutcome, DigestError> {
        let use_merged_digest_id = self
            .flags
            .evaluate(
                command.environment_id,
                command.organization_id,
                command.user_id,
            )
            .await?;
        let aggregator: &dyn EventAggregator = if use_merged_digest_id {
            &self.merged
        } else {
            &self.legacy
        };

        let current_job = self.current_job(command).await?;
        let events = aggregator.aggregate(&current_job, command).await?;
        let next_jobs = self.jobs_to_update(command).await?;

        let detail =
            ExecutionDetail::from_job(&current_job, ExecutionDetailKind::DigestedEventsProvided)
                .with_raw(serde_json::to_string(&next_jobs).map_err(AppError::from)?);
        self.audit.record(&detail).await?;

        let targeted_job_ids: Vec<Uuid> = next_jobs.iter().map(|job| job.id).collect();
        let updated = self
            .jobs
            .update(
                &JobFilter::in_environment(command.environment_id).ids(targeted_job_ids.clone()),
                &JobPatch::SetDigestEvents(events.clone()),
            )
            .await?;

        tracing::info!(
            job_id = %command.job_id,
            transaction_id = %command.transaction_id,
            aggregator = aggregator.name(),
            events = events.len(),
            targeted = targeted_job_ids.len(),
            updated,
            "Digested events provided"
        );

        Ok(DigestOutcome {
            aggregator: aggregator.name(),
            events,
            targeted_job_ids,
            updated,
        })
    }

    async fn current_job(&self, command: &DigestCommand) -> Result<Job, DigestError> {
        let filter = JobFilter::in_environment(command.environment_id).id(command.job_id);
        match self.jobs.find_one(&filter).await? {
            Some(job) => Ok(job),
            None => {
                tracing::error!(
                    job_id = %command.job_id,
                    environment_id = %command.environment_id,
                    "Digest job is not found"
                );
                Err(DigestError::JobNotFound {
                    job_id: command.job_id,
                    environment_id: command.environment_id,
                })
            }
        }
    }

    async fn jobs_to_update(&self, command: &DigestCommand) -> Result<Vec<Job>, AppError> {
        let filter = JobFilter::in_environment(command.environment_id)
            .transaction(command.transaction_id.clone())
            .subscriber(command.subscriber_id)
            .excluding_id(command.job_id);
        let siblings = self.jobs.find(&filter).await?;

        Ok(siblings.into_iter().filter(needs_digest_events).collect())
    }
}
