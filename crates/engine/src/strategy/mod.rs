//! Legacy digest event strategies.
//!
//! Both strategies collect the completed trigger jobs of the current job's
//! template and subscriber inside a time window, optionally partitioned by the
//! digest key, and order them so the current transaction's event leads.

pub mod backoff;
pub mod regular;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    DigestMetadata, ExecutionDetail, ExecutionDetailKind, Job, JobStatus, StepType,
};

use crate::audit::ExecutionAuditLog;
use crate::store::{JobFilter, JobStore};

pub use backoff::BackoffDigestEvents;
pub use regular::RegularDigestEvents;

/// Input of a digest event strategy.
#[derive(Debug, Clone)]
pub struct DigestEventsCommand {
    pub current_job: Job,
    pub subscriber_id: Uuid,
}

/// Produces the ordered event payloads that belong in a legacy digest.
#[async_trait]
pub trait DigestEventsStrategy: Send + Sync {
    async fn execute(&self, command: &DigestEventsCommand) -> Result<Vec<Value>, AppError>;

    /// Human-readable name for logs.
    fn name(&self) -> &'static str;
}

/// Shared query-and-order routine, parameterized by the window start.
pub(crate) async fn collect_events(
    jobs: &Arc<dyn JobStore>,
    audit: &Arc<dyn ExecutionAuditLog>,
    command: &DigestEventsCommand,
    since: DateTime<Utc>,
) -> Result<Vec<Value>, AppError> {
    let current = &command.current_job;
    let metadata = current.digest_metadata().unwrap_or_default();
    let filter = trigger_filter(current, command.subscriber_id, &metadata, since);

    let triggers = jobs.find(&filter).await?;
    let events = order_events(current, &triggers);

    tracing::debug!(
        job_id = %current.id,
        window_start = %since,
        triggers = triggers.len(),
        events = events.len(),
        "Collected legacy digest events"
    );

    let detail = ExecutionDetail::from_job(current, ExecutionDetailKind::DigestTriggeredEvents)
        .with_raw(serde_json::to_string(&events)?);
    audit.record(&detail).await?;

    Ok(events)
}

fn trigger_filter(
    current: &Job,
    subscriber_id: Uuid,
    metadata: &DigestMetadata,
    since: DateTime<Utc>,
) -> JobFilter {
    let filter = JobFilter::in_environment(current.environment_id)
        .template(current.template_id)
        .subscriber(subscriber_id)
        .step_type(StepType::Trigger)
        .status(JobStatus::Completed)
        .created_since(since);

    // Without a value at the digest key there is nothing to partition on.
    match metadata.digest_key.as_deref().and_then(|key| {
        current
            .payload_value(key)
            .map(|value| (key.to_string(), value.clone()))
    }) {
        Some((key, value)) => filter.payload_field(key, value),
        None => filter,
    }
}

/// The current transaction's trigger payload first (or the current job's own
/// payload when that trigger is outside the window), then every other
/// trigger's payload in store order.
fn order_events(current: &Job, triggers: &[Job]) -> Vec<Value> {
    let lead = triggers
        .iter()
        .find(|job| job.transaction_id == current.transaction_id);

    let mut events = Vec::with_capacity(triggers.len() + 1);
    events.push(lead.map_or(&current.payload, |job| &job.payload).clone());
    events.extend(
        triggers
            .iter()
            .filter(|job| lead.is_none_or(|lead| lead.id != job.id))
            .map(|job| job.payload.clone()),
    );
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_trigger(current: &Job, transaction_id: &str, payload: Value) -> Job {
        Job::new(
            current.environment_id,
            current.organization_id,
            current.template_id,
            transaction_id,
            current.subscriber_id,
            StepType::Trigger,
            JobStatus::Completed,
            payload,
        )
    }

    fn make_current() -> Job {
        Job::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "txn-current",
            Uuid::new_v4(),
            StepType::Digest,
            JobStatus::Running,
            json!({"id": "current"}),
        )
    }

    #[test]
    fn test_order_events_current_transaction_leads() {
        let current = make_current();
        let a = make_trigger(&current, "txn-a", json!({"id": "a"}));
        let own = make_trigger(&current, "txn-current", json!({"id": "own"}));
        let b = make_trigger(&current, "txn-b", json!({"id": "b"}));

        let events = order_events(&current, &[a, own, b]);
        assert_eq!(
            events,
            vec![json!({"id": "own"}), json!({"id": "a"}), json!({"id": "b"})]
        );
    }

    #[test]
    fn test_order_events_falls_back_to_current_payload() {
        let current = make_current();
        let a = make_trigger(&current, "txn-a", json!({"id": "a"}));

        let events = order_events(&current, &[a]);
        assert_eq!(events, vec![json!({"id": "current"}), json!({"id": "a"})]);
    }

    #[test]
    fn test_trigger_filter_partitions_by_digest_key() {
        let mut current = make_current();
        current.payload = json!({"post": {"id": 9}});
        let metadata = DigestMetadata {
            digest_key: Some("post.id".to_string()),
            ..Default::default()
        };
        let filter = trigger_filter(&current, current.subscriber_id, &metadata, current.created_at);

        let same_key = make_trigger(&current, "txn-a", json!({"post": {"id": 9}}));
        let other_key = make_trigger(&current, "txn-b", json!({"post": {"id": 10}}));
        assert!(filter.matches(&same_key));
        assert!(!filter.matches(&other_key));
    }

    #[test]
    fn test_trigger_filter_without_key_value_does_not_partition() {
        let current = make_current();
        let metadata = DigestMetadata {
            digest_key: Some("post.id".to_string()),
            ..Default::default()
        };
        let filter = trigger_filter(&current, current.subscriber_id, &metadata, current.created_at);
        let trigger = make_trigger(&current, "txn-a", json!({"post": {"id": 10}}));
        assert!(filter.matches(&trigger));
    }
}
