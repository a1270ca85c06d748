//! Redis queue consumer for digest commands.
//!
//! Commands are JSON-encoded `DigestCommand`s pushed onto a Redis list. The
//! worker pops them one at a time with `BLPOP` and runs the coordinator
//! sequentially. Nothing is retried here: undecodable commands and failed
//! coordinations go to `{queue}:dead` with the error attached, and whoever
//! owns the dead-letter list decides what to replay.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use courier_common::error::AppError;
use courier_common::types::DigestCommand;
use courier_engine::{DigestCoordinator, DigestError};

/// A command the worker could not process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The raw queue entry, as popped.
    pub command: String,
    pub error: String,
    /// Whether the failure looked retryable (store or Redis outage).
    pub transient: bool,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    fn new(raw: &str, error: String, transient: bool) -> Self {
        Self {
            command: raw.to_string(),
            error,
            transient,
            failed_at: Utc::now(),
        }
    }
}

/// Decode a queue entry.
pub fn decode_command(raw: &str) -> Result<DigestCommand, AppError> {
    Ok(serde_json::from_str(raw)?)
}

/// Whether a coordination failure may succeed if replayed later.
pub fn is_transient(error: &DigestError) -> bool {
    match error {
        DigestError::JobNotFound { .. } => false,
        DigestError::Collaborator(inner) => inner.is_transient(),
    }
}

pub fn dead_letter_key(queue_key: &str) -> String {
    format!("{queue_key}:dead")
}

/// Sequential consumer of the digest command queue.
pub struct DigestWorker {
    coordinator: Arc<DigestCoordinator>,
    redis: ConnectionManager,
    queue_key: String,
    poll_interval: Duration,
}

impl DigestWorker {
    pub fn new(
        coordinator: Arc<DigestCoordinator>,
        redis: ConnectionManager,
        queue_key: String,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            coordinator,
            redis,
            queue_key,
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }

    /// Start the consume loop. Runs until the task is cancelled or Redis fails.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        tracing::info!(
            queue = %self.queue_key,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Digest worker started"
        );

        loop {
            // BLPOP returns nil once the timeout elapses on an empty list.
            let popped: Option<(String, String)> = redis::cmd("BLPOP")
                .arg(&self.queue_key)
                .arg(self.poll_interval.as_secs_f64())
                .query_async(&mut self.redis)
                .await?;

            if let Some((_, raw)) = popped {
                self.handle(&raw).await?;
            }
        }
    }

    /// Process one queue entry. Only dead-letter write failures are returned.
    pub async fn handle(&mut self, raw: &str) -> anyhow::Result<()> {
        match process_command(&self.coordinator, raw).await {
            Some(entry) => self.dead_letter(raw, &entry).await,
            None => Ok(()),
        }
    }

    async fn dead_letter(&mut self, raw: &str, entry: &DeadLetter) -> anyhow::Result<()> {
        let key = dead_letter_key(&self.queue_key);
        let pushed: redis::RedisResult<i64> = redis::cmd("RPUSH")
            .arg(&key)
            .arg(serde_json::to_string(entry)?)
            .query_async(&mut self.redis)
            .await;

        if let Err(e) = pushed {
            // Already popped from the queue; the log line is the only copy left.
            tracing::error!(
                dead_letter_key = %key,
                command = %raw,
                failure = %entry.error,
                error = %e,
                "Failed to dead-letter digest command"
            );
            return Err(e.into());
        }
        Ok(())
    }
}

/// Decode and run one queue entry, returning the dead letter to record if it failed.
pub async fn process_command(coordinator: &DigestCoordinator, raw: &str) -> Option<DeadLetter> {
    let command = match decode_command(raw) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding undecodable digest command");
            return Some(DeadLetter::new(raw, e.to_string(), false));
        }
    };

    match coordinator.execute(&command).await {
        Ok(outcome) => {
            tracing::info!(
                job_id = %command.job_id,
                aggregator = outcome.aggregator,
                events = outcome.events.len(),
                updated = outcome.updated,
                "Digest command processed"
            );
            None
        }
        Err(e) => {
            let transient = is_transient(&e);
            tracing::error!(
                job_id = %command.job_id,
                transaction_id = %command.transaction_id,
                error = %e,
                transient,
                "Digest command failed"
            );
            Some(DeadLetter::new(raw, e.to_string(), transient))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    use courier_common::types::{Job, JobStatus, StepType};
    use courier_engine::audit::InMemoryAuditLog;
    use courier_engine::flags::StaticFlagResolver;
    use courier_engine::store::InMemoryJobStore;

    fn make_command(environment_id: Uuid, job_id: Uuid) -> DigestCommand {
        DigestCommand {
            environment_id,
            organization_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            subscriber_id: Uuid::new_v4(),
            job_id,
            transaction_id: "txn-1".to_string(),
        }
    }

    fn make_coordinator(jobs: Arc<InMemoryJobStore>) -> DigestCoordinator {
        DigestCoordinator::new(
            jobs,
            Arc::new(StaticFlagResolver(true)),
            Arc::new(InMemoryAuditLog::new()),
        )
    }

    #[tokio::test]
    async fn test_process_undecodable_command_is_dead_lettered() {
        let coordinator = make_coordinator(Arc::new(InMemoryJobStore::new()));
        let entry = process_command(&coordinator, "not json").await.unwrap();
        assert_eq!(entry.command, "not json");
        assert!(entry.error.starts_with("Serialization error"));
        assert!(!entry.transient);
    }

    #[tokio::test]
    async fn test_process_missing_job_is_dead_lettered() {
        let coordinator = make_coordinator(Arc::new(InMemoryJobStore::new()));
        let raw = serde_json::to_string(&make_command(Uuid::new_v4(), Uuid::new_v4())).unwrap();

        let entry = process_command(&coordinator, &raw).await.unwrap();
        assert_eq!(entry.command, raw);
        assert!(!entry.transient);
    }

    #[tokio::test]
    async fn test_process_successful_command_needs_no_dead_letter() {
        let jobs = Arc::new(InMemoryJobStore::new());
        let env = Uuid::new_v4();
        let command = make_command(env, Uuid::new_v4());
        let mut job = Job::new(
            env,
            command.organization_id,
            Uuid::new_v4(),
            command.transaction_id.clone(),
            command.subscriber_id,
            StepType::Digest,
            JobStatus::Running,
            json!({"event": "current"}),
        );
        job.id = command.job_id;
        jobs.insert(job).unwrap();

        let raw = serde_json::to_string(&command).unwrap();
        assert!(process_command(&make_coordinator(jobs), &raw).await.is_none());
    }

    #[test]
    fn test_decode_command() {
        let command = DigestCommand {
            environment_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            subscriber_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            transaction_id: "txn-1".to_string(),
        };
        let raw = serde_json::to_string(&command).unwrap();
        assert_eq!(decode_command(&raw).unwrap(), command);
    }

    #[test]
    fn test_decode_rejects_incomplete_command() {
        let err = decode_command(r#"{"job_id": "not-a-uuid"}"#).unwrap_err();
        assert!(matches!(err, AppError::Serialization(_)));
    }

    #[test]
    fn test_job_not_found_is_not_transient() {
        let err = DigestError::JobNotFound {
            job_id: Uuid::new_v4(),
            environment_id: Uuid::new_v4(),
        };
        assert!(!is_transient(&err));
    }

    #[test]
    fn test_redis_failure_is_transient() {
        let err = DigestError::Collaborator(AppError::from(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "broken pipe",
        ))));
        assert!(is_transient(&err));
    }

    #[test]
    fn test_dead_letter_key() {
        assert_eq!(dead_letter_key("digest:commands"), "digest:commands:dead");
    }
}
