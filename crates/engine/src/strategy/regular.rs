//! Regular digest: a fixed look-back window of `amount` × `unit`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use courier_common::error::AppError;
use courier_common::types::{DigestUnit, Job};

use super::{DigestEventsCommand, DigestEventsStrategy, collect_events};
use crate::audit::ExecutionAuditLog;
use crate::store::JobStore;

/// Window used when the digest metadata does not say.
const DEFAULT_AMOUNT: u64 = 5;
const DEFAULT_UNIT: DigestUnit = DigestUnit::Minutes;

pub struct RegularDigestEvents {
    jobs: Arc<dyn JobStore>,
    audit: Arc<dyn ExecutionAuditLog>,
}

impl RegularDigestEvents {
    pub fn new(jobs: Arc<dyn JobStore>, audit: Arc<dyn ExecutionAuditLog>) -> Self {
        Self { jobs, audit }
    }

    fn window(job: &Job) -> TimeDelta {
        let metadata = job.digest_metadata().unwrap_or_default();
        metadata
            .unit
            .unwrap_or(DEFAULT_UNIT)
            .window(metadata.amount.unwrap_or(DEFAULT_AMOUNT))
    }

    /// Start of the window; clamps to the earliest representable time.
    fn window_start(job: &Job) -> DateTime<Utc> {
        job.created_at
            .checked_sub_signed(Self::window(job))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[async_trait]
impl DigestEventsStrategy for RegularDigestEvents {
    async fn execute(&self, command: &DigestEventsCommand) -> Result<Vec<Value>, AppError> {
        let since = Self::window_start(&command.current_job);
        collect_events(&self.jobs, &self.audit, command, since).await
    }

    fn name(&self) -> &'static str {
        "regular"
    }
}
