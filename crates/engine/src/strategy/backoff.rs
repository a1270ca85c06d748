//! Backoff digest: collects the events that arrived since the digest job was
//! created, while the backoff window was held open.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use courier_common::error::AppError;

use super::{DigestEventsCommand, DigestEventsStrategy, collect_events};
use crate::audit::ExecutionAuditLog;
use crate::store::JobStore;

pub struct BackoffDigestEvents {
    jobs: Arc<dyn JobStore>,
    audit: Arc<dyn ExecutionAuditLog>,
}

impl BackoffDigestEvents {
    pub fn new(jobs: Arc<dyn JobStore>, audit: Arc<dyn ExecutionAuditLog>) -> Self {
        Self { jobs, audit }
    }
}

#[async_trait]
impl DigestEventsStrategy for BackoffDigestEvents {
    async fn execute(&self, command: &DigestEventsCommand) -> Result<Vec<Value>, AppError> {
        let since = command.current_job.created_at;
        collect_events(&self.jobs, &self.audit, command, since).await
    }

    fn name(&self) -> &'static str {
        "backoff"
    }
}
