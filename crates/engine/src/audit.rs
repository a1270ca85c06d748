//! Execution audit log: append-only execution details per job.

use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;

use courier_common::error::AppError;
use courier_common::types::ExecutionDetail;

/// Sink for execution details.
#[async_trait]
pub trait ExecutionAuditLog: Send + Sync {
    async fn record(&self, detail: &ExecutionDetail) -> Result<(), AppError>;
}

/// Audit log over the `execution_details` table.
#[derive(Clone)]
pub struct PgExecutionAuditLog {
    pool: PgPool,
}

impl PgExecutionAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionAuditLog for PgExecutionAuditLog {
    async fn record(&self, detail: &ExecutionDetail) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO execution_details (
                id, job_id, environment_id, organization_id, subscriber_id, transaction_id,
                step_type, detail, source, status, is_test, is_retry, raw, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(detail.id)
        .bind(detail.job_id)
        .bind(detail.environment_id)
        .bind(detail.organization_id)
        .bind(detail.subscriber_id)
        .bind(&detail.transaction_id)
        .bind(detail.step_type)
        .bind(detail.detail)
        .bind(detail.source)
        .bind(detail.status)
        .bind(detail.is_test)
        .bind(detail.is_retry)
        .bind(&detail.raw)
        .bind(detail.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            job_id = %detail.job_id,
            detail = %detail.detail,
            "Execution detail recorded"
        );

        Ok(())
    }
}

/// Audit log that keeps details in memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<ExecutionDetail>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, oldest first.
    pub fn records(&self) -> Vec<ExecutionDetail> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionAuditLog for InMemoryAuditLog {
    async fn record(&self, detail: &ExecutionDetail) -> Result<(), AppError> {
        self.records
            .lock()
            .map_err(|_| AppError::Internal("audit log lock poisoned".to_string()))?
            .push(detail.clone());
        Ok(())
    }
}
