//! PostgreSQL-backed job store.
//!
//! Filters are rendered with `sqlx::QueryBuilder` so only the predicates a
//! [`JobFilter`] actually carries end up in the WHERE clause.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use courier_common::error::AppError;
use courier_common::types::Job;

use super::{IdMatch, JobFilter, JobPatch, JobStore};

const JOB_COLUMNS: &str = "id, environment_id, organization_id, template_id, transaction_id, \
     subscriber_id, step_type, status, payload, digest, merged_digest_id, created_at, updated_at";

/// Job store over the `jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Append the WHERE clause for `filter`. The environment predicate is always present.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &JobFilter) {
    qb.push(" WHERE environment_id = ");
    qb.push_bind(filter.environment_id);

    match &filter.id {
        Some(IdMatch::Eq(id)) => {
            qb.push(" AND id = ");
            qb.push_bind(*id);
        }
        Some(IdMatch::Ne(id)) => {
            qb.push(" AND id <> ");
            qb.push_bind(*id);
        }
        Some(IdMatch::In(ids)) => {
            qb.push(" AND id = ANY(");
            qb.push_bind(ids.clone());
            qb.push(")");
        }
        None => {}
    }

    if let Some(transaction_id) = &filter.transaction_id {
        qb.push(" AND transaction_id = ");
        qb.push_bind(transaction_id.clone());
    }
    if let Some(subscriber_id) = filter.subscriber_id {
        qb.push(" AND subscriber_id = ");
        qb.push_bind(subscriber_id);
    }
    if let Some(template_id) = filter.template_id {
        qb.push(" AND template_id = ");
        qb.push_bind(template_id);
    }
    if let Some(merged_digest_id) = filter.merged_digest_id {
        qb.push(" AND merged_digest_id = ");
        qb.push_bind(merged_digest_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ");
        qb.push_bind(status.to_string());
    }
    if let Some(step_type) = filter.step_type {
        qb.push(" AND step_type = ");
        qb.push_bind(step_type.to_string());
    }
    if let Some(since) = filter.created_since {
        qb.push(" AND created_at >= ");
        qb.push_bind(since);
    }
    if let Some((path, value)) = &filter.payload_field {
        let segments: Vec<String> = path
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        qb.push(" AND payload #> ");
        qb.push_bind(segments);
        qb.push("::text[] = ");
        qb.push_bind(value.clone());
        qb.push("::jsonb");
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn find(&self, filter: &JobFilter) -> Result<Vec<Job>, AppError> {
        let mut qb = QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at, id");

        let jobs: Vec<Job> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(jobs)
    }

    async fn find_payloads(&self, filter: &JobFilter) -> Result<Vec<Value>, AppError> {
        let mut qb = QueryBuilder::new("SELECT payload FROM jobs");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at, id");

        let payloads: Vec<Value> = qb.build_query_scalar().fetch_all(&self.pool).await?;
        Ok(payloads)
    }

    async fn find_one(&self, filter: &JobFilter) -> Result<Option<Job>, AppError> {
        let mut qb = QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at, id LIMIT 1");

        let job: Option<Job> = qb.build_query_as().fetch_optional(&self.pool).await?;
        Ok(job)
    }

    async fn update(&self, filter: &JobFilter, patch: &JobPatch) -> Result<u64, AppError> {
        let mut qb = QueryBuilder::new("UPDATE jobs SET ");
        match patch {
            JobPatch::SetDigestEvents(events) => {
                qb.push("digest = jsonb_set(COALESCE(digest, '{}'::jsonb), '{events}', ");
                qb.push_bind(Value::Array(events.clone()));
                qb.push("::jsonb, true)");
            }
        }
        qb.push(", updated_at = now()");
        push_filter(&mut qb, filter);

        let result = qb.build().execute(&self.pool).await?;
        let affected = result.rows_affected();

        tracing::debug!(
            environment_id = %filter.environment_id,
            affected,
            "Job batch update applied"
        );

        Ok(affected)
    }
}
