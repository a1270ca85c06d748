use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kind of workflow step a job executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Trigger,
    Digest,
    Delay,
    InApp,
    Email,
    Sms,
    Chat,
    Push,
    Custom,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepType::Trigger => write!(f, "trigger"),
            StepType::Digest => write!(f, "digest"),
            StepType::Delay => write!(f, "delay"),
            StepType::InApp => write!(f, "in_app"),
            StepType::Email => write!(f, "email"),
            StepType::Sms => write!(f, "sms"),
            StepType::Chat => write!(f, "chat"),
            StepType::Push => write!(f, "push"),
            StepType::Custom => write!(f, "custom"),
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Delayed,
    Canceled,
    Merged,
    Skipped,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Delayed => write!(f, "delayed"),
            JobStatus::Canceled => write!(f, "canceled"),
            JobStatus::Merged => write!(f, "merged"),
            JobStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Windowing scheme of a digest step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestKind {
    Regular,
    Backoff,
}

/// Time unit of a digest window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl DigestUnit {
    /// Length of `amount` units. Months count as 30 days.
    pub fn window(self, amount: u64) -> TimeDelta {
        let unit_secs: i64 = match self {
            DigestUnit::Seconds => 1,
            DigestUnit::Minutes => 60,
            DigestUnit::Hours => 3_600,
            DigestUnit::Days => 86_400,
            DigestUnit::Weeks => 604_800,
            DigestUnit::Months => 2_592_000,
        };
        let secs = i64::try_from(amount)
            .unwrap_or(i64::MAX)
            .saturating_mul(unit_secs);
        TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX)
    }
}

/// Typed view of a job's `digest` JSON column.
///
/// All fields are optional; rows written by older schema versions may carry
/// any subset of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestMetadata {
    #[serde(rename = "type")]
    pub kind: Option<DigestKind>,
    pub amount: Option<u64>,
    pub unit: Option<DigestUnit>,
    /// Dot-separated payload path that partitions events into separate digests.
    pub digest_key: Option<String>,
    /// Legacy backoff marker from regular digests created before `type: backoff` existed.
    pub backoff: Option<bool>,
    pub backoff_amount: Option<u64>,
    pub backoff_unit: Option<DigestUnit>,
    /// Aggregated event set, once the digest has been resolved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Value>,
}

impl DigestMetadata {
    /// Read metadata from a raw `digest` column, one field at a time.
    ///
    /// A field that is missing or has the wrong shape becomes `None` without
    /// affecting its neighbours. Only a non-object value yields `None`.
    pub fn from_value(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        Some(Self {
            kind: field(obj, "type"),
            amount: field(obj, "amount"),
            unit: field(obj, "unit"),
            digest_key: field(obj, "digest_key"),
            backoff: obj.get("backoff").and_then(marker),
            backoff_amount: field(obj, "backoff_amount"),
            backoff_unit: field(obj, "backoff_unit"),
            events: field(obj, "events").unwrap_or_default(),
        })
    }

    /// Whether the legacy path must use the backoff strategy.
    ///
    /// A regular digest that still carries the legacy `backoff` marker counts
    /// as backoff.
    pub fn uses_backoff(&self) -> bool {
        self.kind == Some(DigestKind::Backoff) || self.backoff == Some(true)
    }
}

fn field<T: DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    obj.get(key)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

/// Legacy rows wrote the backoff marker as a bool, a flag string or a number.
fn marker(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(raw) => crate::config::parse_flag(raw),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        _ => None,
    }
}

/// A unit of scheduled workflow work.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub environment_id: Uuid,
    pub organization_id: Uuid,
    pub template_id: Uuid,
    pub transaction_id: String,
    pub subscriber_id: Uuid,
    pub step_type: StepType,
    pub status: JobStatus,
    pub payload: Value,
    pub digest: Option<Value>,
    /// Job whose digest absorbed this one. Set once, never rewritten.
    pub merged_digest_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job with a fresh id and no digest metadata.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        environment_id: Uuid,
        organization_id: Uuid,
        template_id: Uuid,
        transaction_id: impl Into<String>,
        subscriber_id: Uuid,
        step_type: StepType,
        status: JobStatus,
        payload: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            environment_id,
            organization_id,
            template_id,
            transaction_id: transaction_id.into(),
            subscriber_id,
            step_type,
            status,
            payload,
            digest: None,
            merged_digest_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Digest metadata, if the job carries a `digest` object.
    pub fn digest_metadata(&self) -> Option<DigestMetadata> {
        self.digest.as_ref().and_then(DigestMetadata::from_value)
    }

    /// Look up a dot-separated path (`"post.id"`) inside the payload.
    pub fn payload_value(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.payload, path)
    }
}

/// Resolve a dot-separated path against a JSON value.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

/// Input of the digest coordinator: one digest step completing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestCommand {
    pub environment_id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub subscriber_id: Uuid,
    /// The digest job driving this invocation.
    pub job_id: Uuid,
    /// Links all sibling jobs of one workflow run.
    pub transaction_id: String,
}

/// What an execution detail reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionDetailKind {
    DigestedEventsProvided,
    DigestTriggeredEvents,
}

impl std::fmt::Display for ExecutionDetailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionDetailKind::DigestedEventsProvided => write!(f, "digested_events_provided"),
            ExecutionDetailKind::DigestTriggeredEvents => write!(f, "digest_triggered_events"),
        }
    }
}

/// Origin of an execution detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionSource {
    Internal,
    Webhook,
    Credentials,
    Payload,
}

/// Outcome reported by an execution detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Pending,
    Queued,
    ReadConfirmation,
    Warning,
}

/// Append-only audit fact about a step execution.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExecutionDetail {
    pub id: Uuid,
    pub job_id: Uuid,
    pub environment_id: Uuid,
    pub organization_id: Uuid,
    pub subscriber_id: Uuid,
    pub transaction_id: String,
    pub step_type: StepType,
    pub detail: ExecutionDetailKind,
    pub source: ExecutionSource,
    pub status: ExecutionStatus,
    pub is_test: bool,
    pub is_retry: bool,
    /// Serialized snapshot attached to the fact.
    pub raw: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionDetail {
    /// Build a successful, internal, non-test detail carrying the job's identity.
    pub fn from_job(job: &Job, detail: ExecutionDetailKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            environment_id: job.environment_id,
            organization_id: job.organization_id,
            subscriber_id: job.subscriber_id,
            transaction_id: job.transaction_id.clone(),
            step_type: job.step_type,
            detail,
            source: ExecutionSource::Internal,
            status: ExecutionStatus::Success,
            is_test: false,
            is_retry: false,
            raw: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_raw(mut self, raw: String) -> Self {
        self.raw = Some(raw);
        self
    }
}
