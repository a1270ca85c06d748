use thiserror::Error;

/// Common error types used across the application.
///
/// Every external collaborator of the digest engine (job store, audit log,
/// feature flags, digest strategies) reports failures through this type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same operation later could succeed.
    ///
    /// Used by callers that own retry policy; the engine itself never retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(sqlx::Error::PoolTimedOut)
                | AppError::Database(sqlx::Error::Io(_))
                | AppError::Redis(_)
        )
    }
}
