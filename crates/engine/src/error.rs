use thiserror::Error;
use uuid::Uuid;

use courier_common::error::AppError;

/// Failure of a digest coordination.
#[derive(Debug, Error)]
pub enum DigestError {
    /// The job driving the digest does not exist in the command's environment.
    #[error("Digest job {job_id} is not found in environment {environment_id}")]
    JobNotFound { job_id: Uuid, environment_id: Uuid },

    /// A job store, audit log, flag resolver or strategy failure, unchanged.
    #[error(transparent)]
    Collaborator(#[from] AppError),
}
