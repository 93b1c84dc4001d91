use crate::JobId;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The backing store could not be reached or rejected the operation.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("job {0} not found")]
    NotFound(JobId),
    /// `ack`/`fail` on a job that is not held under a lease.
    #[error("job {0} is not claimed")]
    NotClaimed(JobId),
    #[error("unable to encode or decode job: {0}")]
    Codec(String),
}

impl From<rmp_serde::encode::Error> for QueueError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for QueueError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("missing payload field `{0}`")]
    MissingField(String),
}

/// Why a job execution did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("no handler registered for job type `{0}`")]
    UnknownType(String),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("{0:#}")]
    Failed(anyhow::Error),
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Retrying will not change the outcome.
    pub fn is_permanent(&self) -> bool {
        matches!(self, JobError::UnknownType(_) | JobError::Payload(_))
    }
}
