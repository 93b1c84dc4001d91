use std::time::Duration;

use crate::{Job, JobId, JobStatus, QueueError, RetryPolicy};


#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

pub mod memory;

/// Durable holding area for jobs.
///
/// `claim`, `ack` and `fail` must be atomic with respect to each other across
/// every worker sharing the store: a job is handed to at most one worker per
/// lease.
#[async_trait::async_trait]
pub trait QueueStore: Sync + Send {
    /// Persist a new pending job.
    async fn push(&self, job: &Job) -> Result<(), QueueError>;

    /// Reserve the oldest claimable job for `lease`, incrementing its
    /// attempts. `None` when nothing is due.
    async fn claim(&self, lease: Duration) -> Result<Option<Job>, QueueError>;

    /// Mark a claimed job as succeeded and keep it around for `keep_for`.
    ///
    /// `attempt` is the `attempts` value of the job handed out by `claim`.
    /// Once the job has been claimed again the old attempt no longer
    /// matches and the call fails with [`QueueError::NotClaimed`].
    async fn ack(&self, id: &JobId, attempt: u32, keep_for: Duration) -> Result<(), QueueError>;

    /// Record a failed execution. The job goes back to pending after its
    /// backoff, or is dead-lettered once `policy` is exhausted. `attempt`
    /// is checked the same way as for `ack`.
    async fn fail(
        &self,
        id: &JobId,
        attempt: u32,
        reason: &str,
        policy: &RetryPolicy,
    ) -> Result<JobStatus, QueueError>;

    async fn get(&self, id: &JobId) -> Result<Option<Job>, QueueError>;

    /// Pending and in-progress jobs.
    async fn len(&self) -> Result<usize, QueueError>;

    /// Dead-lettered jobs, oldest first.
    async fn dead_letters(&self) -> Result<Vec<Job>, QueueError>;

    /// Drop succeeded jobs past their retention. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, QueueError>;
}
