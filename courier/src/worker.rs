use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::sync::watch;
use typed_builder::TypedBuilder;

use crate::{
    metrics, storage::QueueStore, JobError, JobId, JobRegistry, JobStatus, QueueError, RetryPolicy,
};

#[derive(Clone, Debug, TypedBuilder)]
pub struct WorkerConfig {
    /// First wait after finding the queue empty.
    #[builder(default = Duration::from_millis(500))]
    pub poll_interval: Duration,
    /// Idle waits double up to this.
    #[builder(default = Duration::from_secs(5))]
    pub max_idle_backoff: Duration,
    /// How long a claimed job stays reserved before another worker may take it.
    #[builder(default = Duration::from_secs(5 * 60))]
    pub lease: Duration,
    #[builder(default)]
    pub retry: RetryPolicy,
    #[builder(default = Duration::from_secs(60 * 60))]
    pub keep_succeeded_for: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// What a worker did with the job it claimed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Processed {
    pub id: JobId,
    pub job_type: String,
    /// `Succeeded`, `Pending` (will be retried) or `Failed` (dead-lettered).
    pub status: JobStatus,
}

/// Claims jobs from a store and runs them through a [`JobRegistry`].
pub struct Worker<C> {
    name: String,
    ctx: Arc<C>,
    registry: Arc<JobRegistry<C>>,
    store: Arc<dyn QueueStore>,
    config: WorkerConfig,
}

impl<C> Worker<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        ctx: Arc<C>,
        registry: Arc<JobRegistry<C>>,
        store: Arc<dyn QueueStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            ctx,
            registry,
            store,
            config,
        }
    }

    /// Claim and execute at most one job. `None` when nothing was due.
    ///
    /// Errors only come from the store; a failing or panicking job is
    /// recorded against the job and reported through [`Processed::status`].
    pub async fn process_next(&self) -> Result<Option<Processed>, QueueError> {
        let Some(job) = self.store.claim(self.config.lease).await? else {
            return Ok(None);
        };

        tracing::debug!(
            worker = %self.name,
            job_id = %job.id,
            job_type = %job.payload_type,
            attempts = job.attempts,
            "running job"
        );

        let result = AssertUnwindSafe(self.registry.dispatch(
            &self.ctx,
            &job.payload_type,
            &job.payload,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(JobError::Panicked(panic_message(panic))));

        let status = match result {
            Ok(()) => {
                self.store
                    .ack(&job.id, job.attempts, self.config.keep_succeeded_for)
                    .await?;
                tracing::info!(worker = %self.name, job_id = %job.id, job_type = %job.payload_type, "job succeeded");

                JobStatus::Succeeded
            }
            Err(err) => {
                let policy = if err.is_permanent() {
                    RetryPolicy::never()
                } else {
                    self.config.retry
                };
                let status = self
                    .store
                    .fail(&job.id, job.attempts, &err.to_string(), &policy)
                    .await?;
                tracing::warn!(
                    worker = %self.name,
                    job_id = %job.id,
                    job_type = %job.payload_type,
                    attempts = job.attempts,
                    next = %status,
                    "job failed: {}",
                    err
                );

                status
            }
        };

        metrics::COUNTER
            .jobs_processed
            .with_label_values(&[job.payload_type.as_str(), outcome_label(status)])
            .inc();

        Ok(Some(Processed {
            id: job.id,
            job_type: job.payload_type,
            status,
        }))
    }

    /// Process jobs until `shutdown` turns `true` or its sender goes away.
    /// A job that has started always runs to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = %self.name, "worker started");
        let mut idle = self.config.poll_interval;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.process_next().await {
                Ok(Some(_)) => {
                    idle = self.config.poll_interval;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker = %self.name, "unable to process job: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(idle) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            idle = (idle * 2).min(self.config.max_idle_backoff);
        }

        tracing::info!(worker = %self.name, "worker stopped");
    }
}

fn outcome_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Succeeded => "succeeded",
        JobStatus::Failed => "dead_lettered",
        JobStatus::Pending | JobStatus::InProgress => "retried",
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}
