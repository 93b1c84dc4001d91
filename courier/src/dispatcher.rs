use std::{sync::Arc, time::Duration};

use crate::{metrics, storage::QueueStore, Job, JobId, JobParameter, QueueError, UtcDateTime};

/// Enqueues jobs into a [`QueueStore`]. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Persist `message` as a pending job. Returns once the store has
    /// accepted it.
    pub async fn enqueue(&self, message: impl JobParameter) -> Result<JobId, QueueError> {
        self.enqueue_at(message, chrono::Utc::now()).await
    }

    pub async fn enqueue_delayed(
        &self,
        message: impl JobParameter,
        delay: Duration,
    ) -> Result<JobId, QueueError> {
        self.enqueue_at(message, crate::after(chrono::Utc::now(), delay))
            .await
    }

    /// Enqueue for execution no earlier than `time`. A time in the past
    /// runs as soon as a worker is free.
    pub async fn enqueue_at<M: JobParameter>(
        &self,
        message: M,
        time: UtcDateTime,
    ) -> Result<JobId, QueueError> {
        let job = Job::new(M::JOB_TYPE, message.to_payload(), time);
        let id = job.id.clone();

        self.store.push(&job).await?;

        metrics::COUNTER
            .jobs_enqueued
            .with_label_values(&[M::JOB_TYPE])
            .inc();
        tracing::debug!(job_id = %id, job_type = M::JOB_TYPE, available_at = %time, "enqueued job");

        Ok(id)
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }
}
