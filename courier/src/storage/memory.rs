use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use tokio::sync::Mutex;

use super::QueueStore;
use crate::{Job, JobId, JobStatus, QueueError, RetryDecision, RetryPolicy, UtcDateTime};

/// Process-local queue store. Jobs do not survive a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    /// Active (pending or in-progress) jobs by enqueue sequence.
    queue: BTreeMap<u64, JobId>,
    seq_of: HashMap<JobId, u64>,
    next_seq: u64,
    /// Succeeded jobs and when they may be purged.
    archived: HashMap<JobId, UtcDateTime>,
    dead: Vec<JobId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn claimed_mut(&mut self, id: &JobId, attempt: u32) -> Result<&mut Job, QueueError> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;

        if job.status != JobStatus::InProgress || job.attempts != attempt {
            return Err(QueueError::NotClaimed(id.clone()));
        }

        Ok(job)
    }

    fn dequeue(&mut self, id: &JobId) {
        if let Some(seq) = self.seq_of.remove(id) {
            self.queue.remove(&seq);
        }
    }
}

#[async_trait::async_trait]
impl QueueStore for MemoryStore {
    async fn push(&self, job: &Job) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        inner.queue.insert(seq, job.id.clone());
        inner.seq_of.insert(job.id.clone(), seq);
        inner.jobs.insert(job.id.clone(), job.clone());

        Ok(())
    }

    async fn claim(&self, lease: Duration) -> Result<Option<Job>, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = chrono::Utc::now();

        let Inner { jobs, queue, .. } = &mut *inner;
        let next = queue
            .values()
            .find(|id| jobs.get(*id).map_or(false, |job| job.is_claimable(now)))
            .cloned();

        let Some(job) = (match next {
            Some(id) => jobs.get_mut(&id),
            None => None,
        }) else {
            return Ok(None);
        };

        job.status = JobStatus::InProgress;
        job.attempts += 1;
        job.reserved_until = Some(crate::after(now, lease));

        Ok(Some(job.clone()))
    }

    async fn ack(&self, id: &JobId, attempt: u32, keep_for: Duration) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let job = inner.claimed_mut(id, attempt)?;
        job.status = JobStatus::Succeeded;
        job.reserved_until = None;

        inner.dequeue(id);
        if keep_for.is_zero() {
            inner.jobs.remove(id);
        } else {
            inner
                .archived
                .insert(id.clone(), crate::after(chrono::Utc::now(), keep_for));
        }

        Ok(())
    }

    async fn fail(
        &self,
        id: &JobId,
        attempt: u32,
        reason: &str,
        policy: &RetryPolicy,
    ) -> Result<JobStatus, QueueError> {
        let mut inner = self.inner.lock().await;
        let job = inner.claimed_mut(id, attempt)?;
        job.reserved_until = None;
        job.last_error = Some(reason.to_string());

        match policy.decide(job.attempts, chrono::Utc::now()) {
            RetryDecision::Retry { available_at } => {
                job.status = JobStatus::Pending;
                job.available_at = available_at;
            }
            RetryDecision::DeadLetter => {
                job.status = JobStatus::Failed;
                inner.dequeue(id);
                inner.dead.push(id.clone());
                return Ok(JobStatus::Failed);
            }
        }

        Ok(JobStatus::Pending)
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.inner.lock().await.jobs.get(id).cloned())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.inner.lock().await.queue.len())
    }

    async fn dead_letters(&self) -> Result<Vec<Job>, QueueError> {
        let inner = self.inner.lock().await;

        Ok(inner
            .dead
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect())
    }

    async fn purge_expired(&self) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = chrono::Utc::now();

        let expired: Vec<JobId> = inner
            .archived
            .iter()
            .filter(|(_, expire_at)| **expire_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            inner.archived.remove(id);
            inner.jobs.remove(id);
        }

        Ok(expired.len())
    }
}
