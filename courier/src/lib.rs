//! Background jobs for Rust: a dispatcher that persists jobs to a queue store,
//! and workers that claim and execute them with retries.
//!
//! ```ignore
//! let server = JobServerBuilder::new(
//!     courier::Config::builder()
//!         .name("contact")
//!         .context(ctx)
//!         .store(Arc::new(MemoryStore::new()))
//!         .build(),
//! )
//! .with_job::<SendContactEmail>()
//! .start()
//! .await?;
//!
//! let id = server.enqueue(job).await?;
//! ```
use std::fmt::Display;

pub use crate::bg_job_server::{BackgroundJobServer, Config, JobServerBuilder};
pub use crate::core::{field, BackgroundJob, JobParameter, JobRegistry};
pub use crate::dispatcher::Dispatcher;
pub use crate::error::{JobError, PayloadError, QueueError};
pub use crate::models::{Backoff, Job, JobStatus, RetryDecision, RetryPolicy};
pub use crate::storage::QueueStore;
pub use crate::worker::{Processed, Worker, WorkerConfig};
pub use anyhow;

mod bg_job_server;
pub mod core;
mod dispatcher;
mod encoder;
mod error;
pub mod metrics;
mod models;
pub mod storage;
mod worker;

pub type UtcDateTime = chrono::DateTime<chrono::Utc>;

/// Job payload: flat string fields, ordered by key.
pub type Payload = std::collections::BTreeMap<String, String>;

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

pub fn generate_id() -> String {
    rusty_ulid::generate_ulid_string()
}

pub(crate) fn after(time: UtcDateTime, delay: std::time::Duration) -> UtcDateTime {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| time.checked_add_signed(delay))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}
