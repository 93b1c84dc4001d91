#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use courier::{
    field, storage::memory::MemoryStore, BackgroundJob, Backoff, Dispatcher, JobParameter,
    JobRegistry, Payload, PayloadError, QueueStore, RetryPolicy, Worker, WorkerConfig,
};

#[derive(Default)]
pub struct AppContext {
    pub invocations: Mutex<Vec<TestCommand>>,
}

impl AppContext {
    pub fn count(&self, name: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|cmd| cmd.name == name)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    /// Fail until the n-th execution.
    SucceedOnAttempt(usize),
    AlwaysFail,
    Panic,
}

#[derive(Debug, Clone)]
pub struct TestCommand {
    pub name: String,
    pub outcome: Outcome,
}

impl TestCommand {
    pub fn new(name: &str, outcome: Outcome) -> Self {
        Self {
            name: name.to_string(),
            outcome,
        }
    }
}

impl JobParameter for TestCommand {
    const JOB_TYPE: &'static str = "test_command";

    fn to_payload(&self) -> Payload {
        let outcome = match self.outcome {
            Outcome::Success => "success".to_string(),
            Outcome::SucceedOnAttempt(n) => format!("succeed_on:{}", n),
            Outcome::AlwaysFail => "fail".to_string(),
            Outcome::Panic => "panic".to_string(),
        };

        Payload::from([
            ("name".to_string(), self.name.clone()),
            ("outcome".to_string(), outcome),
        ])
    }

    fn from_payload(payload: &Payload) -> Result<Self, PayloadError> {
        let outcome = field(payload, "outcome")?;
        let outcome = match outcome.split_once(':') {
            Some(("succeed_on", n)) => Outcome::SucceedOnAttempt(n.parse().unwrap_or(1)),
            _ if outcome == "fail" => Outcome::AlwaysFail,
            _ if outcome == "panic" => Outcome::Panic,
            _ => Outcome::Success,
        };

        Ok(Self {
            name: field(payload, "name")?,
            outcome,
        })
    }
}

#[async_trait::async_trait]
impl BackgroundJob<AppContext> for TestCommand {
    async fn execute(&self, ctx: &AppContext) -> anyhow::Result<()> {
        ctx.invocations.lock().unwrap().push(self.clone());
        let runs = ctx.count(&self.name);

        match self.outcome {
            Outcome::Success => Ok(()),
            Outcome::SucceedOnAttempt(n) if runs >= n => Ok(()),
            Outcome::SucceedOnAttempt(_) | Outcome::AlwaysFail => {
                Err(anyhow::anyhow!("Failed, to test retry..."))
            }
            Outcome::Panic => panic!("exploding job {}", self.name),
        }
    }
}

/// Known to the dispatcher but never registered with a worker.
pub struct Unregistered;

impl JobParameter for Unregistered {
    const JOB_TYPE: &'static str = "unregistered";

    fn to_payload(&self) -> Payload {
        Payload::new()
    }

    fn from_payload(_: &Payload) -> Result<Self, PayloadError> {
        Ok(Self)
    }
}

pub fn retry_immediately(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff: Backoff::Constant(Duration::ZERO),
    }
}

pub fn worker_config(max_retries: u32) -> WorkerConfig {
    WorkerConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .max_idle_backoff(Duration::from_millis(50))
        .retry(retry_immediately(max_retries))
        .build()
}

pub struct Harness {
    pub ctx: Arc<AppContext>,
    pub store: Arc<dyn QueueStore>,
    pub dispatcher: Dispatcher,
    pub worker: Worker<AppContext>,
}

pub fn harness(max_retries: u32) -> Harness {
    let ctx = Arc::new(AppContext::default());
    let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
    let registry = Arc::new(JobRegistry::new().register::<TestCommand>());
    let worker = Worker::new(
        "test",
        ctx.clone(),
        registry,
        store.clone(),
        worker_config(max_retries),
    );

    Harness {
        ctx,
        dispatcher: Dispatcher::new(store.clone()),
        store,
        worker,
    }
}
