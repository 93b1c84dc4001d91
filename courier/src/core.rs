use std::{collections::HashMap, marker::PhantomData};

use async_trait::async_trait;

use crate::{JobError, Payload, PayloadError};

/// A message that can be used to enqueue a background job
pub trait JobParameter: Sized {
    /// Identifies the handler a stored job is routed to.
    const JOB_TYPE: &'static str;

    fn to_payload(&self) -> Payload;
    fn from_payload(payload: &Payload) -> Result<Self, PayloadError>;
}

/// The behavior of a job: run it against the worker's context.
#[async_trait]
pub trait BackgroundJob<C>: JobParameter + Send + Sync
where
    C: Send + Sync,
{
    async fn execute(&self, ctx: &C) -> anyhow::Result<()>;
}

/// Reads a required field out of a payload.
pub fn field(payload: &Payload, key: &str) -> Result<String, PayloadError> {
    payload
        .get(key)
        .cloned()
        .ok_or_else(|| PayloadError::MissingField(key.to_string()))
}

#[async_trait]
trait Handler<C>: Send + Sync {
    async fn call(&self, ctx: &C, payload: &Payload) -> Result<(), JobError>;
}

struct TypedHandler<J>(PhantomData<fn() -> J>);

#[async_trait]
impl<C, J> Handler<C> for TypedHandler<J>
where
    C: Send + Sync + 'static,
    J: BackgroundJob<C> + 'static,
{
    async fn call(&self, ctx: &C, payload: &Payload) -> Result<(), JobError> {
        let job = J::from_payload(payload)?;
        job.execute(ctx).await.map_err(JobError::Failed)
    }
}

/// Job types a worker knows how to run, keyed by [`JobParameter::JOB_TYPE`].
pub struct JobRegistry<C> {
    handlers: HashMap<&'static str, Box<dyn Handler<C>>>,
}

impl<C> Default for JobRegistry<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C> JobRegistry<C>
where
    C: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `J`. A later registration of the same job type wins.
    pub fn register<J>(mut self) -> Self
    where
        J: BackgroundJob<C> + 'static,
    {
        self.handlers
            .insert(J::JOB_TYPE, Box::new(TypedHandler::<J>(PhantomData)));
        self
    }

    pub fn contains(&self, payload_type: &str) -> bool {
        self.handlers.contains_key(payload_type)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn job_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    pub async fn dispatch(&self, ctx: &C, payload_type: &str, payload: &Payload) -> Result<(), JobError> {
        match self.handlers.get(payload_type) {
            Some(handler) => handler.call(ctx, payload).await,
            None => Err(JobError::UnknownType(payload_type.to_string())),
        }
    }
}
