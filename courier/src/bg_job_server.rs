use std::{ops::Deref, sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};
use typed_builder::TypedBuilder;

use crate::{
    storage::QueueStore, BackgroundJob, Dispatcher, JobRegistry, Worker, WorkerConfig,
};

#[derive(TypedBuilder)]
pub struct Config<C> {
    /// Used to name worker tasks in logs.
    #[builder(setter(into))]
    name: String,
    context: C,
    store: Arc<dyn QueueStore>,
    /// Number of worker tasks. Zero makes a dispatch-only server.
    #[builder(default = 4)]
    workers: usize,
    #[builder(default)]
    worker: WorkerConfig,
    /// How often succeeded jobs past their retention are purged.
    #[builder(default = Duration::from_secs(60))]
    maintenance_interval: Duration,
}

/// Collects the job types a server runs, then starts it.
pub struct JobServerBuilder<C> {
    config: Config<C>,
    registry: JobRegistry<C>,
}

impl<C> JobServerBuilder<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(config: Config<C>) -> Self {
        Self {
            config,
            registry: JobRegistry::new(),
        }
    }

    pub fn with_job<J>(mut self) -> Self
    where
        J: BackgroundJob<C> + 'static,
    {
        self.registry = self.registry.register::<J>();
        self
    }

    pub async fn start(self) -> anyhow::Result<BackgroundJobServer> {
        let Config {
            name,
            context,
            store,
            workers,
            worker,
            maintenance_interval,
        } = self.config;

        if workers > 0 && self.registry.is_empty() {
            anyhow::bail!("job server `{}` has workers but no registered jobs", name);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let context = Arc::new(context);
        let registry = Arc::new(self.registry);
        let mut tasks = Vec::with_capacity(workers + 1);

        for idx in 1..=workers {
            let worker = Worker::new(
                format!("{}#{}", name, idx),
                context.clone(),
                registry.clone(),
                store.clone(),
                worker.clone(),
            );
            let shutdown = shutdown_rx.clone();

            tasks.push(tokio::spawn(async move { worker.run(shutdown).await }));
        }

        tasks.push(tokio::spawn(run_maintenance(
            store.clone(),
            maintenance_interval,
            shutdown_rx,
        )));

        tracing::info!(
            server = %name,
            workers,
            jobs = ?registry.job_types().collect::<Vec<_>>(),
            "background job server started"
        );

        Ok(BackgroundJobServer {
            dispatcher: Dispatcher::new(store),
            shutdown: shutdown_tx,
            tasks,
        })
    }
}

/// A running pool of workers plus the dispatcher that feeds them.
///
/// `enqueue` and friends are available through `Deref<Target = Dispatcher>`.
pub struct BackgroundJobServer {
    dispatcher: Dispatcher,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl BackgroundJobServer {
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Ask workers to stop and wait for the jobs they are running to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::error!("background task ended abnormally: {}", e);
            }
        }

        tracing::info!("background job server stopped");
    }
}

impl Deref for BackgroundJobServer {
    type Target = Dispatcher;

    fn deref(&self) -> &Self::Target {
        &self.dispatcher
    }
}

async fn run_maintenance(
    store: Arc<dyn QueueStore>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match store.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "purged archived jobs"),
            Err(e) => tracing::error!("unable to purge archived jobs: {}", e),
        }
    }
}
