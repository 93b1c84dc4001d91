//! Runs contact jobs from a shared redis or postgres queue, without the web
//! front end.
use contact::config::{ContactConfig, StoreKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    contact::telemetry::init();

    let config = ContactConfig::from_figment(&rocket::Config::figment())?;
    if config.queue.store == StoreKind::Memory {
        anyhow::bail!("the memory queue store cannot be shared with a separate worker process");
    }

    let jobs = contact::start_jobs(&config, config.workers.max(1)).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down, waiting for running jobs");
    jobs.shutdown().await;

    Ok(())
}
