#[macro_use]
extern crate rocket;

use std::sync::Arc;

use courier::{BackgroundJobServer, Dispatcher, JobServerBuilder};
use rocket::{figment::Figment, Build, Rocket};

use crate::{
    config::ContactConfig,
    jobs::{JobContext, SendContactEmail},
    validate::{ContactRules, Validator},
};

pub mod config;
pub mod jobs;
pub mod mail;
pub mod routes;
pub mod telemetry;
pub mod validate;

pub struct AppState {
    pub jobs: Dispatcher,
    pub validator: Arc<dyn Validator>,
}

/// The web application, enqueueing through `jobs`.
pub fn build(figment: Figment, jobs: Dispatcher) -> Rocket<Build> {
    rocket::custom(figment)
        .mount(
            "/",
            routes![routes::show_form, routes::send_message, routes::metrics],
        )
        .manage(AppState {
            jobs,
            validator: Arc::new(ContactRules),
        })
}

/// Connect to the configured queue store and start `workers` worker tasks
/// that run [`SendContactEmail`] jobs.
pub async fn start_jobs(config: &ContactConfig, workers: usize) -> anyhow::Result<BackgroundJobServer> {
    let store = config.queue.connect().await?;
    let ctx = JobContext {
        mailer: mail::from_config(&config.mail)?,
        admin_address: config.admin_address.clone(),
    };

    JobServerBuilder::new(
        courier::Config::builder()
            .name(config.queue.name.clone())
            .context(ctx)
            .store(store)
            .workers(workers)
            .worker(config.worker_config())
            .build(),
    )
    .with_job::<SendContactEmail>()
    .start()
    .await
}
