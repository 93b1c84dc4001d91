use contact::config::ContactConfig;

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    contact::telemetry::init();

    let figment = rocket::Config::figment();
    let config = ContactConfig::from_figment(&figment)?;
    let jobs = contact::start_jobs(&config, config.workers).await?;

    let launched = contact::build(figment, jobs.dispatcher().clone())
        .launch()
        .await
        .map_err(|e| anyhow::anyhow!("rocket failed: {}", e));

    jobs.shutdown().await;
    launched.map(|_| ())
}
