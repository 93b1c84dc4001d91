use std::{sync::Arc, time::Duration};

use courier::{
    storage::{memory::MemoryStore, postgres::Postgres, redis::Redis},
    Backoff, QueueStore, RetryPolicy, WorkerConfig,
};
use rocket::figment::Figment;
use serde::Deserialize;

/// The `contact` table of `Rocket.toml`, overridable with `ROCKET_CONTACT`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Recipient of every contact message.
    pub admin_address: String,
    pub mail: MailConfig,
    pub queue: QueueConfig,
    /// Worker tasks started by the web binary.
    pub workers: usize,
    pub max_retries: u32,
    /// First retry delay; doubles on every further failure.
    pub backoff_secs: u64,
    pub lease_secs: u64,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            admin_address: "admin@example.com".to_string(),
            mail: MailConfig::default(),
            queue: QueueConfig::default(),
            workers: 2,
            max_retries: 3,
            backoff_secs: 10,
            lease_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailDriver {
    /// Write messages to the log.
    Log,
    /// Keep messages in memory.
    Array,
    /// Deliver through the relay in `smtp`.
    Smtp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub driver: MailDriver,
    pub from_address: String,
    pub from_name: String,
    pub smtp: SmtpConfig,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            driver: MailDriver::Log,
            from_address: "hello@example.com".to_string(),
            from_name: "Example".to_string(),
            smtp: SmtpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Upgrade the connection with STARTTLS.
    pub tls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            username: None,
            password: None,
            tls: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Redis,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub store: StoreKind,
    pub url: Option<String>,
    /// Queue name; keeps several applications apart in one redis or database.
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            url: None,
            name: "default".to_string(),
        }
    }
}

impl QueueConfig {
    pub async fn connect(&self) -> anyhow::Result<Arc<dyn QueueStore>> {
        let store: Arc<dyn QueueStore> = match self.store {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::Redis => Arc::new(Redis::new(self.url()?, &self.name).await?),
            StoreKind::Postgres => Arc::new(Postgres::new(self.url()?, &self.name).await?),
        };

        tracing::info!(store = ?self.store, queue = %self.name, "connected to queue store");
        Ok(store)
    }

    fn url(&self) -> anyhow::Result<&str> {
        self.url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("queue store {:?} needs a `url`", self.store))
    }
}

impl ContactConfig {
    pub fn from_figment(figment: &Figment) -> anyhow::Result<Self> {
        figment
            .focus("contact")
            .extract()
            .map_err(|e| anyhow::anyhow!("invalid contact configuration: {}", e))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Backoff::Exponential {
                initial: Duration::from_secs(self.backoff_secs),
                multiplier: 2.0,
                max: Duration::from_secs(600),
            },
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::builder()
            .lease(Duration::from_secs(self.lease_secs))
            .retry(self.retry_policy())
            .build()
    }
}
