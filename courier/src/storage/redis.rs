use std::{collections::HashMap, time::Duration};

use lazy_static::lazy_static;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, Script};

use super::QueueStore;
use crate::{
    encoder, Job, JobId, JobStatus, QueueError, RetryDecision, RetryPolicy, UtcDateTime,
};

lazy_static! {
    // KEYS: pending, reserved  ARGV: now_ms, lease_until_ms, job key prefix
    static ref CLAIM: Script = Script::new(
        r#"
        local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
        for _, id in ipairs(expired) do
            redis.call('ZREM', KEYS[2], id)
            redis.call('ZADD', KEYS[1], ARGV[1], id)
            redis.call('HSET', ARGV[3] .. id, 'status', 'pending')
        end

        local ready = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
        if #ready == 0 then
            return false
        end

        local id = ready[1]
        redis.call('ZREM', KEYS[1], id)
        redis.call('ZADD', KEYS[2], ARGV[2], id)
        redis.call('HINCRBY', ARGV[3] .. id, 'attempts', 1)
        redis.call('HSET', ARGV[3] .. id, 'status', 'in_progress', 'reserved_until', ARGV[2])
        return id
        "#
    );

    // KEYS: reserved, job  ARGV: id, keep_for_ms, claimed attempt
    static ref ACK: Script = Script::new(
        r#"
        if redis.call('EXISTS', KEYS[2]) == 0 then
            return 'missing'
        end
        if redis.call('HGET', KEYS[2], 'attempts') ~= ARGV[3] then
            return 'not_claimed'
        end
        if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
            return 'not_claimed'
        end

        redis.call('HDEL', KEYS[2], 'reserved_until')
        redis.call('HSET', KEYS[2], 'status', 'succeeded')
        if tonumber(ARGV[2]) > 0 then
            redis.call('PEXPIRE', KEYS[2], ARGV[2])
        else
            redis.call('DEL', KEYS[2])
        end
        return 'ok'
        "#
    );

    // KEYS: pending, reserved, dead, job
    // ARGV: id, claimed attempt, next status, available_at_ms, reason, now_ms
    static ref FAIL: Script = Script::new(
        r#"
        if redis.call('EXISTS', KEYS[4]) == 0 then
            return 'missing'
        end
        if redis.call('ZSCORE', KEYS[2], ARGV[1]) == false then
            return 'not_claimed'
        end
        if redis.call('HGET', KEYS[4], 'attempts') ~= ARGV[2] then
            return 'not_claimed'
        end

        redis.call('ZREM', KEYS[2], ARGV[1])
        redis.call('HDEL', KEYS[4], 'reserved_until')
        redis.call('HSET', KEYS[4], 'status', ARGV[3], 'last_error', ARGV[5], 'available_at', ARGV[4])
        if ARGV[3] == 'failed' then
            redis.call('ZADD', KEYS[3], ARGV[6], ARGV[1])
        else
            redis.call('ZADD', KEYS[1], ARGV[4], ARGV[1])
        end
        return 'ok'
        "#
    );
}

/// Queue store backed by Redis.
///
/// Each job is a hash; `pending`, `reserved` and `dead` sorted sets index
/// them by due time, lease expiry and failure time.
#[derive(Clone)]
pub struct Redis {
    _client: Client,
    connection: MultiplexedConnection,
    namespace: String,
}

impl Redis {
    /// Connect to redis at `url` (eg. `"redis://127.0.0.1/"`) and keep all
    /// keys under `courier:{namespace}`.
    pub async fn new(url: &str, namespace: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            _client: client,
            connection,
            namespace: format!("courier:{}", namespace),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.namespace, name)
    }

    fn job_prefix(&self) -> String {
        format!("{}:job:", self.namespace)
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}{}", self.job_prefix(), id)
    }

    async fn load(&self, id: &JobId) -> Result<Option<Job>, QueueError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, Vec<u8>> = conn.hgetall(self.job_key(id)).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        job_from_fields(id, fields).map(Some)
    }

    async fn load_all(&self, ids: Vec<String>) -> Result<Vec<Job>, QueueError> {
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.load(&JobId::from(id)).await? {
                jobs.push(job);
            }
        }

        Ok(jobs)
    }
}

#[async_trait::async_trait]
impl QueueStore for Redis {
    async fn push(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        let payload = encoder::encode(&job.payload)?;
        let available_at = job.available_at.timestamp_millis();

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                self.job_key(&job.id),
                &[
                    ("payload_type", job.payload_type.as_bytes().to_vec()),
                    ("payload", payload),
                    ("status", job.status.as_str().as_bytes().to_vec()),
                    ("attempts", job.attempts.to_string().into_bytes()),
                    (
                        "enqueued_at",
                        job.enqueued_at.timestamp_millis().to_string().into_bytes(),
                    ),
                    ("available_at", available_at.to_string().into_bytes()),
                ],
            )
            .ignore()
            .zadd(self.key("pending"), job.id.as_str(), available_at)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn claim(&self, lease: Duration) -> Result<Option<Job>, QueueError> {
        let mut conn = self.connection.clone();
        let now = chrono::Utc::now();
        let lease_until = crate::after(now, lease);

        let claimed: Option<String> = CLAIM
            .key(self.key("pending"))
            .key(self.key("reserved"))
            .arg(now.timestamp_millis())
            .arg(lease_until.timestamp_millis())
            .arg(self.job_prefix())
            .invoke_async(&mut conn)
            .await?;

        match claimed {
            Some(id) => {
                let id = JobId::from(id);
                tracing::debug!(job_id = %id, "claimed job from redis");
                self.load(&id).await
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, id: &JobId, attempt: u32, keep_for: Duration) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        let outcome: String = ACK
            .key(self.key("reserved"))
            .key(self.job_key(id))
            .arg(id.as_str())
            .arg(retention_ms(keep_for))
            .arg(attempt)
            .invoke_async(&mut conn)
            .await?;

        script_outcome(id, &outcome)
    }

    async fn fail(
        &self,
        id: &JobId,
        attempt: u32,
        reason: &str,
        policy: &RetryPolicy,
    ) -> Result<JobStatus, QueueError> {
        let mut conn = self.connection.clone();
        let now = chrono::Utc::now();

        let (status, available_at) = match policy.decide(attempt, now) {
            RetryDecision::Retry { available_at } => (JobStatus::Pending, available_at),
            RetryDecision::DeadLetter => (JobStatus::Failed, now),
        };

        let outcome: String = FAIL
            .key(self.key("pending"))
            .key(self.key("reserved"))
            .key(self.key("dead"))
            .key(self.job_key(id))
            .arg(id.as_str())
            .arg(attempt)
            .arg(status.as_str())
            .arg(available_at.timestamp_millis())
            .arg(reason)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        script_outcome(id, &outcome).map(|_| status)
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, QueueError> {
        self.load(id).await
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection.clone();
        let (pending, reserved): (usize, usize) = redis::pipe()
            .zcard(self.key("pending"))
            .zcard(self.key("reserved"))
            .query_async(&mut conn)
            .await?;

        Ok(pending + reserved)
    }

    async fn dead_letters(&self) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrange(self.key("dead"), 0, -1).await?;

        self.load_all(ids).await
    }

    async fn purge_expired(&self) -> Result<usize, QueueError> {
        // archived hashes carry a TTL, redis drops them on its own
        Ok(0)
    }
}

fn script_outcome(id: &JobId, outcome: &str) -> Result<(), QueueError> {
    match outcome {
        "ok" => Ok(()),
        "missing" => Err(QueueError::NotFound(id.clone())),
        "not_claimed" => Err(QueueError::NotClaimed(id.clone())),
        other => Err(QueueError::Unavailable(format!(
            "unexpected script result `{}`",
            other
        ))),
    }
}

fn job_from_fields(id: &JobId, mut fields: HashMap<String, Vec<u8>>) -> Result<Job, QueueError> {
    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| QueueError::Codec(format!("job {} is missing `{}`", id, name)))
    };

    let payload_type = text(take("payload_type")?)?;
    let payload = encoder::decode(&take("payload")?)?;
    let status = text(take("status")?)?.parse::<JobStatus>()?;
    let attempts = text(take("attempts")?)?
        .parse::<u32>()
        .map_err(|e| QueueError::Codec(e.to_string()))?;
    let enqueued_at = millis(take("enqueued_at")?)?;
    let available_at = millis(take("available_at")?)?;
    let reserved_until = take("reserved_until").ok().map(millis).transpose()?;
    let last_error = take("last_error").ok().map(text).transpose()?;

    Ok(Job {
        id: id.clone(),
        payload_type,
        payload,
        attempts,
        status,
        enqueued_at,
        available_at,
        reserved_until,
        last_error,
    })
}

fn text(bytes: Vec<u8>) -> Result<String, QueueError> {
    String::from_utf8(bytes).map_err(|e| QueueError::Codec(e.to_string()))
}

fn millis(bytes: Vec<u8>) -> Result<UtcDateTime, QueueError> {
    let ms = text(bytes)?
        .parse::<i64>()
        .map_err(|e| QueueError::Codec(e.to_string()))?;

    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::Codec(format!("timestamp out of range: {}", ms)))
}

fn retention_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
