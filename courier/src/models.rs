use std::{fmt::Display, str::FromStr, time::Duration};

use crate::{JobId, Payload, UtcDateTime};

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,

    pub payload_type: String,
    pub payload: Payload,

    /// Number of times the job has been claimed for execution.
    pub attempts: u32,
    pub status: JobStatus,

    pub enqueued_at: UtcDateTime,
    /// Not claimable before this time.
    pub available_at: UtcDateTime,
    /// Lease expiry while `InProgress`.
    pub reserved_until: Option<UtcDateTime>,
    pub last_error: Option<String>,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded,
    /// Dead-lettered after exhausting retries, or on a permanent error.
    Failed,
}

impl Job {
    pub(crate) fn new(payload_type: &str, payload: Payload, available_at: UtcDateTime) -> Self {
        Self {
            id: JobId(crate::generate_id()),
            payload_type: payload_type.to_string(),
            payload,
            attempts: 0,
            status: JobStatus::Pending,
            enqueued_at: chrono::Utc::now(),
            available_at,
            reserved_until: None,
            last_error: None,
        }
    }

    /// Whether a worker may claim this job at `now`: pending and due, or
    /// in progress under a lease that has run out.
    pub fn is_claimable(&self, now: UtcDateTime) -> bool {
        match self.status {
            JobStatus::Pending => self.available_at <= now,
            JobStatus::InProgress => self.reserved_until.map_or(true, |until| until <= now),
            JobStatus::Succeeded | JobStatus::Failed => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = crate::QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(crate::QueueError::Codec(format!("unknown job status `{}`", other))),
        }
    }
}

/// Delay before a failed job becomes claimable again.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Constant(Duration),
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay after the `attempts`-th failed execution (1-based).
    pub fn delay(&self, attempts: u32) -> Duration {
        match self {
            Backoff::Constant(delay) => *delay,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exp = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exp);

                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// A job that has been attempted this many times is dead-lettered on failure.
    pub max_retries: u32,
    pub backoff: Backoff,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { available_at: UtcDateTime },
    DeadLetter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Exponential {
                initial: Duration::from_secs(10),
                multiplier: 2.0,
                max: Duration::from_secs(600),
            },
        }
    }
}

impl RetryPolicy {
    /// Dead-letter on the first failure.
    pub fn never() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::Constant(Duration::ZERO),
        }
    }

    pub fn decide(&self, attempts: u32, now: UtcDateTime) -> RetryDecision {
        if attempts >= self.max_retries {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Retry {
                available_at: crate::after(now, self.backoff.delay(attempts)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1, 10 ; "first retry uses the initial delay")]
    #[test_case(2, 20 ; "second retry doubles")]
    #[test_case(4, 80 ; "fourth retry")]
    #[test_case(10, 600 ; "capped at max")]
    #[test_case(u32::MAX, 600 ; "huge attempt count stays capped")]
    fn exponential_backoff(attempts: u32, expected_secs: u64) {
        let backoff = RetryPolicy::default().backoff;

        assert_eq!(Duration::from_secs(expected_secs), backoff.delay(attempts));
    }

    #[test]
    fn constant_backoff_ignores_attempts() {
        let backoff = Backoff::Constant(Duration::from_millis(250));

        assert_eq!(Duration::from_millis(250), backoff.delay(1));
        assert_eq!(Duration::from_millis(250), backoff.delay(7));
    }

    #[test]
    fn decide_retries_until_max() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Backoff::Constant(Duration::from_secs(5)),
        };
        let now = chrono::Utc::now();

        assert_eq!(
            RetryDecision::Retry {
                available_at: now + chrono::Duration::seconds(5)
            },
            policy.decide(2, now)
        );
        assert_eq!(RetryDecision::DeadLetter, policy.decide(3, now));
    }

    #[test]
    fn never_dead_letters_immediately() {
        assert_eq!(
            RetryDecision::DeadLetter,
            RetryPolicy::never().decide(1, chrono::Utc::now())
        );
    }

    #[test]
    fn expired_lease_is_claimable() {
        let now = chrono::Utc::now();
        let mut job = Job::new("test", Payload::new(), now);
        job.status = JobStatus::InProgress;
        job.reserved_until = Some(now - chrono::Duration::seconds(1));
        assert!(job.is_claimable(now));

        job.reserved_until = Some(now + chrono::Duration::seconds(30));
        assert!(!job.is_claimable(now));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            assert_eq!(status, status.as_str().parse::<JobStatus>().unwrap());
        }
        assert!("archived".parse::<JobStatus>().is_err());
    }

    #[test]
    fn job_fields_keep_their_rust_names() {
        #[derive(serde::Deserialize)]
        struct Fields {
            payload_type: String,
            enqueued_at: UtcDateTime,
            last_error: Option<String>,
        }

        let now = chrono::Utc::now();
        let job = Job::new("send_contact_email", Payload::new(), now);

        let bytes = rmp_serde::to_vec_named(&job).expect("encode");
        let fields: Fields = rmp_serde::from_slice(&bytes).expect("decode");

        assert_eq!("send_contact_email", fields.payload_type);
        assert_eq!(job.enqueued_at, fields.enqueued_at);
        assert_eq!(None, fields.last_error);
    }
}
