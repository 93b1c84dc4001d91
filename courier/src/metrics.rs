use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    pub(crate) static ref COUNTER: Metrics = Metrics::new();
}

pub(crate) struct Metrics {
    /// Labelled by job type.
    pub jobs_enqueued: IntCounterVec,
    /// Labelled by job type and outcome (`succeeded`, `retried`, `dead_lettered`).
    pub jobs_processed: IntCounterVec,
}

impl Metrics {
    fn new() -> Self {
        let enqueued = register_int_counter_vec!(
            "courier_jobs_enqueued_total",
            "total jobs enqueued",
            &["type"]
        )
        .expect("register courier_jobs_enqueued_total");
        let processed = register_int_counter_vec!(
            "courier_jobs_processed_total",
            "total jobs processed by workers",
            &["type", "outcome"]
        )
        .expect("register courier_jobs_processed_total");

        Metrics {
            jobs_enqueued: enqueued,
            jobs_processed: processed,
        }
    }
}

/// Everything registered with the default prometheus registry, in the text
/// exposition format.
pub fn output() -> anyhow::Result<String> {
    // touch the counters so they show up before the first job
    lazy_static::initialize(&COUNTER);

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_includes_job_counters() {
        COUNTER
            .jobs_enqueued
            .with_label_values(&["metrics_test"])
            .inc();

        let text = output().expect("encode metrics");

        assert!(text.contains("courier_jobs_enqueued_total{type=\"metrics_test\"}"));
    }
}
