use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all chat stats metrics
const PREFIX: &str = "chatstats";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref BATCH_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_batch_job_executions_total"), "Total batch job executions"),
        &["job", "status"]
    ).expect("Failed to create batch_job_executions_total metric");

    pub static ref BATCH_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_batch_job_duration_seconds"),
            "Batch job duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        &["job"]
    ).expect("Failed to create batch_job_duration_seconds metric");

    pub static ref BATCH_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_batch_job_running"), "Whether a batch job is currently running"),
        &["job"]
    ).expect("Failed to create batch_job_running metric");

    pub static ref BATCH_JOB_RECORDS_PROCESSED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            format!("{PREFIX}_batch_job_records_processed_total"),
            "Records processed by batch jobs"
        ),
        &["job"]
    ).expect("Failed to create batch_job_records_processed_total metric");
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(BATCH_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BATCH_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BATCH_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(BATCH_JOB_RECORDS_PROCESSED_TOTAL.clone()));
}

/// Record a finished batch job run. `status` is "success", "failed" or "panic".
pub fn record_batch_job_execution(job: &str, status: &str, duration: Duration) {
    BATCH_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job, status])
        .inc();

    BATCH_JOB_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration.as_secs_f64());
}

pub fn record_records_processed(job: &str, count: usize) {
    BATCH_JOB_RECORDS_PROCESSED_TOTAL
        .with_label_values(&[job])
        .inc_by(count as u64);
}

pub fn set_batch_job_running(job: &str, running: bool) {
    BATCH_JOB_RUNNING
        .with_label_values(&[job])
        .set(if running { 1.0 } else { 0.0 });
}

/// Text exposition of every registered metric.
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
