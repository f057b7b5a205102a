use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all librarian metrics
const PREFIX: &str = "pezzottify_librarian";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Task Metrics
    pub static ref TASKS_PROCESSED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_tasks_processed_total"), "Tasks taken off the queue"),
        &["kind", "outcome"]
    ).expect("Failed to create tasks_processed_total metric");

    pub static ref TASK_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_task_duration_seconds"),
            "Task handler duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["kind"]
    ).expect("Failed to create task_duration_seconds metric");

    // Cron Metrics
    pub static ref CRON_CYCLES_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_cron_cycles_total"),
        "Nightly maintenance batches fired"
    ).expect("Failed to create cron_cycles_total metric");

    pub static ref CRON_TASKS_ENQUEUED_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_cron_tasks_enqueued_total"),
        "Tasks enqueued by the cron scheduler"
    ).expect("Failed to create cron_tasks_enqueued_total metric");

    // Search Index Metrics
    pub static ref SEARCH_INDEX_STALE_REMOVED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_search_index_stale_removed_total"),
        "Stale documents removed from the search index"
    ).expect("Failed to create search_index_stale_removed_total metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(TASKS_PROCESSED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASK_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CRON_CYCLES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CRON_TASKS_ENQUEUED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SEARCH_INDEX_STALE_REMOVED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record a finished task handler
pub fn record_task(kind: &str, outcome: &str, duration: Duration) {
    TASKS_PROCESSED_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();

    TASK_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

pub fn record_cron_cycle(enqueued: u64) {
    CRON_CYCLES_TOTAL.inc();
    CRON_TASKS_ENQUEUED_TOTAL.inc_by(enqueued);
}

pub fn record_stale_removed(count: u64) {
    SEARCH_INDEX_STALE_REMOVED_TOTAL.inc_by(count as f64);
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS is reported in kB
                    if let Some(kb) = line
                        .split_whitespace()
                        .nth(1)
                        .and_then(|kb| kb.parse::<f64>().ok())
                    {
                        PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                        return;
                    }
                }
            }
        }
    }
}

/// Encode every registered metric in the Prometheus text format.
pub fn gather_metrics() -> Result<String> {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
