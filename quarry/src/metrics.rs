//! Prometheus metrics instrumentation for quarry.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `quarry_jobs_enqueued_total` - Jobs accepted by a queue
//! - `quarry_jobs_completed_total` - Jobs that left a queue (success, failed, cancelled)
//! - `quarry_index_rebuild_failures_total` - Failed index rebuilds
//!
//! ## Gauges
//! - `quarry_queue_depth` - Pending jobs per queue
//! - `quarry_indexed_documents` - Documents in the live search snapshot
//!
//! ## Histograms
//! - `quarry_job_duration_seconds` - Attempt duration in seconds
//! - `quarry_index_rebuild_seconds` - Index rebuild duration in seconds
#![cfg(feature = "metrics")]

use prometheus::{
    exponential_buckets, CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec,
    IntCounter, Opts, Registry,
};
use std::sync::LazyLock;

/// Global Prometheus registry for quarry metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `queue`, `job_kind`.
pub static JOBS_ENQUEUED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("quarry_jobs_enqueued_total", "Total number of jobs enqueued");
    CounterVec::new(opts, &["queue", "job_kind"])
        .expect("quarry_jobs_enqueued_total metric creation failed")
});

/// Labels: `queue`, `job_kind`, `status`.
pub static JOBS_COMPLETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "quarry_jobs_completed_total",
        "Total number of jobs that left a queue",
    );
    CounterVec::new(opts, &["queue", "job_kind", "status"])
        .expect("quarry_jobs_completed_total metric creation failed")
});

pub static QUEUE_DEPTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("quarry_queue_depth", "Pending jobs per queue");
    GaugeVec::new(opts, &["queue"]).expect("quarry_queue_depth metric creation failed")
});

/// Labels: `queue`, `job_kind`, `status`.
pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 16).expect("bucket creation failed");
    let opts = HistogramOpts::new(
        "quarry_job_duration_seconds",
        "Job attempt duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["queue", "job_kind", "status"])
        .expect("quarry_job_duration_seconds metric creation failed")
});

pub static INDEX_REBUILD_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.0005, 2.0, 14).expect("bucket creation failed");
    let opts = HistogramOpts::new(
        "quarry_index_rebuild_seconds",
        "Search index rebuild duration in seconds",
    )
    .buckets(buckets);
    Histogram::with_opts(opts).expect("quarry_index_rebuild_seconds metric creation failed")
});

pub static INDEX_REBUILD_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "quarry_index_rebuild_failures_total",
        "Total number of failed index rebuilds",
    )
    .expect("quarry_index_rebuild_failures_total metric creation failed")
});

pub static INDEXED_DOCUMENTS: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new(
        "quarry_indexed_documents",
        "Documents in the live search snapshot",
    )
    .expect("quarry_indexed_documents metric creation failed")
});

/// Register all metrics with the global registry.
///
/// Idempotent: duplicate registrations are ignored.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_ENQUEUED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_COMPLETED_TOTAL.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
        Box::new(INDEX_REBUILD_SECONDS.clone()),
        Box::new(INDEX_REBUILD_FAILURES_TOTAL.clone()),
        Box::new(INDEXED_DOCUMENTS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_job_enqueued(queue: &str, job_kind: &str) {
    JOBS_ENQUEUED_TOTAL
        .with_label_values(&[queue, job_kind])
        .inc();
}

pub fn record_job_completed(queue: &str, job_kind: &str, status: &str) {
    JOBS_COMPLETED_TOTAL
        .with_label_values(&[queue, job_kind, status])
        .inc();
}

pub fn set_queue_depth(queue: &str, depth: f64) {
    QUEUE_DEPTH.with_label_values(&[queue]).set(depth);
}

pub fn observe_job_duration(queue: &str, job_kind: &str, status: &str, duration_secs: f64) {
    JOB_DURATION_SECONDS
        .with_label_values(&[queue, job_kind, status])
        .observe(duration_secs);
}

pub fn observe_index_rebuild(documents: f64, duration_secs: f64) {
    INDEX_REBUILD_SECONDS.observe(duration_secs);
    INDEXED_DOCUMENTS.set(documents);
}

pub fn record_index_rebuild_failed() {
    INDEX_REBUILD_FAILURES_TOTAL.inc();
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
