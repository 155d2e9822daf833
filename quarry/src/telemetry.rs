//! Tracing and telemetry instrumentation for quarry.
//!
//! This module provides helper functions for creating tracing spans and recording
//! metrics during job and index lifecycle events. All functions work both with
//! and without the `metrics` feature flag.
//!
//! # Example
//!
//! ```ignore
//! use quarry::telemetry::{job_enqueue_span, record_job_enqueued};
//!
//! let span = job_enqueue_span("text-extraction", "extract", JobPriority::NORMAL);
//! let _enter = span.enter();
//! record_job_enqueued("text-extraction", "extract");
//! ```

use std::time::{Duration, Instant};

use tracing::{info_span, Span};

use crate::job::{JobId, JobPriority};

/// Create a tracing span for job enqueue operations.
#[must_use]
pub fn job_enqueue_span(queue: impl AsRef<str>, kind: impl AsRef<str>, priority: JobPriority) -> Span {
    info_span!(
        "quarry.enqueue",
        queue = %queue.as_ref(),
        job_kind = %kind.as_ref(),
        priority = priority.0,
    )
}

/// Create a tracing span covering one execution attempt.
///
/// # Example
/// ```ignore
/// let span = job_dispatch_span("search-indexing", job_id, "index", 1);
/// handler.handle(&job, ctx).instrument(span).await;
/// ```
#[must_use]
pub fn job_dispatch_span(
    queue: impl AsRef<str>,
    job_id: JobId,
    kind: impl AsRef<str>,
    attempt: u32,
) -> Span {
    info_span!(
        "quarry.dispatch",
        queue = %queue.as_ref(),
        job_id = %job_id,
        job_kind = %kind.as_ref(),
        attempt = attempt,
    )
}

#[must_use]
pub fn index_rebuild_span(generation: u64) -> Span {
    info_span!("quarry.index.rebuild", generation = generation)
}

/// Record a job enqueue event.
///
/// Logs at debug level and bumps the Prometheus counter when the `metrics`
/// feature is enabled.
pub fn record_job_enqueued(queue: impl AsRef<str>, kind: impl AsRef<str>) {
    tracing::debug!(
        queue = %queue.as_ref(),
        job_kind = %kind.as_ref(),
        "job enqueued"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_enqueued(queue.as_ref(), kind.as_ref());
}

/// Record that a job left the queue for good.
///
/// `status` is one of `success`, `failed` or `cancelled`.
pub fn record_job_completed(queue: impl AsRef<str>, kind: impl AsRef<str>, status: impl AsRef<str>) {
    tracing::info!(
        queue = %queue.as_ref(),
        job_kind = %kind.as_ref(),
        status = %status.as_ref(),
        "job finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_completed(queue.as_ref(), kind.as_ref(), status.as_ref());
}

pub fn set_queue_depth(queue: impl AsRef<str>, depth: usize) {
    tracing::trace!(queue = %queue.as_ref(), depth = depth, "queue depth updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_queue_depth(queue.as_ref(), depth as f64);
}

/// Observe the duration of a single attempt.
pub fn observe_job_duration(
    queue: impl AsRef<str>,
    kind: impl AsRef<str>,
    status: impl AsRef<str>,
    duration_secs: f64,
) {
    tracing::debug!(
        queue = %queue.as_ref(),
        job_kind = %kind.as_ref(),
        status = %status.as_ref(),
        duration_secs = duration_secs,
        "job attempt duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_job_duration(
        queue.as_ref(),
        kind.as_ref(),
        status.as_ref(),
        duration_secs,
    );
}

/// Record the start of an attempt for duration tracking.
///
/// Returns an opaque handle that should be passed to `record_job_end`.
pub fn record_job_start(job_id: JobId) -> JobTimingHandle {
    JobTimingHandle {
        job_id,
        start: Instant::now(),
    }
}

/// Record the end of an attempt and update duration metrics.
pub fn record_job_end(
    handle: JobTimingHandle,
    queue: impl AsRef<str>,
    kind: impl AsRef<str>,
    status: impl AsRef<str>,
) {
    observe_job_duration(queue, kind, status, handle.elapsed().as_secs_f64());
}

/// Record a finished index rebuild.
pub fn record_index_rebuild(generation: u64, documents: usize, duration: Duration) {
    tracing::info!(
        generation = generation,
        documents = documents,
        duration_ms = duration.as_millis() as u64,
        "search index rebuilt"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_index_rebuild(documents as f64, duration.as_secs_f64());
}

pub fn record_index_rebuild_failed(error: impl AsRef<str>) {
    tracing::error!(error = %error.as_ref(), "search index rebuild failed");

    #[cfg(feature = "metrics")]
    crate::metrics::record_index_rebuild_failed();
}

/// Handle for tracking attempt duration.
///
/// This is an opaque type returned by `record_job_start` and consumed by `record_job_end`.
#[derive(Debug)]
pub struct JobTimingHandle {
    job_id: JobId,
    start: Instant,
}

impl JobTimingHandle {
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
