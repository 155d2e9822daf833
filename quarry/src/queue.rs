use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::correlation::CorrelationId;
use crate::error::JobError;
use crate::events::{EventMeta, EventPublisher, JobEvent, JobEventPayload};
use crate::job::{Job, JobContext, JobHandle, JobId, JobKind, JobOptions, JobPriority};
use crate::pending::{PendingQueue, Prioritized};
use crate::runtime::{worker_loop, ShutdownToken};
use crate::telemetry;

/// Executes jobs of one payload type.
///
/// Handlers never crash the queue: errors reject the attempt, panics are
/// caught and reported as [`JobError::Permanent`].
#[async_trait]
pub trait JobHandler<J: Job>: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn handle(&self, job: &J, ctx: JobContext) -> Result<Self::Output, JobError>;
}

/// Point-in-time counters for one queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting for a worker slot.
    pub queue_length: usize,
    /// Jobs currently executing.
    pub running_count: usize,
    /// Worker tasks still alive.
    pub active_workers: usize,
    pub max_workers: usize,
    /// Failed jobs sleeping out their backoff before the next attempt.
    pub delayed_retries: usize,
}

/// Outcome of [`JobQueue::shutdown`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub queue: String,
    /// Pending jobs rejected with [`JobError::ShutdownCancelled`].
    pub dropped: usize,
    /// Workers still executing a job when the grace period ran out.
    pub abandoned: usize,
    pub elapsed: Duration,
    pub timed_out: bool,
}

/// Object-safe view of a queue used by the [`QueueRegistry`](crate::registry::QueueRegistry).
#[async_trait]
pub trait ManagedQueue: Send + Sync {
    fn name(&self) -> &str;

    fn stats(&self) -> QueueStats;

    async fn shutdown(&self, grace: Duration) -> ShutdownReport;
}

/// A job owned by the queue, together with the sender for its handle.
pub(crate) struct QueuedJob<J, O> {
    pub(crate) id: JobId,
    pub(crate) payload: J,
    pub(crate) priority: JobPriority,
    pub(crate) enqueued_at: DateTime<Utc>,
    pub(crate) retry_count: u32,
    pub(crate) max_retries: u32,
    pub(crate) timeout: Duration,
    pub(crate) correlation_id: CorrelationId,
    responder: oneshot::Sender<Result<O, JobError>>,
}

impl<J, O> QueuedJob<J, O> {
    /// Complete the caller's handle. Consumes the job, so it can only happen once.
    pub(crate) fn resolve(self, result: Result<O, JobError>) {
        // The caller may have dropped its handle; the job still counts as done.
        let _ = self.responder.send(result);
    }
}

impl<J, O> Prioritized for QueuedJob<J, O> {
    fn priority(&self) -> JobPriority {
        self.priority
    }
}

#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pub(crate) queued: AtomicUsize,
    pub(crate) running: AtomicUsize,
    pub(crate) delayed: AtomicUsize,
    pub(crate) active_workers: AtomicUsize,
}

/// State shared between a [`JobQueue`] and its worker tasks.
pub(crate) struct QueueShared<J: Job, H: JobHandler<J>> {
    pub(crate) config: QueueConfig,
    pub(crate) handler: Arc<H>,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) pending: parking_lot::Mutex<PendingQueue<QueuedJob<J, H::Output>>>,
    pub(crate) work_ready: Notify,
    pub(crate) shutdown: ShutdownToken,
    pub(crate) counters: QueueCounters,
}

impl<J: Job, H: JobHandler<J>> QueueShared<J, H> {
    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn publish(&self, correlation_id: CorrelationId, payload: JobEventPayload) {
        self.events.publish_job(JobEvent {
            meta: EventMeta::new(self.name(), correlation_id),
            payload,
        });
    }

    pub(crate) fn pop(&self) -> Option<QueuedJob<J, H::Output>> {
        let mut pending = self.pending.lock();
        let job = pending.pop();
        self.counters.queued.store(pending.len(), Ordering::SeqCst);
        if job.is_some() && !pending.is_empty() {
            // Permits don't stack; pass the wakeup on while work remains.
            self.work_ready.notify_one();
        }
        job
    }

    /// Put a retry back at the head of the line, or cancel it if the queue closed meanwhile.
    pub(crate) fn requeue_front(&self, job: QueuedJob<J, H::Output>) {
        let rejected = {
            let mut pending = self.pending.lock();
            let result = pending.push_front(job);
            self.counters.queued.store(pending.len(), Ordering::SeqCst);
            result.err()
        };
        match rejected {
            Some(job) => self.cancel(job),
            None => {
                telemetry::set_queue_depth(self.name(), self.counters.queued.load(Ordering::SeqCst));
                self.work_ready.notify_one();
            }
        }
    }

    pub(crate) fn cancel(&self, job: QueuedJob<J, H::Output>) {
        let kind = job.payload.kind();
        self.publish(
            job.correlation_id,
            JobEventPayload::Cancelled {
                job_id: job.id,
                kind: kind.as_str().to_string(),
            },
        );
        telemetry::record_job_completed(self.name(), kind.as_str(), "cancelled");
        job.resolve(Err(JobError::ShutdownCancelled));
    }

    /// Stop admitting jobs and reject everything still waiting. Returns how many were dropped.
    fn close(&self) -> usize {
        let drained = {
            let mut pending = self.pending.lock();
            let drained = pending.close();
            self.counters.queued.store(0, Ordering::SeqCst);
            drained
        };
        let dropped = drained.len();
        for job in drained {
            self.cancel(job);
        }
        dropped
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            queue_length: self.counters.queued.load(Ordering::SeqCst),
            running_count: self.counters.running.load(Ordering::SeqCst),
            active_workers: self.counters.active_workers.load(Ordering::SeqCst),
            max_workers: self.config.concurrency,
            delayed_retries: self.counters.delayed.load(Ordering::SeqCst),
        }
    }
}

/// Priority-ordered, concurrency-bounded job runner.
///
/// `concurrency` worker tasks pull from one pending list. Each attempt runs
/// under the job's timeout; retryable failures go back to the front of the
/// list after a linear backoff (`retry_delay * retry_count`) until
/// `max_retries` is spent. Every [`JobHandle`] resolves exactly once.
pub struct JobQueue<J: Job, H: JobHandler<J>> {
    shared: Arc<QueueShared<J, H>>,
    worker_handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<J: Job, H: JobHandler<J>> JobQueue<J, H> {
    /// Spawn the worker pool on the current tokio runtime.
    pub fn start(
        config: QueueConfig,
        handler: Arc<H>,
        events: Arc<dyn EventPublisher>,
    ) -> anyhow::Result<Arc<Self>> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .with_context(|| format!("queue {} must be started inside a tokio runtime", config.name))?;

        let shared = Arc::new(QueueShared {
            config,
            handler,
            events,
            pending: parking_lot::Mutex::new(PendingQueue::new()),
            work_ready: Notify::new(),
            shutdown: ShutdownToken::new(),
            counters: QueueCounters::default(),
        });

        let handles = (0..shared.config.concurrency)
            .map(|i| {
                let worker_id = format!("{}-w{}", shared.name(), i);
                runtime.spawn(worker_loop(worker_id, Arc::clone(&shared)))
            })
            .collect();

        tracing::info!(
            queue = %shared.name(),
            workers = shared.config.concurrency,
            "job queue started"
        );

        Ok(Arc::new(Self {
            shared,
            worker_handles: tokio::sync::Mutex::new(handles),
        }))
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Accept a job. Never blocks; the returned handle resolves when the job
    /// finishes for good.
    pub fn enqueue(
        &self,
        payload: J,
        options: JobOptions,
    ) -> Result<JobHandle<H::Output>, JobError> {
        payload.validate()?;
        let timeout = options.timeout.unwrap_or_else(|| self.shared.config.timeout());
        if timeout.is_zero() {
            return Err(JobError::Validation("job timeout must be positive".into()));
        }

        let kind = payload.kind();
        let span = telemetry::job_enqueue_span(self.name(), kind.as_str(), options.priority);
        let _enter = span.enter();

        let id = JobId::new();
        let correlation_id = options.correlation_id.unwrap_or_default();
        let (responder, receiver) = oneshot::channel();
        let job = QueuedJob {
            id,
            payload,
            priority: options.priority,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries: options
                .max_retries
                .unwrap_or(self.shared.config.max_retries),
            timeout,
            correlation_id,
            responder,
        };

        let depth = {
            let mut pending = self.shared.pending.lock();
            if pending.push(job).is_err() {
                tracing::debug!(queue = %self.name(), "enqueue rejected; queue is shut down");
                return Err(JobError::ShutdownCancelled);
            }
            self.shared.counters.queued.store(pending.len(), Ordering::SeqCst);
            pending.len()
        };

        self.shared.publish(
            correlation_id,
            JobEventPayload::Enqueued {
                job_id: id,
                kind: kind.as_str().to_string(),
                priority: options.priority,
            },
        );
        telemetry::record_job_enqueued(self.name(), kind.as_str());
        telemetry::set_queue_depth(self.name(), depth);
        self.shared.work_ready.notify_one();

        Ok(JobHandle::new(id, correlation_id, receiver))
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stop admitting jobs, reject pending ones, and wait up to `grace` for
    /// running jobs.
    ///
    /// Jobs still running at the deadline are abandoned: their tasks keep
    /// going and their handles still resolve, but shutdown stops waiting.
    /// Calling this again returns an empty report.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + grace;

        if !self.is_shut_down() {
            tracing::info!(queue = %self.name(), grace_ms = grace.as_millis() as u64, "shutting down job queue");
        }
        let dropped = self.shared.close();
        self.shared.shutdown.cancel();

        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };

        let mut abandoned = 0;
        for handle in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(queue = %self.name(), "worker task failed: {e:?}"),
                Err(_) => abandoned += 1,
            }
        }

        if abandoned > 0 {
            tracing::warn!(
                queue = %self.name(),
                abandoned,
                "grace period elapsed with jobs still running"
            );
        }

        ShutdownReport {
            queue: self.name().to_string(),
            dropped,
            abandoned,
            elapsed: started.elapsed(),
            timed_out: abandoned > 0,
        }
    }
}

#[async_trait]
impl<J: Job, H: JobHandler<J>> ManagedQueue for JobQueue<J, H> {
    fn name(&self) -> &str {
        JobQueue::name(self)
    }

    fn stats(&self) -> QueueStats {
        JobQueue::stats(self)
    }

    async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        JobQueue::shutdown(self, grace).await
    }
}

impl<J: Job, H: JobHandler<J>> Drop for JobQueue<J, H> {
    fn drop(&mut self) {
        self.shared.close();
        self.shared.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InProcEventBus;
    use std::fmt;
    use std::sync::atomic::AtomicU32;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    struct Echo;

    impl fmt::Display for Echo {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("echo")
        }
    }

    impl JobKind for Echo {
        fn as_str(&self) -> &'static str {
            "echo"
        }
    }

    struct EchoJob(u32);

    impl Job for EchoJob {
        type Kind = Echo;

        fn kind(&self) -> Echo {
            Echo
        }

        fn validate(&self) -> Result<(), JobError> {
            if self.0 == 0 {
                return Err(JobError::Validation("zero".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct EchoHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler<EchoJob> for EchoHandler {
        type Output = u32;

        async fn handle(&self, job: &EchoJob, ctx: JobContext) -> Result<u32, JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if job.0 == 13 {
                panic!("unlucky");
            }
            if job.0 == 7 && ctx.attempt < 2 {
                return Err(JobError::Transient("first try".into()));
            }
            Ok(job.0 * 2)
        }
    }

    fn start(config: QueueConfig) -> Arc<JobQueue<EchoJob, EchoHandler>> {
        JobQueue::start(
            config,
            Arc::new(EchoHandler::default()),
            Arc::new(InProcEventBus::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_resolves_with_output() {
        let queue = start(QueueConfig::new("echo"));
        let handle = queue.enqueue(EchoJob(21), JobOptions::new()).unwrap();
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_validation_rejected_before_queueing() {
        let queue = start(QueueConfig::new("echo"));
        let err = queue.enqueue(EchoJob(0), JobOptions::new()).unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert_eq!(queue.stats().queue_length, 0);
    }

    #[tokio::test]
    async fn test_retry_attempt_numbers_reach_handler() {
        let queue = start(
            QueueConfig::new("echo").with_retry_delay(Duration::from_millis(1)),
        );
        let handle = queue.enqueue(EchoJob(7), JobOptions::new()).unwrap();
        assert_eq!(handle.await.unwrap(), 14);
        assert_eq!(queue.shared.handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_backoff_timer_wakes_on_cancel() {
        let queue = start(QueueConfig::new("echo").with_retry_delay(Duration::from_secs(60)));
        let handle = queue.enqueue(EchoJob(7), JobOptions::new()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while queue.stats().delayed_retries == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        queue.shared.shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap();
        assert!(matches!(result, Err(JobError::ShutdownCancelled)));
        assert_eq!(queue.stats().delayed_retries, 0);
        assert_eq!(queue.shared.handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_permanent_failure() {
        let queue = start(QueueConfig::new("echo"));
        let err = queue
            .enqueue(EchoJob(13), JobOptions::new())
            .unwrap()
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Permanent(ref msg) if msg.contains("unlucky")));

        // The worker survived the panic.
        assert_eq!(queue.enqueue(EchoJob(1), JobOptions::new()).unwrap().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let queue = start(QueueConfig::new("echo"));
        let report = queue.shutdown(Duration::from_millis(50)).await;
        assert!(!report.timed_out);
        assert!(matches!(
            queue.enqueue(EchoJob(1), JobOptions::new()),
            Err(JobError::ShutdownCancelled)
        ));

        let again = queue.shutdown(Duration::from_millis(50)).await;
        assert_eq!(again.dropped, 0);
        assert_eq!(again.abandoned, 0);
    }

    #[tokio::test]
    async fn test_stats_report_worker_pool() {
        let queue = start(QueueConfig::new("echo").with_concurrency(3));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = queue.stats();
        assert_eq!(stats.max_workers, 3);
        assert_eq!(stats.active_workers, 3);
        assert_eq!(stats.running_count, 0);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let result = JobQueue::start(
            QueueConfig::new("echo"),
            Arc::new(EchoHandler::default()),
            Arc::new(InProcEventBus::default()),
        );
        assert!(result.is_err());
    }
}
