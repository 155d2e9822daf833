use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tracing::Instrument;

use crate::error::JobError;
use crate::events::JobEventPayload;
use crate::job::{Job, JobContext, JobKind};
use crate::queue::{JobHandler, QueueShared, QueuedJob};
use crate::telemetry;

/// Pull jobs until the queue shuts down and the pending list is empty.
pub(crate) async fn worker_loop<J, H>(worker_id: String, shared: Arc<QueueShared<J, H>>)
where
    J: Job,
    H: JobHandler<J>,
{
    shared.counters.active_workers.fetch_add(1, Ordering::SeqCst);
    tracing::debug!(worker = %worker_id, "worker started");

    loop {
        // Scoped so a worker busy with a job holds no waiter slot.
        let job = {
            let notified = shared.work_ready.notified();
            tokio::pin!(notified);
            // Enabled before the pop so an enqueue landing between an empty
            // pop and the select still reaches this worker.
            notified.as_mut().enable();

            match shared.pop() {
                Some(job) => job,
                None => {
                    if shared.shutdown.is_cancelled() {
                        break;
                    }
                    tokio::select! {
                        _ = shared.shutdown.cancelled() => break,
                        _ = &mut notified => {}
                    }
                    continue;
                }
            }
        };
        run_job(&shared, job).await;
    }

    shared.counters.active_workers.fetch_sub(1, Ordering::SeqCst);
    tracing::debug!(worker = %worker_id, "worker shutting down");
}

async fn run_job<J, H>(shared: &Arc<QueueShared<J, H>>, mut job: QueuedJob<J, H::Output>)
where
    J: Job,
    H: JobHandler<J>,
{
    let kind = job.payload.kind().as_str();
    let attempt = job.retry_count + 1;
    let ctx = JobContext {
        job_id: job.id,
        attempt,
        correlation_id: job.correlation_id,
    };

    shared.counters.running.fetch_add(1, Ordering::SeqCst);
    shared.publish(
        job.correlation_id,
        JobEventPayload::Started {
            job_id: job.id,
            kind: kind.to_string(),
            attempt,
        },
    );

    let span = telemetry::job_dispatch_span(shared.name(), job.id, kind, attempt);
    let timing = telemetry::record_job_start(job.id);
    let waited = Utc::now() - job.enqueued_at;
    tracing::debug!(parent: &span, waited_ms = waited.num_milliseconds(), "dispatching job");

    let work = AssertUnwindSafe(shared.handler.handle(&job.payload, ctx)).catch_unwind();
    let outcome = match tokio::time::timeout(job.timeout, work).instrument(span.clone()).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(JobError::Permanent(format!(
            "handler panicked: {}",
            panic_message(panic.as_ref())
        ))),
        // Dropping the handler future cancels it; its late result can never surface.
        Err(_) => Err(JobError::Timeout(job.timeout)),
    };

    shared.counters.running.fetch_sub(1, Ordering::SeqCst);

    match outcome {
        Ok(output) => {
            let duration = timing.elapsed();
            telemetry::record_job_end(timing, shared.name(), kind, "success");
            telemetry::record_job_completed(shared.name(), kind, "success");
            shared.publish(
                job.correlation_id,
                JobEventPayload::Completed {
                    job_id: job.id,
                    kind: kind.to_string(),
                    attempts: attempt,
                    duration,
                },
            );
            job.resolve(Ok(output));
        }
        Err(err) if err.is_retryable() && job.retry_count < job.max_retries => {
            job.retry_count += 1;
            let delay = shared.config.retry_delay() * job.retry_count;
            telemetry::record_job_end(timing, shared.name(), kind, "retrying");
            tracing::warn!(
                parent: &span,
                error = %err,
                retry = job.retry_count,
                max_retries = job.max_retries,
                delay_ms = delay.as_millis() as u64,
                "job attempt failed; retrying"
            );
            shared.publish(
                job.correlation_id,
                JobEventPayload::Retrying {
                    job_id: job.id,
                    kind: kind.to_string(),
                    attempt,
                    delay,
                    error: err.to_string(),
                },
            );
            schedule_retry(shared, job, delay);
        }
        Err(err) => {
            telemetry::record_job_end(timing, shared.name(), kind, err.kind());
            telemetry::record_job_completed(shared.name(), kind, "failed");
            tracing::warn!(parent: &span, error = %err, attempts = attempt, "job failed");
            shared.publish(
                job.correlation_id,
                JobEventPayload::Failed {
                    job_id: job.id,
                    kind: kind.to_string(),
                    attempts: attempt,
                    error: err.to_string(),
                },
            );
            job.resolve(Err(err));
        }
    }
}

/// Park a failed job for `delay`, then put it back at the front of the line.
///
/// A shutdown during the wait cancels the job instead.
fn schedule_retry<J, H>(
    shared: &Arc<QueueShared<J, H>>,
    job: QueuedJob<J, H::Output>,
    delay: std::time::Duration,
) where
    J: Job,
    H: JobHandler<J>,
{
    shared.counters.delayed.fetch_add(1, Ordering::SeqCst);
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                shared.counters.delayed.fetch_sub(1, Ordering::SeqCst);
                shared.requeue_front(job);
            }
            _ = shared.shutdown.cancelled() => {
                shared.counters.delayed.fetch_sub(1, Ordering::SeqCst);
                shared.cancel(job);
            }
        }
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
