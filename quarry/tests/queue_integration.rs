//! Queue integration tests.
//!
//! Covers exactly-once resolution, priority ordering, bounded concurrency,
//! retry accounting, lifecycle events and shutdown behavior.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use quarry::events::{InProcEventBus, JobEvent, JobEventPayload};
use quarry::job::{JobId, JobOptions, JobPriority};
use quarry::queue::JobQueue;
use quarry::registry::QueueRegistry;
use quarry::{JobError, QueueConfig};
use quarry_testkit::{FailureMode, RecordingHandler, TestJob};
use tokio::sync::broadcast;
use tokio::time::timeout;

type TestQueue = JobQueue<TestJob, RecordingHandler>;

fn queue_config(name: &str, concurrency: usize) -> QueueConfig {
    QueueConfig::new(name)
        .with_concurrency(concurrency)
        .with_max_retries(2)
        .with_retry_delay(Duration::from_millis(5))
        .with_timeout(Duration::from_secs(5))
}

fn start_queue(
    config: QueueConfig,
    handler: Arc<RecordingHandler>,
) -> (Arc<TestQueue>, Arc<InProcEventBus>) {
    let events = Arc::new(InProcEventBus::new(4_096));
    let queue = JobQueue::start(config, handler, events.clone()).expect("start queue");
    (queue, events)
}

async fn next_event(rx: &mut broadcast::Receiver<JobEvent>) -> Option<JobEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[tokio::test]
async fn every_job_resolves_exactly_once() {
    let handler = RecordingHandler::shared();
    let (queue, events) = start_queue(queue_config("exactly-once", 4), handler.clone());
    let mut rx = events.subscribe_jobs();

    let handles: Vec<_> = (0..50)
        .map(|idx| {
            queue
                .enqueue(TestJob::simple(format!("job-{idx}")), JobOptions::new())
                .unwrap()
        })
        .collect();
    let expected: HashSet<JobId> = handles.iter().map(|handle| handle.id()).collect();

    let outputs = join_all(handles).await;
    assert!(outputs.iter().all(|output| output.is_ok()));
    handler.assert_attempt_count_eq(50);

    let mut completed = HashSet::new();
    let wait = timeout(Duration::from_secs(5), async {
        while completed.len() < expected.len() {
            if let Some(event) = next_event(&mut rx).await {
                if let JobEventPayload::Completed { job_id, .. } = event.payload {
                    assert!(completed.insert(job_id), "job {job_id} completed twice");
                }
            }
        }
    })
    .await;

    assert!(wait.is_ok(), "timed out waiting for completions");
    assert_eq!(completed, expected);
    queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn higher_priority_runs_first() {
    let handler = RecordingHandler::shared();
    let (queue, _events) = start_queue(queue_config("priority", 1), handler.clone());

    let blocker = queue
        .enqueue(TestJob::slow("blocker", 100), JobOptions::new())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let low = queue
        .enqueue(
            TestJob::simple("low"),
            JobOptions::new().with_priority(JobPriority::LOW),
        )
        .unwrap();
    let normal = queue.enqueue(TestJob::simple("normal"), JobOptions::new()).unwrap();
    let high = queue
        .enqueue(
            TestJob::simple("high"),
            JobOptions::new().with_priority(JobPriority::HIGH),
        )
        .unwrap();
    let also_normal = queue
        .enqueue(TestJob::simple("normal-2"), JobOptions::new())
        .unwrap();

    blocker.await.unwrap();
    low.await.unwrap();
    normal.await.unwrap();
    high.await.unwrap();
    also_normal.await.unwrap();

    assert_eq!(
        handler.started_names(),
        vec!["blocker", "high", "normal", "normal-2", "low"]
    );
    queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn running_jobs_never_exceed_concurrency() {
    let handler = RecordingHandler::shared();
    let (queue, _events) = start_queue(queue_config("bounded", 2), handler.clone());

    let handles: Vec<_> = (0..5)
        .map(|idx| {
            queue
                .enqueue(TestJob::slow(format!("slow-{idx}"), 50), JobOptions::new())
                .unwrap()
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let stats = queue.stats();
    assert_eq!(stats.running_count, 2);
    assert_eq!(stats.queue_length, 3);
    assert_eq!(stats.max_workers, 2);

    for result in join_all(handles).await {
        assert!(result.is_ok());
    }
    assert_eq!(handler.max_running(), 2);
    queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn back_to_back_enqueues_wake_every_idle_worker() {
    for round in 0..40 {
        let handler = RecordingHandler::shared();
        let (queue, _events) = start_queue(queue_config("wakeups", 2), handler.clone());
        while queue.stats().active_workers < 2 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;

        let first = queue
            .enqueue(TestJob::slow("first", 30), JobOptions::new())
            .unwrap();
        let second = queue
            .enqueue(TestJob::slow("second", 30), JobOptions::new())
            .unwrap();
        let (a, b) = tokio::join!(first, second);
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(
            handler.max_running(),
            2,
            "a worker stayed idle with work pending in round {round}"
        );
        queue.shutdown(Duration::from_secs(1)).await;
    }
}

#[tokio::test]
async fn retryable_failure_runs_max_retries_plus_one_times() {
    let handler = RecordingHandler::shared();
    let (queue, events) = start_queue(queue_config("retries", 1), handler.clone());
    let mut rx = events.subscribe_jobs();

    let handle = queue
        .enqueue(TestJob::failing("flaky", "disk busy"), JobOptions::new())
        .unwrap();
    let job_id = handle.id();
    let err = handle.await.unwrap_err();

    assert!(matches!(err, JobError::Transient(_)));
    assert_eq!(handler.attempts_for("flaky"), 3);
    let attempts: Vec<u32> = handler.executions().iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let mut retries = Vec::new();
    let wait = timeout(Duration::from_secs(2), async {
        loop {
            match next_event(&mut rx).await.map(|event| event.payload) {
                Some(JobEventPayload::Retrying { delay, .. }) => retries.push(delay),
                Some(JobEventPayload::Failed { job_id: id, attempts, .. }) if id == job_id => {
                    return attempts;
                }
                Some(_) => {}
                None => return 0,
            }
        }
    })
    .await;

    assert_eq!(wait.ok(), Some(3));
    assert_eq!(
        retries,
        vec![Duration::from_millis(5), Duration::from_millis(10)]
    );
    queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn transient_failure_recovers_within_budget() {
    let handler = Arc::new(RecordingHandler::with_failure_mode(
        FailureMode::SucceedOnAttempt(2),
    ));
    let (queue, _events) = start_queue(queue_config("recover", 1), handler.clone());

    let output = queue
        .enqueue(TestJob::failing("eventually", "locked"), JobOptions::new())
        .unwrap()
        .await
        .unwrap();

    assert_eq!(output, "eventually");
    assert_eq!(handler.attempts_for("eventually"), 2);
    queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let handler = Arc::new(RecordingHandler::with_failure_mode(FailureMode::Permanent));
    let (queue, _events) = start_queue(queue_config("permanent", 1), handler.clone());

    let err = queue
        .enqueue(TestJob::failing("corrupt", "bad header"), JobOptions::new())
        .unwrap()
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Permanent(_)));
    handler.assert_attempt_count_eq(1);

    // Once the handler recovers, the same queue serves new jobs normally.
    handler.set_failure_mode(FailureMode::Succeed);
    let name = queue
        .enqueue(TestJob::failing("repaired", "bad header"), JobOptions::new())
        .unwrap()
        .await
        .unwrap();
    assert_eq!(name, "repaired");
    handler.assert_attempt_count_eq(2);
    queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn slow_attempts_time_out_and_retry() {
    let handler = RecordingHandler::shared();
    let (queue, _events) = start_queue(queue_config("timeouts", 1), handler.clone());

    let err = queue
        .enqueue(
            TestJob::slow("stuck", 1_000),
            JobOptions::new()
                .with_timeout(Duration::from_millis(20))
                .with_max_retries(1),
        )
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(err, JobError::Timeout(Duration::from_millis(20)));
    assert_eq!(handler.attempts_for("stuck"), 2);
    queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn shutdown_stops_waiting_after_grace() {
    let handler = RecordingHandler::shared();
    let (queue, _events) = start_queue(queue_config("graceful", 1), handler.clone());

    let running = queue
        .enqueue(TestJob::slow("long", 300), JobOptions::new())
        .unwrap();
    let waiting = queue
        .enqueue(TestJob::simple("never-started"), JobOptions::new())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    let report = queue.shutdown(Duration::from_millis(100)).await;
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(report.dropped, 1);
    assert_eq!(report.abandoned, 1);
    assert!(report.timed_out);

    assert!(matches!(waiting.await, Err(JobError::ShutdownCancelled)));
    // The abandoned job still runs to completion and resolves its handle.
    assert_eq!(running.await.unwrap(), "long");
    assert!(matches!(
        queue.enqueue(TestJob::simple("late"), JobOptions::new()),
        Err(JobError::ShutdownCancelled)
    ));
}

#[tokio::test]
async fn pending_retry_is_cancelled_by_shutdown() {
    let handler = RecordingHandler::shared();
    let config = queue_config("retry-shutdown", 1).with_retry_delay(Duration::from_secs(10));
    let (queue, _events) = start_queue(config, handler.clone());

    let handle = queue
        .enqueue(TestJob::failing("backing-off", "busy"), JobOptions::new())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(queue.stats().delayed_retries, 1);

    let report = queue.shutdown(Duration::from_millis(100)).await;
    assert!(!report.timed_out);
    assert!(matches!(handle.await, Err(JobError::ShutdownCancelled)));
    handler.assert_attempt_count_eq(1);
}

#[tokio::test]
async fn registry_shuts_down_every_queue() {
    let registry = QueueRegistry::new();
    let (first, _) = start_queue(queue_config("first", 1), RecordingHandler::shared());
    let (second, _) = start_queue(queue_config("second", 2), RecordingHandler::shared());
    registry.register(first.clone()).unwrap();
    registry.register(second.clone()).unwrap();

    second
        .enqueue(TestJob::simple("one"), JobOptions::new())
        .unwrap()
        .await
        .unwrap();

    let snapshot = registry.stats();
    assert_eq!(snapshot.queues.len(), 2);
    assert_eq!(snapshot.queues["second"].max_workers, 2);

    let reports = registry.shutdown_all(Duration::from_millis(200)).await;
    let mut names: Vec<_> = reports.iter().map(|report| report.queue.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["first", "second"]);
    assert!(first.is_shut_down());
    assert!(second.is_shut_down());
}
