use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use quarry::*;

use crate::TestJob;

/// How [`RecordingHandler`] treats `TestJob::Failing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureMode {
    Succeed,
    Retryable,
    Permanent,
    /// Fail with a transient error until the given attempt, then succeed.
    SucceedOnAttempt(u32),
}

#[derive(Clone, Debug)]
pub struct ExecutionRecord {
    pub job_id: JobId,
    pub name: String,
    pub attempt: u32,
}

/// Handler that records every attempt and the peak number running at once.
///
/// Output is the job's name.
pub struct RecordingHandler {
    failure_mode: Mutex<FailureMode>,
    executions: Mutex<Vec<ExecutionRecord>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::with_failure_mode(FailureMode::Retryable)
    }

    pub fn with_failure_mode(mode: FailureMode) -> Self {
        Self {
            failure_mode: Mutex::new(mode),
            executions: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_failure_mode(&self, mode: FailureMode) {
        *self.failure_mode.lock() = mode;
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.executions.lock().clone()
    }

    /// Names in the order their attempts started.
    pub fn started_names(&self) -> Vec<String> {
        self.executions
            .lock()
            .iter()
            .map(|record| record.name.clone())
            .collect()
    }

    pub fn attempts_for(&self, name: &str) -> usize {
        self.executions
            .lock()
            .iter()
            .filter(|record| record.name == name)
            .count()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn assert_attempt_count_eq(&self, expected: usize) {
        let actual = self.executions.lock().len();
        assert_eq!(actual, expected, "Expected {} attempts, got {}", expected, actual);
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobHandler<TestJob> for RecordingHandler {
    type Output = String;

    async fn handle(&self, job: &TestJob, ctx: JobContext) -> Result<String, JobError> {
        self.executions.lock().push(ExecutionRecord {
            job_id: ctx.job_id,
            name: job.name().to_string(),
            attempt: ctx.attempt,
        });
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        match job {
            TestJob::Simple { name } => Ok(name.clone()),
            TestJob::Slow { duration_ms, name } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                Ok(name.clone())
            }
            TestJob::Failing { error, name } => match *self.failure_mode.lock() {
                FailureMode::Succeed => Ok(name.clone()),
                FailureMode::Retryable => Err(JobError::Transient(error.clone())),
                FailureMode::Permanent => Err(JobError::Permanent(error.clone())),
                FailureMode::SucceedOnAttempt(n) if ctx.attempt >= n => Ok(name.clone()),
                FailureMode::SucceedOnAttempt(_) => Err(JobError::Transient(error.clone())),
            },
        }
    }
}
