use std::fmt::{self, Display};
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::correlation::CorrelationId;
use crate::error::JobError;

/// Tag naming the kind of work a job performs.
///
/// Kinds are finite enums; the queue never dispatches on strings.
pub trait JobKind:
    Copy + Eq + Hash + Display + fmt::Debug + Send + Sync + 'static
{
    fn as_str(&self) -> &'static str;
}

/// A unit of work accepted by a [`JobQueue`](crate::queue::JobQueue).
///
/// The payload is owned by the queue from enqueue until its handle resolves.
pub trait Job: Send + Sync + 'static {
    type Kind: JobKind;

    fn kind(&self) -> Self::Kind;

    /// Reject malformed payloads before they reach a worker.
    ///
    /// A validation failure is never retried.
    fn validate(&self) -> Result<(), JobError> {
        Ok(())
    }
}

/// Dispatch priority. Higher values are served first; ties keep FIFO order.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobPriority(pub i32);

impl JobPriority {
    pub const HIGH: JobPriority = JobPriority(10);
    pub const NORMAL: JobPriority = JobPriority(0);
    pub const LOW: JobPriority = JobPriority(-10);
}

impl Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for JobPriority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-job overrides applied at enqueue time.
///
/// Unset fields fall back to the queue's [`QueueConfig`](crate::config::QueueConfig).
#[derive(Clone, Debug, Default)]
pub struct JobOptions {
    pub priority: JobPriority,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub correlation_id: Option<CorrelationId>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: impl Into<JobPriority>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Execution context handed to a handler for one attempt.
#[derive(Clone, Copy, Debug)]
pub struct JobContext {
    pub job_id: JobId,
    /// 1 for the first execution, incremented on every retry.
    pub attempt: u32,
    pub correlation_id: CorrelationId,
}

/// Pending result of an enqueued job.
///
/// Resolves exactly once: with the handler's output, or with the final
/// [`JobError`] once retries are exhausted or the job is cancelled.
#[derive(Debug)]
pub struct JobHandle<T> {
    id: JobId,
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<Result<T, JobError>>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(
        id: JobId,
        correlation_id: CorrelationId,
        receiver: oneshot::Receiver<Result<T, JobError>>,
    ) -> Self {
        Self {
            id,
            correlation_id,
            receiver,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, JobError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The sender only disappears if the runtime tore the queue down.
            Poll::Ready(Err(_)) => Poll::Ready(Err(JobError::ShutdownCancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
