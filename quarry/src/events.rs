use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::correlation::CorrelationId;
use crate::job::{JobId, JobPriority};

/// Metadata envelope attached to every job event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub correlation_id: CorrelationId,
    /// Registry name of the queue that emitted the event.
    pub queue: String,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(queue: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self {
            version: 1,
            correlation_id,
            queue: queue.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Job lifecycle event with metadata and payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobEvent {
    pub meta: EventMeta,
    pub payload: JobEventPayload,
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match &self.payload {
            JobEventPayload::Enqueued { job_id, .. }
            | JobEventPayload::Started { job_id, .. }
            | JobEventPayload::Completed { job_id, .. }
            | JobEventPayload::Retrying { job_id, .. }
            | JobEventPayload::Failed { job_id, .. }
            | JobEventPayload::Cancelled { job_id, .. } => *job_id,
        }
    }
}

/// Event payload emitted for job lifecycle transitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum JobEventPayload {
    /// Job was accepted into the pending list.
    Enqueued {
        job_id: JobId,
        kind: String,
        priority: JobPriority,
    },
    /// A worker slot picked the job up.
    Started {
        job_id: JobId,
        kind: String,
        attempt: u32,
    },
    /// Handler returned a result; the handle resolved successfully.
    Completed {
        job_id: JobId,
        kind: String,
        attempts: u32,
        duration: Duration,
    },
    /// Attempt failed and the job will run again after `delay`.
    Retrying {
        job_id: JobId,
        kind: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Job was rejected for good.
    Failed {
        job_id: JobId,
        kind: String,
        attempts: u32,
        error: String,
    },
    /// Job was dropped by shutdown before it could run.
    Cancelled { job_id: JobId, kind: String },
}

/// Search index maintenance events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum IndexEvent {
    Rebuilt {
        generation: u64,
        documents: usize,
        duration: Duration,
        timestamp: DateTime<Utc>,
    },
    RebuildFailed {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// Sink for lifecycle telemetry.
///
/// Publishing is fire-and-forget: it must never block the caller, and a
/// sink with no listeners silently drops events.
pub trait EventPublisher: Send + Sync {
    fn publish_job(&self, event: JobEvent);

    fn publish_index(&self, event: IndexEvent);
}

/// In-process event bus using tokio broadcast channels.
///
/// `InProcEventBus` provides a lightweight, fan-out event bus with one
/// channel for job lifecycle events and one for index events. Events are
/// broadcast to all active subscribers; if a subscriber lags behind, it will
/// receive `RecvError::Lagged` but won't block the publisher.
///
/// # Example
///
/// ```ignore
/// use quarry::events::InProcEventBus;
///
/// let bus = InProcEventBus::new(1000);
/// let mut jobs = bus.subscribe_jobs();
/// let mut index = bus.subscribe_index();
/// ```
pub struct InProcEventBus {
    job_sender: broadcast::Sender<JobEvent>,
    index_sender: broadcast::Sender<IndexEvent>,
    job_capacity: usize,
    index_capacity: usize,
}

impl std::fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("job_capacity", &self.job_capacity)
            .field("job_subscribers", &self.job_sender.receiver_count())
            .field("index_capacity", &self.index_capacity)
            .field("index_subscribers", &self.index_sender.receiver_count())
            .finish()
    }
}

impl Default for InProcEventBus {
    fn default() -> Self {
        Self::new(1_024)
    }
}

impl InProcEventBus {
    /// Create a new event bus with the same capacity for both channels.
    ///
    /// When a channel buffer is full, the oldest events are dropped and
    /// slow subscribers receive `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        Self::with_capacities(capacity, capacity)
    }

    pub fn with_capacities(job_capacity: usize, index_capacity: usize) -> Self {
        let (job_sender, _) = broadcast::channel(job_capacity);
        let (index_sender, _) = broadcast::channel(index_capacity);
        Self {
            job_sender,
            index_sender,
            job_capacity,
            index_capacity,
        }
    }

    pub fn job_subscriber_count(&self) -> usize {
        self.job_sender.receiver_count()
    }

    pub fn index_subscriber_count(&self) -> usize {
        self.index_sender.receiver_count()
    }

    pub fn job_capacity(&self) -> usize {
        self.job_capacity
    }

    pub fn index_capacity(&self) -> usize {
        self.index_capacity
    }

    /// Receive every job event published after this call.
    pub fn subscribe_jobs(&self) -> broadcast::Receiver<JobEvent> {
        self.job_sender.subscribe()
    }

    pub fn subscribe_index(&self) -> broadcast::Receiver<IndexEvent> {
        self.index_sender.subscribe()
    }
}

impl EventPublisher for InProcEventBus {
    fn publish_job(&self, event: JobEvent) {
        let _ = self.job_sender.send(event);
    }

    fn publish_index(&self, event: IndexEvent) {
        let _ = self.index_sender.send(event);
    }
}
