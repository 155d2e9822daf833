//! Quarry - in-process job queues, text extraction and search-index
//! maintenance for uploaded files.
//!
//! A single-process coordination layer: uploaded files are recorded in a
//! persisted collection, their text is extracted on a bounded worker pool,
//! and a fuzzy search index is kept eventually consistent with the
//! collection through a strictly serialized maintenance queue.
//!
//! # Core Concepts
//!
//! - **Job**: A strongly typed unit of work implementing the [`Job`] trait,
//!   executed by a [`JobHandler`]. Enqueueing returns a [`JobHandle`] that
//!   resolves exactly once.
//!
//! - **Queue**: [`JobQueue`] runs jobs by priority on a fixed number of
//!   workers, with per-attempt timeouts and linear retry backoff.
//!
//! - **Registry**: [`QueueRegistry`] names the running queues, aggregates
//!   their stats and shuts them all down.
//!
//! - **Pipelines**: [`ExtractionPipeline`] (two workers, 60 s) and
//!   [`IndexPipeline`] (one worker, 10 s) specialize the queue.
//!
//! - **Store**: [`FileStore`] is the source of truth for [`FileRecord`]s,
//!   mirrored to a [`DurableStorage`] and feeding the [`SearchIndex`].
//!
//! - **Events**: [`InProcEventBus`] broadcasts job lifecycle and index
//!   rebuild events for observers.
//!
//! - **Context**: [`AppContext`] wires all of the above once per process.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use quarry::*;
//!
//! let ctx = AppContext::builder(ServiceConfig::default()).start().await?;
//! let ingestion = ctx
//!     .ingest(NewFileRecord::new("notes.txt", "text/plain", 42, "/uploads/ab12.txt"))
//!     .await?;
//! ingestion.extraction.await??;
//! let page = ctx.search(&SearchQuery::new("invoice"))?;
//! ```

/// Service, queue, store and search configuration.
///
/// The `config` module defines [`ServiceConfig`] and its parts, loadable
/// from TOML.
pub mod config;

/// Wiring of every component for one running process.
pub mod context;

/// Correlation identifiers carried by jobs and events.
pub mod correlation;

/// Typed errors for jobs, extraction, storage and search.
pub mod error;

/// Event publishing and subscription system.
///
/// The `events` module provides:
/// - [`EventPublisher`] - the telemetry sink trait
/// - [`JobEvent`] and [`JobEventPayload`] for job lifecycle data
/// - [`IndexEvent`] for index rebuilds
/// - [`InProcEventBus`] for in-process broadcasting
pub mod events;

/// Text extraction collaborators.
pub mod extract;

/// Core job definitions and traits.
///
/// The `job` module defines:
/// - [`Job`] trait - the main trait for job payloads
/// - [`JobKind`] - marker trait for job kind enums
/// - [`JobPriority`] - integer priority, higher first
/// - [`JobOptions`] - per-job overrides
/// - [`JobContext`] - per-attempt execution context
/// - [`JobHandle`] - future resolving with the job's result
/// - [`JobId`] - unique job identifier
pub mod job;

#[cfg(feature = "metrics")]
/// Prometheus metrics, enabled by the `metrics` feature.
pub mod metrics;

/// Priority-ordered pending list.
pub mod pending;

/// Extraction and index maintenance pipelines.
pub mod pipeline;

/// Job queue, handler trait and queue statistics.
///
/// The `queue` module provides [`JobQueue`], [`JobHandler`],
/// [`ManagedQueue`], [`QueueStats`] and [`ShutdownReport`].
pub mod queue;

/// Named queue registry.
pub mod registry;

/// File records and their metadata.
pub mod record;

/// Runtime internals: workers and shutdown signaling.
pub mod runtime;

/// Fuzzy search index, queries and result pages.
pub mod search;

/// Durable snapshot storage.
pub mod storage;

/// The persisted file collection.
pub mod store;

/// Tracing spans and telemetry helpers.
pub mod telemetry;

pub use config::*;
pub use context::*;
pub use correlation::*;
pub use error::*;
pub use events::*;
pub use extract::*;
pub use job::*;
pub use pipeline::*;
pub use queue::*;
pub use record::*;
pub use registry::*;
pub use search::*;
pub use storage::*;
pub use store::*;
