use std::time::Duration;

use thiserror::Error;

use crate::record::FileId;

/// Terminal or intermediate failure of a job attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Bad job parameters. Never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// The handler exceeded its allotted time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// I/O or contention failure worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Deterministic failure such as an unsupported format or corrupt content.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Dropped because the queue shut down before the job could finish.
    #[error("cancelled by queue shutdown")]
    ShutdownCancelled,
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Timeout(_) | JobError::Transient(_))
    }

    /// Short label used for metrics and event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Validation(_) => "validation",
            JobError::Timeout(_) => "timeout",
            JobError::Transient(_) => "transient",
            JobError::Permanent(_) => "permanent",
            JobError::ShutdownCancelled => "shutdown_cancelled",
        }
    }
}

/// Failure reported by a [`TextExtractor`](crate::extract::TextExtractor).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("unsupported format: {mime_type}")]
    UnsupportedFormat { mime_type: String },

    #[error("extraction failed: {message}")]
    Failure { message: String, transient: bool },
}

impl ExtractError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            transient: false,
        }
    }
}

impl From<ExtractError> for JobError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::UnsupportedFormat { .. } => JobError::Permanent(err.to_string()),
            ExtractError::Failure {
                transient: true, ..
            } => JobError::Transient(err.to_string()),
            ExtractError::Failure {
                transient: false, ..
            } => JobError::Permanent(err.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("file not found: {0}")]
    NotFound(FileId),

    #[error("storage: {0:#}")]
    Storage(#[source] anyhow::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("index rebuild failed: {0}")]
    Rebuild(String),
}

impl From<SearchError> for JobError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidQuery(msg) => JobError::Validation(msg),
            SearchError::Rebuild(msg) => JobError::Transient(msg),
        }
    }
}
