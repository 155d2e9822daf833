use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Configuration for a single job queue.
///
/// Controls the worker pool size and the default retry/timeout policy
/// applied to jobs that do not override it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Registry name of the queue.
    pub name: String,
    /// Number of worker slots; at most this many jobs run at once.
    pub concurrency: usize,
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
    /// Base backoff in milliseconds; retry `n` waits `n * retry_delay_ms`.
    pub retry_delay_ms: u64,
    /// Per-attempt execution limit in milliseconds.
    pub timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            concurrency: 1,
            max_retries: 3,
            retry_delay_ms: 1_000,
            timeout_ms: 30_000,
        }
    }
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Text extraction: two workers bound CPU/IO pressure, 60s covers slow OCR.
    pub fn extraction() -> Self {
        Self {
            name: "text-extraction".to_string(),
            concurrency: 2,
            max_retries: 2,
            retry_delay_ms: 1_000,
            timeout_ms: 60_000,
        }
    }

    /// Index maintenance: a single worker serializes every index mutation.
    pub fn index_maintenance() -> Self {
        Self {
            name: "search-indexing".to_string(),
            concurrency: 1,
            max_retries: 3,
            retry_delay_ms: 500,
            timeout_ms: 10_000,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("queue name must not be empty");
        }
        if self.concurrency == 0 {
            anyhow::bail!("queue {} needs at least one worker", self.name);
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("queue {} timeout must be positive", self.name);
        }
        Ok(())
    }
}

/// Where the file collection is mirrored on disk.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot path. `None` keeps the collection in memory only.
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Scores above this are not reported as matches (0 = exact).
    pub threshold: f64,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            default_limit: 20,
            max_limit: 100,
        }
    }
}

/// Top-level configuration for an [`AppContext`](crate::context::AppContext).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub extraction: QueueConfig,
    pub indexing: QueueConfig,
    pub store: StoreConfig,
    pub search: SearchConfig,
    /// Grace period for draining running jobs on shutdown.
    pub shutdown_grace_ms: u64,
    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            extraction: QueueConfig::extraction(),
            indexing: QueueConfig::index_maintenance(),
            store: StoreConfig::default(),
            search: SearchConfig::default(),
            shutdown_grace_ms: 5_000,
            event_capacity: 1_024,
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content).context("invalid service config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.extraction.validate()?;
        self.indexing.validate()?;
        if self.indexing.concurrency != 1 {
            anyhow::bail!("index maintenance must run with exactly one worker");
        }
        if self.event_capacity == 0 {
            anyhow::bail!("event capacity must be positive");
        }
        if self.search.default_limit == 0 || self.search.default_limit > self.search.max_limit {
            anyhow::bail!("search default_limit must be within 1..=max_limit");
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
