use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::{ManagedQueue, QueueStats, ShutdownReport};

/// Stats of every registered queue at one instant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub sampled_at: DateTime<Utc>,
    pub queues: HashMap<String, QueueStats>,
}

impl RegistrySnapshot {
    /// Pending jobs across all queues.
    pub fn total_queued(&self) -> usize {
        self.queues.values().map(|stats| stats.queue_length).sum()
    }

    pub fn total_running(&self) -> usize {
        self.queues.values().map(|stats| stats.running_count).sum()
    }
}

/// Named set of queues owned by one running service.
///
/// Created once at startup and handed to whatever needs it; there is no
/// global instance.
#[derive(Default)]
pub struct QueueRegistry {
    queues: parking_lot::RwLock<BTreeMap<String, Arc<dyn ManagedQueue>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a queue under its own name. Names must be unique.
    pub fn register(&self, queue: Arc<dyn ManagedQueue>) -> anyhow::Result<()> {
        let name = queue.name().to_string();
        let mut queues = self.queues.write();
        if queues.contains_key(&name) {
            anyhow::bail!("queue {name} is already registered");
        }
        tracing::debug!(queue = %name, "queue registered");
        queues.insert(name, queue);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ManagedQueue>> {
        self.queues.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.queues.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queues.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.read().is_empty()
    }

    pub fn stats(&self) -> RegistrySnapshot {
        let queues = self
            .queues
            .read()
            .iter()
            .map(|(name, queue)| (name.clone(), queue.stats()))
            .collect();
        RegistrySnapshot {
            sampled_at: Utc::now(),
            queues,
        }
    }

    /// Shut every queue down concurrently, each with the same grace period.
    ///
    /// A queue that overruns its grace period does not hold up the others.
    pub async fn shutdown_all(&self, grace: Duration) -> Vec<ShutdownReport> {
        let queues: Vec<_> = self.queues.read().values().cloned().collect();
        let reports =
            futures::future::join_all(queues.iter().map(|queue| queue.shutdown(grace))).await;

        for report in reports.iter().filter(|report| report.timed_out) {
            tracing::warn!(
                queue = %report.queue,
                abandoned = report.abandoned,
                "queue did not drain within grace period"
            );
        }
        reports
    }
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("queues", &self.names())
            .finish()
    }
}
