use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::error::JobError;
use crate::events::EventPublisher;
use crate::job::{Job, JobContext, JobHandle, JobOptions};
use crate::pipeline::PipelineKind;
use crate::queue::{JobHandler, JobQueue};
use crate::record::FileId;
use crate::search::{RebuildOutcome, SearchIndex};
use crate::store::FileCollection;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexAction {
    Add,
    Update,
    Remove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexJob {
    pub file_id: FileId,
    pub action: IndexAction,
}

impl Job for IndexJob {
    type Kind = PipelineKind;

    fn kind(&self) -> PipelineKind {
        PipelineKind::Index
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexOutcome {
    pub file_id: FileId,
    pub action: IndexAction,
    pub rebuild: RebuildOutcome,
    /// Generation being served once the job finished.
    pub generation: u64,
}

/// Applies index mutations by rebuilding from the collection when dirty.
pub struct IndexHandler {
    collection: Arc<FileCollection>,
    index: Arc<SearchIndex>,
}

impl IndexHandler {
    pub fn new(collection: Arc<FileCollection>, index: Arc<SearchIndex>) -> Self {
        Self { collection, index }
    }
}

#[async_trait]
impl JobHandler<IndexJob> for IndexHandler {
    type Output = IndexOutcome;

    async fn handle(&self, job: &IndexJob, ctx: JobContext) -> Result<IndexOutcome, JobError> {
        let present = self.collection.contains(job.file_id);
        match job.action {
            IndexAction::Add | IndexAction::Update if !present => {
                // Deleted before we got to it. The delete's own job rebuilds.
                return Err(JobError::Permanent(format!(
                    "file {} no longer exists; nothing to {:?}",
                    job.file_id, job.action
                )));
            }
            IndexAction::Remove if present => {
                tracing::debug!(file_id = %job.file_id, "remove job for a record that still exists");
            }
            _ => {}
        }

        let rebuild = self.index.rebuild_if_needed(self.collection.as_ref()).await?;
        tracing::debug!(
            file_id = %job.file_id,
            action = ?job.action,
            attempt = ctx.attempt,
            ?rebuild,
            "index job applied"
        );
        Ok(IndexOutcome {
            file_id: job.file_id,
            action: job.action,
            rebuild,
            generation: self.index.generation(),
        })
    }
}

/// Single-worker queue serializing every index mutation.
pub struct IndexPipeline {
    queue: Arc<JobQueue<IndexJob, IndexHandler>>,
}

impl IndexPipeline {
    pub fn start(
        config: QueueConfig,
        collection: Arc<FileCollection>,
        index: Arc<SearchIndex>,
        events: Arc<dyn EventPublisher>,
    ) -> anyhow::Result<Self> {
        if config.concurrency != 1 {
            anyhow::bail!(
                "index maintenance must run with exactly one worker, got {}",
                config.concurrency
            );
        }
        let handler = Arc::new(IndexHandler::new(collection, index));
        let queue = JobQueue::start(config, handler, events)?;
        Ok(Self { queue })
    }

    pub fn queue(&self) -> &Arc<JobQueue<IndexJob, IndexHandler>> {
        &self.queue
    }

    pub fn enqueue(
        &self,
        file_id: FileId,
        action: IndexAction,
    ) -> Result<JobHandle<IndexOutcome>, JobError> {
        self.queue.enqueue(IndexJob { file_id, action }, JobOptions::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::events::InProcEventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn pipeline() -> (IndexPipeline, Arc<SearchIndex>) {
        let events = Arc::new(InProcEventBus::default());
        let index = Arc::new(SearchIndex::new(SearchConfig::default(), events.clone()));
        let pipeline = IndexPipeline::start(
            QueueConfig::index_maintenance(),
            Arc::new(FileCollection::new()),
            Arc::clone(&index),
            events,
        )
        .unwrap();
        (pipeline, index)
    }

    #[tokio::test]
    async fn test_add_for_missing_record_fails_permanently() {
        let (pipeline, index) = pipeline();
        index.mark_dirty();

        let err = pipeline
            .enqueue(FileId::new(), IndexAction::Add)
            .unwrap()
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Permanent(_)));
        // The pending change is left for the next job.
        assert!(index.is_dirty());
    }

    #[tokio::test]
    async fn test_remove_rebuilds_dirty_index() {
        let (pipeline, index) = pipeline();
        index.mark_dirty();

        let outcome = pipeline
            .enqueue(FileId::new(), IndexAction::Remove)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(
            outcome.rebuild,
            RebuildOutcome::Rebuilt {
                generation: 1,
                documents: 0
            }
        );
        assert_eq!(outcome.generation, 1);
    }

    /// Counts how many `IndexHandler::handle` calls overlap.
    struct OverlapTracking {
        inner: IndexHandler,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler<IndexJob> for OverlapTracking {
        type Output = IndexOutcome;

        async fn handle(&self, job: &IndexJob, ctx: JobContext) -> Result<IndexOutcome, JobError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
            let result = self.inner.handle(job, ctx).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutation_burst_never_overlaps_handlers() {
        let events = Arc::new(InProcEventBus::default());
        let index = Arc::new(SearchIndex::new(SearchConfig::default(), events.clone()));
        let handler = Arc::new(OverlapTracking {
            inner: IndexHandler::new(Arc::new(FileCollection::new()), Arc::clone(&index)),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let queue = JobQueue::start(QueueConfig::index_maintenance(), handler.clone(), events)
            .unwrap();

        let submitters: Vec<_> = (0..20)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let index = Arc::clone(&index);
                tokio::spawn(async move {
                    index.mark_dirty();
                    let job = IndexJob {
                        file_id: FileId::new(),
                        action: IndexAction::Remove,
                    };
                    queue.enqueue(job, JobOptions::new()).unwrap().await
                })
            })
            .collect();
        for submitter in futures::future::join_all(submitters).await {
            assert!(submitter.unwrap().is_ok());
        }

        assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
        assert!(!index.is_dirty());
        queue.shutdown(Duration::from_secs(1)).await;
    }

    #[test]
    fn test_parallel_index_queue_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _enter = runtime.enter();
        let events = Arc::new(InProcEventBus::default());
        let result = IndexPipeline::start(
            QueueConfig::index_maintenance().with_concurrency(2),
            Arc::new(FileCollection::new()),
            Arc::new(SearchIndex::new(SearchConfig::default(), events.clone())),
            events,
        );
        assert!(result.is_err());
    }
}
