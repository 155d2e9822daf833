use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::ServiceConfig;
use crate::error::{JobError, SearchError, StoreError};
use crate::events::InProcEventBus;
use crate::extract::{ExtractedText, ExtractorSet, TextExtractor};
use crate::job::JobHandle;
use crate::pipeline::{ExtractionPipeline, IndexAction, IndexOutcome, IndexPipeline};
use crate::queue::ShutdownReport;
use crate::record::{FileId, FileMetadata, FileRecord, NewFileRecord};
use crate::registry::{QueueRegistry, RegistrySnapshot};
use crate::search::{SearchIndex, SearchPage, SearchQuery};
use crate::storage::{DurableStorage, JsonFileStorage, MemoryStorage};
use crate::store::{FileCollection, FileStore};

/// Builder for an [`AppContext`] with explicit collaborators.
///
/// Anything not provided falls back to the configuration: storage from
/// `store.snapshot_path` (in memory when unset), the plain-text extractor,
/// and an event bus sized by `event_capacity`.
///
/// # Example
///
/// ```ignore
/// let ctx = AppContextBuilder::new(ServiceConfig::default())
///     .with_storage(Arc::new(MemoryStorage::new()))
///     .with_extractor(Arc::new(ExtractorSet::plain_text()))
///     .start()
///     .await?;
/// ```
pub struct AppContextBuilder {
    config: ServiceConfig,
    storage: Option<Arc<dyn DurableStorage>>,
    extractor: Option<Arc<dyn TextExtractor>>,
    events: Option<Arc<InProcEventBus>>,
}

impl fmt::Debug for AppContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContextBuilder")
            .field("config", &self.config)
            .field("storage_set", &self.storage.is_some())
            .field("extractor_set", &self.extractor.is_some())
            .field("events_set", &self.events.is_some())
            .finish()
    }
}

impl AppContextBuilder {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            storage: None,
            extractor: None,
            events: None,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn DurableStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_events(mut self, events: Arc<InProcEventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Wire every component and start both pipelines. Does not load storage.
    pub fn build(self) -> anyhow::Result<AppContext> {
        self.config.validate()?;
        let config = self.config;

        let events = self
            .events
            .unwrap_or_else(|| Arc::new(InProcEventBus::new(config.event_capacity)));
        let storage: Arc<dyn DurableStorage> = match (self.storage, &config.store.snapshot_path) {
            (Some(storage), _) => storage,
            (None, Some(path)) => Arc::new(JsonFileStorage::new(path.clone())),
            (None, None) => Arc::new(MemoryStorage::new()),
        };
        let extractor = self
            .extractor
            .unwrap_or_else(|| Arc::new(ExtractorSet::plain_text()) as Arc<dyn TextExtractor>);

        let collection = Arc::new(FileCollection::new());
        let index = Arc::new(SearchIndex::new(config.search.clone(), events.clone()));
        let indexing = Arc::new(IndexPipeline::start(
            config.indexing.clone(),
            Arc::clone(&collection),
            Arc::clone(&index),
            events.clone(),
        )?);
        let extraction = Arc::new(ExtractionPipeline::start(
            config.extraction.clone(),
            extractor,
            events.clone(),
        )?);

        let registry = QueueRegistry::new();
        registry.register(extraction.queue().clone())?;
        registry.register(indexing.queue().clone())?;

        let store = Arc::new(FileStore::new(
            collection,
            Arc::clone(&index),
            Arc::clone(&indexing),
            storage,
        ));

        Ok(AppContext {
            config,
            events,
            registry,
            store,
            index,
            extraction,
            indexing,
        })
    }

    /// [`build`](Self::build), then load the durable snapshot and build the initial index.
    pub async fn start(self) -> anyhow::Result<AppContext> {
        let ctx = self.build()?;
        let loaded = ctx.store.load().await?;
        tracing::info!(
            records = loaded,
            queues = ?ctx.registry.names(),
            "quarry context started"
        );
        Ok(ctx)
    }
}

/// Result of [`AppContext::ingest`].
#[derive(Debug)]
pub struct Ingestion {
    pub record: FileRecord,
    /// Index job for the initial save.
    pub index_job: Option<JobHandle<IndexOutcome>>,
    /// Resolves once extraction finished and its result was written back.
    pub extraction: JoinHandle<Result<IngestOutcome, StoreError>>,
}

#[derive(Debug)]
pub enum IngestOutcome {
    Extracted {
        record: FileRecord,
        index_job: Option<JobHandle<IndexOutcome>>,
    },
    /// Extraction gave up; the record now carries [`FileMetadata::Failed`].
    Failed {
        record: FileRecord,
        error: JobError,
    },
    /// The extraction queue shut down before the job ran.
    Cancelled,
}

/// Everything one running service needs, wired once at startup.
pub struct AppContext {
    config: ServiceConfig,
    events: Arc<InProcEventBus>,
    registry: QueueRegistry,
    store: Arc<FileStore>,
    index: Arc<SearchIndex>,
    extraction: Arc<ExtractionPipeline>,
    indexing: Arc<IndexPipeline>,
}

impl AppContext {
    pub fn builder(config: ServiceConfig) -> AppContextBuilder {
        AppContextBuilder::new(config)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<InProcEventBus> {
        &self.events
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }

    pub fn enqueue_extraction(
        &self,
        file_path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
        file_id: FileId,
    ) -> Result<JobHandle<ExtractedText>, JobError> {
        self.extraction.enqueue(file_path, mime_type, file_id)
    }

    pub fn enqueue_index_mutation(
        &self,
        file_id: FileId,
        action: IndexAction,
    ) -> Result<JobHandle<IndexOutcome>, JobError> {
        self.indexing.enqueue(file_id, action)
    }

    /// Query the current index snapshot. Never waits on pending jobs.
    pub fn search(&self, query: &SearchQuery) -> Result<SearchPage, SearchError> {
        self.index.query(query)
    }

    pub fn queue_stats(&self) -> RegistrySnapshot {
        self.registry.stats()
    }

    /// Store a new file, then extract its text in the background and write
    /// the result back to the record.
    pub async fn ingest(&self, new_file: NewFileRecord) -> Result<Ingestion, StoreError> {
        let saved = self.store.save(new_file).await?;
        let record = saved.value;
        let extraction = self
            .extraction
            .enqueue(record.path.clone(), record.mime_type.clone(), record.id);

        let task = tokio::spawn(finish_ingest(Arc::clone(&self.store), record.id, extraction));

        Ok(Ingestion {
            record,
            index_job: saved.index_job,
            extraction: task,
        })
    }

    /// Shut every queue down within the configured grace period.
    pub async fn shutdown(&self) -> Vec<ShutdownReport> {
        self.shutdown_with(self.config.shutdown_grace()).await
    }

    pub async fn shutdown_with(&self, grace: Duration) -> Vec<ShutdownReport> {
        let reports = self.registry.shutdown_all(grace).await;
        tracing::info!(queues = reports.len(), "quarry context shut down");
        reports
    }
}

async fn finish_ingest(
    store: Arc<FileStore>,
    file_id: FileId,
    extraction: Result<JobHandle<ExtractedText>, JobError>,
) -> Result<IngestOutcome, StoreError> {
    let result = match extraction {
        Ok(handle) => handle.await,
        Err(err) => Err(err),
    };
    match result {
        Ok(extracted) => {
            let updated = store
                .update_extracted_text(file_id, extracted.text, extracted.metadata)
                .await?;
            Ok(IngestOutcome::Extracted {
                record: updated.value,
                index_job: updated.index_job,
            })
        }
        Err(JobError::ShutdownCancelled) => Ok(IngestOutcome::Cancelled),
        Err(error) => {
            tracing::warn!(file_id = %file_id, error = %error, "extraction failed");
            let metadata = FileMetadata::Failed {
                reason: error.to_string(),
                permanent: !error.is_retryable(),
            };
            let updated = store.update_metadata(file_id, metadata).await?;
            Ok(IngestOutcome::Failed {
                record: updated.value,
                error,
            })
        }
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("registry", &self.registry)
            .field("store", &self.store)
            .field("events", &self.events)
            .finish()
    }
}
