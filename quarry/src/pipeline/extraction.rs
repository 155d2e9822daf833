use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::error::JobError;
use crate::events::EventPublisher;
use crate::extract::{ExtractedText, TextExtractor};
use crate::job::{Job, JobContext, JobHandle, JobOptions};
use crate::pipeline::PipelineKind;
use crate::queue::{JobHandler, JobQueue};
use crate::record::FileId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub file_path: PathBuf,
    pub mime_type: String,
    pub file_id: FileId,
}

impl Job for ExtractionJob {
    type Kind = PipelineKind;

    fn kind(&self) -> PipelineKind {
        PipelineKind::Extraction
    }

    fn validate(&self) -> Result<(), JobError> {
        if self.file_path.as_os_str().is_empty() {
            return Err(JobError::Validation("extraction job needs a file path".into()));
        }
        if self.mime_type.trim().is_empty() {
            return Err(JobError::Validation("extraction job needs a MIME type".into()));
        }
        Ok(())
    }
}

pub struct ExtractionHandler {
    extractor: Arc<dyn TextExtractor>,
}

impl ExtractionHandler {
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl JobHandler<ExtractionJob> for ExtractionHandler {
    type Output = ExtractedText;

    async fn handle(&self, job: &ExtractionJob, ctx: JobContext) -> Result<ExtractedText, JobError> {
        tracing::debug!(
            file_id = %job.file_id,
            path = %job.file_path.display(),
            mime_type = %job.mime_type,
            attempt = ctx.attempt,
            "extracting text"
        );
        let extracted = self
            .extractor
            .extract(&job.file_path, &job.mime_type)
            .await
            .map_err(JobError::from)?;
        tracing::debug!(
            file_id = %job.file_id,
            chars = extracted.text.len(),
            "text extracted"
        );
        Ok(extracted)
    }
}

/// Queue turning stored files into text, two at a time by default.
pub struct ExtractionPipeline {
    queue: Arc<JobQueue<ExtractionJob, ExtractionHandler>>,
    extractor: Arc<dyn TextExtractor>,
}

impl ExtractionPipeline {
    pub fn start(
        config: QueueConfig,
        extractor: Arc<dyn TextExtractor>,
        events: Arc<dyn EventPublisher>,
    ) -> anyhow::Result<Self> {
        let handler = Arc::new(ExtractionHandler::new(Arc::clone(&extractor)));
        let queue = JobQueue::start(config, handler, events)?;
        Ok(Self { queue, extractor })
    }

    pub fn queue(&self) -> &Arc<JobQueue<ExtractionJob, ExtractionHandler>> {
        &self.queue
    }

    /// Schedule extraction. A MIME type no extractor supports can never
    /// succeed, so that job runs once with no retries.
    pub fn enqueue(
        &self,
        file_path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
        file_id: FileId,
    ) -> Result<JobHandle<ExtractedText>, JobError> {
        let job = ExtractionJob {
            file_path: file_path.into(),
            mime_type: mime_type.into(),
            file_id,
        };
        let mut options = JobOptions::new();
        if !self.extractor.supports(&job.mime_type) {
            tracing::debug!(file_id = %file_id, mime_type = %job.mime_type, "no extractor; queueing without retries");
            options = options.with_max_retries(0);
        }
        self.enqueue_with(job, options)
    }

    pub fn enqueue_with(
        &self,
        job: ExtractionJob,
        options: JobOptions,
    ) -> Result<JobHandle<ExtractedText>, JobError> {
        self.queue.enqueue(job, options)
    }
}
