use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExtractError;
use crate::record::{FileMetadata, TextMetadata};

/// Text and provenance produced from one file.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub metadata: FileMetadata,
}

/// Reads the text out of a stored file.
///
/// PDF and OCR readers live outside this crate and plug in through this
/// trait. Failures say whether another attempt could help.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, mime_type: &str) -> bool;

    async fn extract(&self, path: &Path, mime_type: &str) -> Result<ExtractedText, ExtractError>;
}

/// Extractor for `text/*` and common structured-text formats.
#[derive(Clone, Debug)]
pub struct PlainTextExtractor {
    max_bytes: u64,
}

impl PlainTextExtractor {
    const STRUCTURED: [&'static str; 4] = [
        "application/json",
        "application/xml",
        "application/x-yaml",
        "application/toml",
    ];

    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    fn name(&self) -> &str {
        "plain-text"
    }

    fn supports(&self, mime_type: &str) -> bool {
        let mime = mime_type.to_ascii_lowercase();
        let essence = mime.split(';').next().unwrap_or_default().trim();
        essence.starts_with("text/") || Self::STRUCTURED.contains(&essence)
    }

    async fn extract(&self, path: &Path, mime_type: &str) -> Result<ExtractedText, ExtractError> {
        if !self.supports(mime_type) {
            return Err(ExtractError::UnsupportedFormat {
                mime_type: mime_type.to_string(),
            });
        }

        let metadata = tokio::fs::metadata(path).await.map_err(|err| io_error(path, err))?;
        if metadata.len() > self.max_bytes {
            return Err(ExtractError::permanent(format!(
                "{} is {} bytes, over the {} byte limit",
                path.display(),
                metadata.len(),
                self.max_bytes
            )));
        }

        let bytes = tokio::fs::read(path).await.map_err(|err| io_error(path, err))?;
        let text = String::from_utf8(bytes).map_err(|_| {
            ExtractError::permanent(format!("{} is not valid UTF-8", path.display()))
        })?;

        Ok(ExtractedText {
            metadata: FileMetadata::Text(TextMetadata::from_text(&text)),
            text,
        })
    }
}

/// Missing or unreadable files will not get better; anything else might.
fn io_error(path: &Path, err: std::io::Error) -> ExtractError {
    let message = format!("reading {}: {err}", path.display());
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidData => {
            ExtractError::permanent(message)
        }
        _ => ExtractError::transient(message),
    }
}

/// Routes each file to the first registered extractor that supports its MIME type.
#[derive(Clone, Default)]
pub struct ExtractorSet {
    extractors: Vec<Arc<dyn TextExtractor>>,
}

impl ExtractorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding only [`PlainTextExtractor`].
    pub fn plain_text() -> Self {
        Self::new().with(Arc::new(PlainTextExtractor::default()))
    }

    pub fn with(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.push(extractor);
        self
    }

    pub fn push(&mut self, extractor: Arc<dyn TextExtractor>) {
        self.extractors.push(extractor);
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    fn route(&self, mime_type: &str) -> Option<&Arc<dyn TextExtractor>> {
        self.extractors.iter().find(|e| e.supports(mime_type))
    }
}

impl std::fmt::Debug for ExtractorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.extractors.iter().map(|e| e.name()))
            .finish()
    }
}

#[async_trait]
impl TextExtractor for ExtractorSet {
    fn name(&self) -> &str {
        "extractor-set"
    }

    fn supports(&self, mime_type: &str) -> bool {
        self.route(mime_type).is_some()
    }

    async fn extract(&self, path: &Path, mime_type: &str) -> Result<ExtractedText, ExtractError> {
        match self.route(mime_type) {
            Some(extractor) => {
                tracing::debug!(extractor = extractor.name(), mime_type, "routing extraction");
                extractor.extract(path, mime_type).await
            }
            None => Err(ExtractError::UnsupportedFormat {
                mime_type: mime_type.to_string(),
            }),
        }
    }
}
