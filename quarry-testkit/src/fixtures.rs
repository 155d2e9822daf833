use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use quarry::*;

/// New `text/plain` upload stored under `/uploads`.
pub fn text_upload(original_name: &str, size_bytes: u64) -> NewFileRecord {
    NewFileRecord::new(
        original_name,
        "text/plain",
        size_bytes,
        PathBuf::from("/uploads").join(original_name),
    )
}

/// Upload that already carries extracted text.
pub fn text_upload_with(original_name: &str, text: &str) -> NewFileRecord {
    text_upload(original_name, text.len() as u64)
        .with_text(text)
        .with_metadata(FileMetadata::Text(TextMetadata::from_text(text)))
}

/// Extractor serving canned text per path, for any MIME type it was told about.
#[derive(Default)]
pub struct StubExtractor {
    texts: Mutex<HashMap<PathBuf, String>>,
    mime_types: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl StubExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mime_type(self, mime_type: &str) -> Self {
        self.mime_types.lock().push(mime_type.to_string());
        self
    }

    pub fn with_text(self, path: impl Into<PathBuf>, text: &str) -> Self {
        self.texts.lock().insert(path.into(), text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for StubExtractor {
    fn name(&self) -> &str {
        "stub"
    }

    fn supports(&self, mime_type: &str) -> bool {
        self.mime_types.lock().iter().any(|m| m == mime_type)
    }

    async fn extract(&self, path: &Path, mime_type: &str) -> Result<ExtractedText, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.supports(mime_type) {
            return Err(ExtractError::UnsupportedFormat {
                mime_type: mime_type.to_string(),
            });
        }
        let text = self
            .texts
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| ExtractError::permanent(format!("{} not found", path.display())))?;
        Ok(ExtractedText {
            metadata: FileMetadata::Text(TextMetadata::from_text(&text)),
            text,
        })
    }
}

/// In-memory storage whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    failing: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<FileRecord> {
        self.inner.records()
    }
}

#[async_trait]
impl DurableStorage for FlakyStorage {
    async fn load_snapshot(&self) -> anyhow::Result<Vec<FileRecord>> {
        self.inner.load_snapshot().await
    }

    async fn save_snapshot(&self, records: &[FileRecord]) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.save_snapshot(records).await
    }
}
