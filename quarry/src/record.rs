use std::fmt::{self, Display};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provenance details for extracted text, keyed by the kind of source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileMetadata {
    /// Nothing extracted yet.
    #[default]
    Pending,
    Text(TextMetadata),
    Document(DocumentMetadata),
    Image(ImageMetadata),
    /// Extraction gave up; `permanent` distinguishes bad input from exhausted retries.
    Failed { reason: String, permanent: bool },
}

impl FileMetadata {
    pub fn title(&self) -> Option<&str> {
        match self {
            FileMetadata::Document(doc) => doc.title.as_deref(),
            _ => None,
        }
    }

    pub fn author(&self) -> Option<&str> {
        match self {
            FileMetadata::Document(doc) => doc.author.as_deref(),
            _ => None,
        }
    }

    pub fn word_count(&self) -> Option<usize> {
        match self {
            FileMetadata::Text(text) => Some(text.word_count),
            FileMetadata::Document(doc) => doc.word_count,
            FileMetadata::Image(image) => Some(image.word_count),
            FileMetadata::Pending | FileMetadata::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FileMetadata::Failed { .. })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMetadata {
    pub word_count: usize,
    pub line_count: usize,
    pub char_count: usize,
}

impl TextMetadata {
    pub fn from_text(text: &str) -> Self {
        Self {
            word_count: text.split_whitespace().count(),
            line_count: text.lines().count(),
            char_count: text.chars().count(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: Option<u32>,
    pub word_count: Option<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub ocr_engine: String,
    /// Mean recognition confidence in `0.0..=1.0`.
    pub confidence: f32,
    pub word_count: usize,
}

/// The searchable unit: one uploaded file and what was extracted from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    /// System-assigned storage name.
    pub filename: String,
    /// Name supplied by the uploader.
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub path: PathBuf,
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub metadata: FileMetadata,
    pub uploaded_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

impl FileRecord {
    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        require("filename", &self.filename)?;
        require("original_name", &self.original_name)?;
        require("mime_type", &self.mime_type)?;
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::Validation("path must not be empty".into()));
        }
        Ok(())
    }
}

/// Fields supplied when a file is first stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewFileRecord {
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub path: PathBuf,
    #[serde(default)]
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub metadata: FileMetadata,
}

impl NewFileRecord {
    pub fn new(
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
        path: impl Into<PathBuf>,
    ) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            filename,
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            size_bytes,
            path,
            extracted_text: None,
            metadata: FileMetadata::Pending,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.extracted_text = Some(text.into());
        self
    }

    pub fn with_metadata(mut self, metadata: FileMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn into_record(self, now: DateTime<Utc>) -> Result<FileRecord, StoreError> {
        let record = FileRecord {
            id: FileId::new(),
            filename: self.filename,
            original_name: self.original_name,
            mime_type: self.mime_type,
            size_bytes: self.size_bytes,
            path: self.path,
            extracted_text: self.extracted_text,
            metadata: self.metadata,
            uploaded_at: now,
            last_modified_at: now,
        };
        record.validate()?;
        Ok(record)
    }
}

/// A partial change applied by [`FileStore::update`](crate::store::FileStore::update).
///
/// Identity, original name and upload time are immutable and not part of it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileUpdate {
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub path: Option<PathBuf>,
    pub extracted_text: Option<String>,
    pub metadata: Option<FileMetadata>,
}

impl FileUpdate {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            extracted_text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn metadata(metadata: FileMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub(crate) fn apply(self, record: &mut FileRecord, now: DateTime<Utc>) {
        if let Some(filename) = self.filename {
            record.filename = filename;
        }
        if let Some(mime_type) = self.mime_type {
            record.mime_type = mime_type;
        }
        if let Some(size_bytes) = self.size_bytes {
            record.size_bytes = size_bytes;
        }
        if let Some(path) = self.path {
            record.path = path;
        }
        if let Some(text) = self.extracted_text {
            record.extracted_text = Some(text);
        }
        if let Some(metadata) = self.metadata {
            record.metadata = metadata;
        }
        record.last_modified_at = now;
    }
}

fn require(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}
