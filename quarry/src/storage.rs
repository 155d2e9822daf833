use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;

use crate::record::FileRecord;

/// Durable mirror of the file collection.
///
/// The store writes a full snapshot after every committed mutation and
/// reads it back once at startup.
#[async_trait]
pub trait DurableStorage: Send + Sync {
    async fn load_snapshot(&self) -> anyhow::Result<Vec<FileRecord>>;

    async fn save_snapshot(&self, records: &[FileRecord]) -> anyhow::Result<()>;
}

/// Snapshot kept as one pretty-printed JSON array on disk.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash mid-write leaves the previous snapshot intact.
#[derive(Clone, Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl DurableStorage for JsonFileStorage {
    async fn load_snapshot(&self) -> anyhow::Result<Vec<FileRecord>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no snapshot yet; starting empty");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding snapshot {}", self.path.display()))
    }

    async fn save_snapshot(&self, records: &[FileRecord]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(records).context("encoding snapshot")?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json)
            .await
            .with_context(|| format!("writing {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// Snapshot held in memory; for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: parking_lot::Mutex<Vec<FileRecord>>,
    saves: std::sync::atomic::AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<FileRecord>) -> Self {
        Self {
            records: parking_lot::Mutex::new(records),
            ..Self::default()
        }
    }

    /// Number of snapshots written so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<FileRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl DurableStorage for MemoryStorage {
    async fn load_snapshot(&self) -> anyhow::Result<Vec<FileRecord>> {
        Ok(self.records.lock().clone())
    }

    async fn save_snapshot(&self, records: &[FileRecord]) -> anyhow::Result<()> {
        *self.records.lock() = records.to_vec();
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewFileRecord;
    use chrono::Utc;

    fn record(name: &str) -> FileRecord {
        NewFileRecord::new(name, "text/plain", 4, format!("/data/{name}"))
            .with_text("body")
            .into_record(Utc::now())
            .unwrap()
    }

    #[tokio::test]
    async fn test_json_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("nested/files.json"));

        assert!(storage.load_snapshot().await.unwrap().is_empty());

        let records = vec![record("a.txt"), record("b.txt")];
        storage.save_snapshot(&records).await.unwrap();

        assert_eq!(storage.load_snapshot().await.unwrap(), records);
        assert!(!storage.temp_path().exists());
    }

    #[tokio::test]
    async fn test_json_storage_rejects_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = JsonFileStorage::new(&path).load_snapshot().await.unwrap_err();
        assert!(format!("{err:#}").contains("decoding snapshot"));
    }

    #[tokio::test]
    async fn test_memory_storage_counts_saves() {
        let storage = MemoryStorage::new();
        storage.save_snapshot(&[record("a.txt")]).await.unwrap();
        storage.save_snapshot(&[]).await.unwrap();
        assert_eq!(storage.save_count(), 2);
        assert!(storage.records().is_empty());
    }
}
