use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::error::StoreError;
use crate::job::JobHandle;
use crate::pipeline::{IndexAction, IndexOutcome, IndexPipeline};
use crate::record::{FileId, FileMetadata, FileRecord, FileUpdate, NewFileRecord};
use crate::search::{RecordSource, SearchIndex};
use crate::storage::DurableStorage;

struct Entry {
    seq: u64,
    record: FileRecord,
}

/// The authoritative in-memory map of file records.
///
/// Mutation is crate-private: outside callers change records through
/// [`FileStore`], which persists and schedules indexing.
#[derive(Default)]
pub struct FileCollection {
    inner: parking_lot::RwLock<CollectionInner>,
}

#[derive(Default)]
struct CollectionInner {
    entries: HashMap<FileId, Entry>,
    next_seq: u64,
}

impl FileCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FileId) -> Option<FileRecord> {
        self.inner.read().entries.get(&id).map(|e| e.record.clone())
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.inner.read().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    fn find(&self, predicate: impl Fn(&FileRecord) -> bool) -> Option<FileRecord> {
        let inner = self.inner.read();
        let mut matches: Vec<&Entry> = inner.entries.values().filter(|e| predicate(&e.record)).collect();
        matches.sort_by_key(|e| e.seq);
        matches.first().map(|e| e.record.clone())
    }

    /// Records oldest first, the order the index ranks ties by.
    pub fn snapshot(&self) -> Vec<FileRecord> {
        let inner = self.inner.read();
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.record.clone()).collect()
    }

    fn insert(&self, record: FileRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.entries.contains_key(&record.id) {
            return Err(StoreError::Validation(format!("duplicate file id {}", record.id)));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(record.id, Entry { seq, record });
        Ok(())
    }

    fn replace(&self, record: FileRecord) -> bool {
        match self.inner.write().entries.get_mut(&record.id) {
            Some(entry) => {
                entry.record = record;
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: FileId) -> bool {
        self.inner.write().entries.remove(&id).is_some()
    }

    fn reset(&self, records: Vec<FileRecord>) -> Result<(), StoreError> {
        let mut inner = CollectionInner::default();
        for record in records {
            if inner.entries.contains_key(&record.id) {
                return Err(StoreError::Validation(format!(
                    "snapshot contains file id {} twice",
                    record.id
                )));
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.insert(record.id, Entry { seq, record });
        }
        *self.inner.write() = inner;
        Ok(())
    }
}

impl RecordSource for FileCollection {
    fn records(&self) -> Vec<FileRecord> {
        self.snapshot()
    }
}

/// A committed mutation plus the index job it scheduled.
///
/// `index_job` is `None` only when the index pipeline no longer accepts
/// work (it is shutting down).
#[derive(Debug)]
pub struct Indexed<T> {
    pub value: T,
    pub index_job: Option<JobHandle<IndexOutcome>>,
}

/// Persisted file collection.
///
/// Every mutation writes the would-be snapshot to durable storage first and
/// applies it to memory only once that succeeds, so a storage failure leaves
/// both sides unchanged. After the commit the search index is marked dirty
/// and an index job is enqueued; search visibility is eventual.
pub struct FileStore {
    collection: Arc<FileCollection>,
    index: Arc<SearchIndex>,
    indexing: Arc<IndexPipeline>,
    storage: Arc<dyn DurableStorage>,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(
        collection: Arc<FileCollection>,
        index: Arc<SearchIndex>,
        indexing: Arc<IndexPipeline>,
        storage: Arc<dyn DurableStorage>,
    ) -> Self {
        Self {
            collection,
            index,
            indexing,
            storage,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn collection(&self) -> &Arc<FileCollection> {
        &self.collection
    }

    /// Replace memory with the durable snapshot and rebuild the index from it.
    ///
    /// Returns the number of records loaded.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let records = self
            .storage
            .load_snapshot()
            .await
            .map_err(StoreError::Storage)?;
        for record in &records {
            record.validate()?;
        }
        let count = records.len();
        self.collection.reset(records)?;

        self.index.mark_dirty();
        if let Err(err) = self.index.rebuild_if_needed(self.collection.as_ref()).await {
            // The next index job retries the rebuild; loading still succeeded.
            tracing::warn!(error = %err, "initial index rebuild failed");
        }
        tracing::info!(records = count, "file store loaded");
        Ok(count)
    }

    pub async fn save(&self, new: NewFileRecord) -> Result<Indexed<FileRecord>, StoreError> {
        let record = new.into_record(Utc::now())?;
        {
            let _guard = self.write_lock.lock().await;
            if self.collection.contains(record.id) {
                return Err(StoreError::Validation(format!("duplicate file id {}", record.id)));
            }
            let mut snapshot = self.collection.snapshot();
            snapshot.push(record.clone());
            self.persist(&snapshot).await?;
            self.collection.insert(record.clone())?;
        }
        tracing::debug!(file_id = %record.id, name = %record.original_name, "file saved");
        Ok(self.schedule(record.id, IndexAction::Add, record))
    }

    pub fn find_by_id(&self, id: FileId) -> Option<FileRecord> {
        self.collection.get(id)
    }

    /// Look up by system filename; the oldest record wins if several share it.
    pub fn find_by_filename(&self, filename: &str) -> Option<FileRecord> {
        self.collection.find(|record| record.filename == filename)
    }

    /// Page through records, newest upload first.
    pub fn find_all(&self, limit: usize, offset: usize) -> Vec<FileRecord> {
        let mut records = self.collection.snapshot();
        records.reverse();
        // Stable sort keeps later inserts first among equal timestamps.
        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        records.into_iter().skip(offset).take(limit).collect()
    }

    pub fn count(&self) -> usize {
        self.collection.len()
    }

    pub fn exists(&self, id: FileId) -> bool {
        self.collection.contains(id)
    }

    pub fn snapshot(&self) -> Vec<FileRecord> {
        self.collection.snapshot()
    }

    pub async fn update(
        &self,
        id: FileId,
        update: FileUpdate,
    ) -> Result<Indexed<FileRecord>, StoreError> {
        let updated = {
            let _guard = self.write_lock.lock().await;
            let mut updated = self.collection.get(id).ok_or(StoreError::NotFound(id))?;
            update.apply(&mut updated, Utc::now());
            updated.validate()?;

            let snapshot: Vec<FileRecord> = self
                .collection
                .snapshot()
                .into_iter()
                .map(|record| if record.id == id { updated.clone() } else { record })
                .collect();
            self.persist(&snapshot).await?;
            if !self.collection.replace(updated.clone()) {
                return Err(StoreError::NotFound(id));
            }
            updated
        };
        tracing::debug!(file_id = %id, "file updated");
        Ok(self.schedule(id, IndexAction::Update, updated))
    }

    pub async fn update_extracted_text(
        &self,
        id: FileId,
        text: impl Into<String>,
        metadata: FileMetadata,
    ) -> Result<Indexed<FileRecord>, StoreError> {
        self.update(
            id,
            FileUpdate {
                extracted_text: Some(text.into()),
                metadata: Some(metadata),
                ..FileUpdate::default()
            },
        )
        .await
    }

    pub async fn update_metadata(
        &self,
        id: FileId,
        metadata: FileMetadata,
    ) -> Result<Indexed<FileRecord>, StoreError> {
        self.update(id, FileUpdate::metadata(metadata)).await
    }

    /// Remove a record. `value` is `false` when there was nothing to delete,
    /// in which case no index job is scheduled.
    pub async fn delete(&self, id: FileId) -> Result<Indexed<bool>, StoreError> {
        {
            let _guard = self.write_lock.lock().await;
            if !self.collection.contains(id) {
                return Ok(Indexed {
                    value: false,
                    index_job: None,
                });
            }
            let snapshot: Vec<FileRecord> = self
                .collection
                .snapshot()
                .into_iter()
                .filter(|record| record.id != id)
                .collect();
            self.persist(&snapshot).await?;
            self.collection.remove(id);
        }
        tracing::debug!(file_id = %id, "file deleted");
        Ok(self.schedule(id, IndexAction::Remove, true))
    }

    async fn persist(&self, snapshot: &[FileRecord]) -> Result<(), StoreError> {
        self.storage
            .save_snapshot(snapshot)
            .await
            .map_err(StoreError::Storage)
    }

    fn schedule<T>(&self, id: FileId, action: IndexAction, value: T) -> Indexed<T> {
        self.index.mark_dirty();
        let index_job = match self.indexing.enqueue(id, action) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(file_id = %id, ?action, error = %err, "index job not scheduled");
                None
            }
        };
        Indexed { value, index_job }
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("records", &self.collection.len())
            .field("index", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, SearchConfig};
    use crate::events::InProcEventBus;
    use crate::storage::MemoryStorage;

    struct Fixture {
        store: FileStore,
        storage: Arc<MemoryStorage>,
        index: Arc<SearchIndex>,
    }

    fn fixture_with(storage: Arc<MemoryStorage>) -> Fixture {
        let events = Arc::new(InProcEventBus::default());
        let collection = Arc::new(FileCollection::new());
        let index = Arc::new(SearchIndex::new(SearchConfig::default(), events.clone()));
        let indexing = Arc::new(
            IndexPipeline::start(
                QueueConfig::index_maintenance(),
                Arc::clone(&collection),
                Arc::clone(&index),
                events,
            )
            .unwrap(),
        );
        Fixture {
            store: FileStore::new(collection, Arc::clone(&index), indexing, storage.clone()),
            storage,
            index,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryStorage::new()))
    }

    fn new_file(name: &str) -> NewFileRecord {
        NewFileRecord::new(name, "text/plain", 12, format!("/data/{name}"))
    }

    #[tokio::test]
    async fn test_save_persists_and_schedules_index() {
        let f = fixture();
        let saved = f.store.save(new_file("a.txt")).await.unwrap();

        assert_eq!(f.storage.records(), vec![saved.value.clone()]);
        assert!(f.store.exists(saved.value.id));
        let outcome = saved.index_job.expect("index job").await.unwrap();
        assert_eq!(outcome.action, IndexAction::Add);
        assert!(!f.index.is_dirty());
    }

    #[tokio::test]
    async fn test_find_all_newest_first() {
        let f = fixture();
        let a = f.store.save(new_file("a.txt")).await.unwrap().value;
        let b = f.store.save(new_file("b.txt")).await.unwrap().value;
        let c = f.store.save(new_file("c.txt")).await.unwrap().value;

        let ids: Vec<_> = f.store.find_all(10, 0).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
        let ids: Vec<_> = f.store.find_all(1, 1).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id]);
        assert_eq!(f.store.find_by_filename("b.txt").map(|r| r.id), Some(b.id));
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let f = fixture();
        let err = f
            .store
            .update(FileId::new(), FileUpdate::text("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_text_bumps_modified_time() {
        let f = fixture();
        let saved = f.store.save(new_file("a.txt")).await.unwrap().value;
        let updated = f
            .store
            .update_extracted_text(saved.id, "hello", FileMetadata::Pending)
            .await
            .unwrap()
            .value;

        assert_eq!(updated.extracted_text.as_deref(), Some("hello"));
        assert_eq!(updated.uploaded_at, saved.uploaded_at);
        assert!(updated.last_modified_at >= saved.last_modified_at);
        assert_eq!(f.store.find_by_id(saved.id), Some(updated));
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let f = fixture();
        let saved = f.store.save(new_file("a.txt")).await.unwrap().value;

        let first = f.store.delete(saved.id).await.unwrap();
        assert!(first.value);
        assert!(first.index_job.is_some());

        let second = f.store.delete(saved.id).await.unwrap();
        assert!(!second.value);
        assert!(second.index_job.is_none());
        assert_eq!(f.store.count(), 0);
    }

    #[tokio::test]
    async fn test_load_restores_collection_and_index() {
        let first = fixture();
        let saved = first.store.save(new_file("a.txt")).await.unwrap().value;

        let reopened = fixture_with(Arc::new(MemoryStorage::with_records(
            first.storage.records(),
        )));
        assert_eq!(reopened.store.load().await.unwrap(), 1);
        assert_eq!(reopened.store.find_by_id(saved.id), Some(saved));
        assert_eq!(reopened.index.snapshot().len(), 1);
    }
}
