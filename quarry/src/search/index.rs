use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::events::{EventPublisher, IndexEvent};
use crate::record::FileRecord;
use crate::search::matcher::{query_terms, tokenize, FieldTokens, FuzzyMatcher, SearchField};
use crate::search::query::{FileSummary, SearchHit, SearchPage, SearchQuery};
use crate::telemetry;

const MAX_QUERY_TERMS: usize = 32;

/// The records an index is built from, in insertion order.
pub trait RecordSource: Send + Sync {
    fn records(&self) -> Vec<FileRecord>;
}

/// Result of [`SearchIndex::rebuild_if_needed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// Nothing changed since the last build.
    Clean,
    /// Another caller's rebuild is in flight and will pick the change up.
    Coalesced,
    Rebuilt { generation: u64, documents: usize },
}

struct IndexedDocument {
    summary: FileSummary,
    fields: Vec<FieldTokens>,
}

impl IndexedDocument {
    fn from_record(record: &FileRecord) -> Self {
        let mut fields = Vec::with_capacity(4);
        let mut push = |field, text: Option<&str>| {
            if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
                fields.push(FieldTokens {
                    field,
                    tokens: tokenize(text),
                });
            }
        };
        push(SearchField::Text, record.extracted_text.as_deref());
        push(SearchField::OriginalName, Some(record.original_name.as_str()));
        push(SearchField::Title, record.metadata.title());
        push(SearchField::Author, record.metadata.author());

        Self {
            summary: FileSummary::from(record),
            fields,
        }
    }
}

/// One fully built, immutable view of the collection.
pub struct IndexSnapshot {
    generation: u64,
    built_at: DateTime<Utc>,
    documents: Vec<IndexedDocument>,
}

impl IndexSnapshot {
    fn empty() -> Self {
        Self {
            generation: 0,
            built_at: Utc::now(),
            documents: Vec::new(),
        }
    }

    fn build(generation: u64, records: Vec<FileRecord>) -> Self {
        Self {
            generation,
            built_at: Utc::now(),
            documents: records.iter().map(IndexedDocument::from_record).collect(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Clears the in-flight flag on every exit path. If a rebuild was claimed
/// but never finished (error or cancellation), the index is marked dirty
/// again so the change is not lost.
struct InFlight<'a> {
    index: &'a SearchIndex,
    claimed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.claimed {
            self.index.dirty.store(true, Ordering::SeqCst);
        }
        self.index.rebuilding.store(false, Ordering::SeqCst);
    }
}

/// In-memory fuzzy index over the file collection.
///
/// Readers always see the last complete snapshot. Rebuilds run one at a
/// time; a request arriving while one is in flight only leaves the index
/// dirty, and the running rebuild loops until no change is outstanding.
pub struct SearchIndex {
    snapshot: parking_lot::RwLock<Arc<IndexSnapshot>>,
    dirty: AtomicBool,
    rebuilding: AtomicBool,
    generation: AtomicU64,
    matcher: FuzzyMatcher,
    config: SearchConfig,
    events: Arc<dyn EventPublisher>,
}

impl SearchIndex {
    pub fn new(config: SearchConfig, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            snapshot: parking_lot::RwLock::new(Arc::new(IndexSnapshot::empty())),
            dirty: AtomicBool::new(false),
            rebuilding: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            matcher: FuzzyMatcher::new(config.threshold),
            config,
            events,
        }
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::SeqCst)
    }

    /// The snapshot queries are currently served from.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.read().generation
    }

    /// Rebuild from `source` if the index is dirty and no rebuild is running.
    pub async fn rebuild_if_needed(
        &self,
        source: &dyn RecordSource,
    ) -> Result<RebuildOutcome, SearchError> {
        let mut last = None;
        loop {
            if !self.is_dirty() {
                return Ok(last.unwrap_or(RebuildOutcome::Clean));
            }
            if self
                .rebuilding
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                tracing::debug!("index rebuild already in flight; coalescing");
                return Ok(last.unwrap_or(RebuildOutcome::Coalesced));
            }

            let mut guard = InFlight {
                index: self,
                claimed: false,
            };
            while self.dirty.swap(false, Ordering::SeqCst) {
                guard.claimed = true;
                match self.rebuild_once(source).await {
                    Ok(outcome) => {
                        guard.claimed = false;
                        last = Some(outcome);
                    }
                    Err(err) => {
                        telemetry::record_index_rebuild_failed(err.to_string());
                        self.events.publish_index(IndexEvent::RebuildFailed {
                            error: err.to_string(),
                            timestamp: Utc::now(),
                        });
                        return Err(err);
                    }
                }
            }
            drop(guard);
            // A caller may have marked the index dirty and coalesced between
            // our last swap and releasing the flag; the loop picks that up.
        }
    }

    async fn rebuild_once(&self, source: &dyn RecordSource) -> Result<RebuildOutcome, SearchError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let span = telemetry::index_rebuild_span(generation);
        let started = Instant::now();

        let records = source.records();
        let snapshot = tokio::task::spawn_blocking(move || IndexSnapshot::build(generation, records))
            .instrument(span)
            .await
            .map_err(|err| SearchError::Rebuild(format!("index build task failed: {err}")))?;

        let documents = snapshot.len();
        *self.snapshot.write() = Arc::new(snapshot);

        let duration = started.elapsed();
        telemetry::record_index_rebuild(generation, documents, duration);
        self.events.publish_index(IndexEvent::Rebuilt {
            generation,
            documents,
            duration,
            timestamp: Utc::now(),
        });
        Ok(RebuildOutcome::Rebuilt {
            generation,
            documents,
        })
    }

    /// Rank the current snapshot against `query`.
    ///
    /// Results are ordered by score ascending, ties by insertion order, then
    /// sliced by the requested page. An empty term lists every record that
    /// passes the filters with score 0.
    pub fn query(&self, query: &SearchQuery) -> Result<SearchPage, SearchError> {
        let (page, limit) = query
            .pagination
            .resolve(self.config.default_limit, self.config.max_limit)?;
        query.filters.validate()?;
        let terms = query_terms(&query.term);
        if terms.len() > MAX_QUERY_TERMS {
            return Err(SearchError::InvalidQuery(format!(
                "at most {MAX_QUERY_TERMS} terms are supported"
            )));
        }

        let snapshot = self.snapshot();
        let mut hits: Vec<(f64, usize, SearchHit)> = snapshot
            .documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| query.filters.matches(&doc.summary))
            .filter_map(|(position, doc)| {
                let (score, highlights) = if terms.is_empty() {
                    (0.0, Vec::new())
                } else {
                    let hit = self.matcher.score_document(&terms, &doc.fields)?;
                    (hit.score, hit.highlights)
                };
                Some((
                    score,
                    position,
                    SearchHit {
                        file: doc.summary.clone(),
                        score,
                        highlights,
                    },
                ))
            })
            .collect();

        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let total = hits.len();
        let results = hits
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .map(|(_, _, hit)| hit)
            .collect();

        Ok(SearchPage {
            results,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
            generation: snapshot.generation,
        })
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex")
            .field("generation", &self.generation())
            .field("documents", &self.snapshot.read().len())
            .field("dirty", &self.is_dirty())
            .field("rebuilding", &self.is_rebuilding())
            .finish()
    }
}
