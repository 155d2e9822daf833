/// Snapshot-swapping index with coalesced rebuilds.
pub mod index;
/// Term scoring and tokenization.
pub mod matcher;
/// Query, filter and result-page types.
pub mod query;

pub use index::{IndexSnapshot, RebuildOutcome, RecordSource, SearchIndex};
pub use matcher::{FuzzyMatcher, Highlight, SearchField};
pub use query::{FileSummary, Pagination, SearchFilters, SearchHit, SearchPage, SearchQuery};
