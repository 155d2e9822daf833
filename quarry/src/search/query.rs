use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::record::{FileId, FileRecord};
use crate::search::matcher::Highlight;

/// Restrictions applied before scoring. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Exact MIME type, compared case-insensitively.
    pub mime_type: Option<String>,
    /// MIME prefix such as `image/`.
    pub mime_prefix: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub uploaded_after: Option<DateTime<Utc>>,
    pub uploaded_before: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn mime_type(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: Some(mime_type.into()),
            ..Self::default()
        }
    }

    pub fn mime_prefix(prefix: impl Into<String>) -> Self {
        Self {
            mime_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn with_size_range(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    pub fn with_upload_window(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.uploaded_after = after;
        self.uploaded_before = before;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SearchError> {
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                return Err(SearchError::InvalidQuery(format!(
                    "min_size {min} exceeds max_size {max}"
                )));
            }
        }
        if let (Some(after), Some(before)) = (self.uploaded_after, self.uploaded_before) {
            if after > before {
                return Err(SearchError::InvalidQuery(
                    "uploaded_after is later than uploaded_before".into(),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn matches(&self, file: &FileSummary) -> bool {
        if let Some(mime) = &self.mime_type {
            if !file.mime_type.eq_ignore_ascii_case(mime) {
                return false;
            }
        }
        if let Some(prefix) = &self.mime_prefix {
            if !file
                .mime_type
                .to_ascii_lowercase()
                .starts_with(&prefix.to_ascii_lowercase())
            {
                return false;
            }
        }
        if self.min_size.is_some_and(|min| file.size_bytes < min)
            || self.max_size.is_some_and(|max| file.size_bytes > max)
        {
            return false;
        }
        if self.uploaded_after.is_some_and(|after| file.uploaded_at < after)
            || self.uploaded_before.is_some_and(|before| file.uploaded_at > before)
        {
            return false;
        }
        true
    }
}

/// 1-based page selection. `limit: None` uses the configured default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: Option<usize>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: None,
        }
    }
}

impl Pagination {
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page,
            limit: Some(limit),
        }
    }

    pub(crate) fn resolve(&self, default_limit: usize, max_limit: usize) -> Result<(usize, usize), SearchError> {
        if self.page == 0 {
            return Err(SearchError::InvalidQuery("page numbers start at 1".into()));
        }
        let limit = self.limit.unwrap_or(default_limit);
        if limit == 0 || limit > max_limit {
            return Err(SearchError::InvalidQuery(format!(
                "limit must be between 1 and {max_limit}"
            )));
        }
        Ok((self.page, limit))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub term: String,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub pagination: Pagination,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Self::default()
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn page(mut self, page: usize, limit: usize) -> Self {
        self.pagination = Pagination::new(page, limit);
        self
    }
}

/// The parts of a record a result list needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: FileId,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
    pub title: Option<String>,
    pub author: Option<String>,
}

impl From<&FileRecord> for FileSummary {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: record.id,
            filename: record.filename.clone(),
            original_name: record.original_name.clone(),
            mime_type: record.mime_type.clone(),
            size_bytes: record.size_bytes,
            uploaded_at: record.uploaded_at,
            title: record.metadata.title().map(str::to_string),
            author: record.metadata.author().map(str::to_string),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub file: FileSummary,
    /// Lower is better; 0 is an exact match on every term.
    pub score: f64,
    pub highlights: Vec<Highlight>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub results: Vec<SearchHit>,
    /// Matches across all pages.
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
    /// Index generation the page was served from.
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(mime: &str, size: u64) -> FileSummary {
        FileSummary {
            id: FileId::new(),
            filename: "f".into(),
            original_name: "f".into(),
            mime_type: mime.into(),
            size_bytes: size,
            uploaded_at: Utc::now(),
            title: None,
            author: None,
        }
    }

    #[test]
    fn test_mime_filters() {
        let png = summary("image/PNG", 10);
        assert!(SearchFilters::mime_prefix("image/").matches(&png));
        assert!(SearchFilters::mime_type("image/png").matches(&png));
        assert!(!SearchFilters::mime_type("application/pdf").matches(&png));
    }

    #[test]
    fn test_size_range_is_inclusive() {
        let file = summary("text/plain", 100);
        let filters = SearchFilters::default().with_size_range(Some(100), Some(100));
        assert!(filters.matches(&file));
        let filters = SearchFilters::default().with_size_range(Some(101), None);
        assert!(!filters.matches(&file));
    }

    #[test]
    fn test_inverted_ranges_rejected() {
        let filters = SearchFilters::default().with_size_range(Some(10), Some(1));
        assert!(filters.validate().is_err());
    }

    #[test]
    fn test_upload_window_is_inclusive() {
        let start = Utc::now();
        let end = start + chrono::Duration::hours(1);
        let uploaded = |at: DateTime<Utc>| FileSummary {
            uploaded_at: at,
            ..summary("text/plain", 1)
        };
        let filters = SearchFilters::default().with_upload_window(Some(start), Some(end));
        assert!(filters.validate().is_ok());

        assert!(!filters.matches(&uploaded(start - chrono::Duration::seconds(1))));
        assert!(filters.matches(&uploaded(start)));
        assert!(filters.matches(&uploaded(start + chrono::Duration::minutes(30))));
        assert!(filters.matches(&uploaded(end)));
        assert!(!filters.matches(&uploaded(end + chrono::Duration::seconds(1))));

        // Open-ended on one side.
        let since = SearchFilters::default().with_upload_window(Some(end), None);
        assert!(since.matches(&uploaded(end + chrono::Duration::days(30))));
        assert!(!since.matches(&uploaded(start)));
    }

    #[test]
    fn test_inverted_upload_window_rejected() {
        let now = Utc::now();
        let filters = SearchFilters::default()
            .with_upload_window(Some(now), Some(now - chrono::Duration::minutes(1)));
        assert!(matches!(filters.validate(), Err(SearchError::InvalidQuery(_))));
    }

    #[test]
    fn test_pagination_bounds() {
        assert_eq!(Pagination::default().resolve(20, 100).unwrap(), (1, 20));
        assert!(Pagination::new(0, 10).resolve(20, 100).is_err());
        assert!(Pagination::new(1, 0).resolve(20, 100).is_err());
        assert!(Pagination::new(1, 101).resolve(20, 100).is_err());
    }
}
