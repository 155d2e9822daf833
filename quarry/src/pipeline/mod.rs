use std::fmt;

use serde::{Deserialize, Serialize};

use crate::job::JobKind;

/// Text extraction queue.
pub mod extraction;
/// Serialized search-index maintenance queue.
pub mod indexing;

pub use extraction::{ExtractionHandler, ExtractionJob, ExtractionPipeline};
pub use indexing::{IndexAction, IndexHandler, IndexJob, IndexOutcome, IndexPipeline};

/// The finite set of job kinds the service runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Extraction,
    Index,
}

impl JobKind for PipelineKind {
    fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Extraction => "extraction",
            PipelineKind::Index => "index",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
