use std::fmt::Display;

use quarry::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TestJob {
    Simple { name: String },
    Slow { duration_ms: u64, name: String },
    Failing { error: String, name: String },
}

impl TestJob {
    pub fn simple(name: impl Into<String>) -> Self {
        TestJob::Simple { name: name.into() }
    }

    pub fn slow(name: impl Into<String>, duration_ms: u64) -> Self {
        TestJob::Slow {
            duration_ms,
            name: name.into(),
        }
    }

    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        TestJob::Failing {
            error: error.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TestJob::Simple { name } | TestJob::Slow { name, .. } | TestJob::Failing { name, .. } => {
                name
            }
        }
    }
}

impl Job for TestJob {
    type Kind = TestJobKind;

    fn kind(&self) -> Self::Kind {
        match self {
            TestJob::Simple { .. } => TestJobKind::Simple,
            TestJob::Slow { .. } => TestJobKind::Slow,
            TestJob::Failing { .. } => TestJobKind::Failing,
        }
    }

    fn validate(&self) -> Result<(), JobError> {
        if self.name().is_empty() {
            return Err(JobError::Validation("test job needs a name".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestJobKind {
    Simple,
    Slow,
    Failing,
}

impl JobKind for TestJobKind {
    fn as_str(&self) -> &'static str {
        match self {
            TestJobKind::Simple => "simple",
            TestJobKind::Slow => "slow",
            TestJobKind::Failing => "failing",
        }
    }
}

impl Display for TestJobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
