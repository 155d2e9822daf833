//! Test doubles shared by quarry's integration tests and benches.

mod fixtures;
mod job;
mod mock;

pub use fixtures::*;
pub use job::*;
pub use mock::*;
