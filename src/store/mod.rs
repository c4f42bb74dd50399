//! Run store - persistent history of runs and their checkpoints

mod schema;
mod runs;

pub use runs::{RunStore, RunSummary};
