//! File-first run log: the run directory is the only durable record of a
//! turn.

mod context;
mod index;

pub use context::{
    slugify, RunContext, StreamFile, ARTIFACTS_DIR, ENV_FILE, INDEX_FILE, RETRIEVAL_DIR,
};
pub use index::{list_runs, RunDir, RunSummary, StepEntry, Tally};
