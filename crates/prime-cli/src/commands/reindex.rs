use std::path::Path;

use anyhow::{Context, Result};
use prime_query::MemoryStore;

use super::open_layout;

pub fn run(workspace: Option<&Path>) -> Result<()> {
    let layout = open_layout(workspace)?;
    let memory = MemoryStore::open(&layout).context("Failed to open memory")?;

    eprintln!("Rebuilding memory index...");
    let count = memory.reindex().context("Failed to rebuild the memory index")?;
    eprintln!("Indexed {count} note(s).");

    Ok(())
}
