use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use prime_query::MemoryStore;

use super::open_layout;
use crate::output::format::format_search_hits;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Only notes in these categories (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Maximum number of results
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,
}

pub fn run(args: &SearchArgs, workspace: Option<&Path>, format: OutputFormat) -> Result<()> {
    let layout = open_layout(workspace)?;
    let memory = MemoryStore::open(&layout).context("Failed to open memory")?;

    let hits = memory
        .search(&args.query, &args.tags, args.limit)
        .context("Search failed")?;

    if hits.is_empty() {
        eprintln!("No results found for: {}", args.query);
        return Ok(());
    }

    if let OutputFormat::Text = format {
        eprintln!("Found {} result(s) for: {}\n", hits.len(), args.query);
    }
    println!("{}", format_search_hits(&hits, format));
    Ok(())
}
