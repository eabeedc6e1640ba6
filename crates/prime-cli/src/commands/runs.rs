use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use prime_core::runlog::list_runs;

use super::open_layout;
use crate::output::format::format_run_list;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct RunsArgs {
    /// Maximum number of runs to show
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

pub fn run(args: &RunsArgs, workspace: Option<&Path>, format: OutputFormat) -> Result<()> {
    let layout = open_layout(workspace)?;
    let mut runs = list_runs(&layout.runs_dir()).context("Failed to list runs")?;
    runs.truncate(args.limit);

    println!("{}", format_run_list(&runs, format));
    Ok(())
}
