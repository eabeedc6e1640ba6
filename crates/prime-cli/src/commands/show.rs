use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use prime_core::runlog::RunDir;

use super::open_layout;
use crate::output::format::{format_run_steps, format_step};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ShowArgs {
    /// Run name (under .prime/runs) or path to a run directory
    pub run: String,

    /// Print the contents of this step instead of the step list
    #[arg(long)]
    pub step: Option<u32>,
}

pub fn run(args: &ShowArgs, workspace: Option<&Path>, format: OutputFormat) -> Result<()> {
    let layout = open_layout(workspace)?;
    let run = RunDir::find(&layout.runs_dir(), &args.run)
        .with_context(|| format!("Failed to find run '{}'", args.run))?;
    let steps = run.steps().context("Failed to list run steps")?;

    let output = match args.step {
        Some(index) => {
            let (_, kind, path) = steps
                .iter()
                .find(|(i, _, _)| *i == index)
                .with_context(|| format!("Run '{}' has no step {index}", run.name()))?;
            let bytes = fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            format_step(index, kind, &String::from_utf8_lossy(&bytes), format)
        }
        None => {
            let env = run.env().context("Failed to read the run's env.json")?;
            format_run_steps(&run.name(), &env, &steps, format)
        }
    };

    println!("{output}");
    Ok(())
}
