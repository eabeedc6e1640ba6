use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use super::{build_agent, open_layout, runtime, BackendArgs};
use crate::output::format::format_turn;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct TurnArgs {
    /// The user message
    pub message: String,

    #[command(flatten)]
    pub backend: BackendArgs,
}

pub fn run(args: &TurnArgs, workspace: Option<&Path>, format: OutputFormat) -> Result<()> {
    let layout = open_layout(workspace)?;
    let agent = build_agent(&layout, &args.backend)?;

    let rt = runtime()?;
    let outcome = rt
        .block_on(agent.turn(&args.message))
        .context("Turn failed")?;

    println!("{}", format_turn(&outcome, format));
    Ok(())
}
