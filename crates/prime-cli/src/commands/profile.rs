use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use super::{build_agent, open_layout, runtime, BackendArgs};
use crate::output::format::format_profile;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ProfileArgs {
    #[command(flatten)]
    pub backend: BackendArgs,
}

pub fn run(args: &ProfileArgs, workspace: Option<&Path>, format: OutputFormat) -> Result<()> {
    let layout = open_layout(workspace)?;
    let agent = build_agent(&layout, &args.backend)?;

    eprintln!("Running probe battery for session {}...", agent.session_id());
    let rt = runtime()?;
    let outcome = rt.block_on(agent.profile()).context("Profiling failed")?;

    println!("{}", format_profile(&outcome, format));
    Ok(())
}
