use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use prime_core::cache::CacheStore;
use prime_core::model::EnvSnapshot;
use prime_core::parser::FenceParser;
use prime_core::runlog::{slugify, RunContext, RunDir};
use prime_core::PrimeConfig;
use prime_exec::{HandlerContext, HandlerRegistry, ProcessExecutor, Replayer};
use prime_query::MemoryStore;

use super::open_layout;
use crate::output::format::format_replay;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ReplayArgs {
    /// Run name (under .prime/runs) or path to a run directory
    pub run: String,
}

pub fn run(args: &ReplayArgs, workspace: Option<&Path>, format: OutputFormat) -> Result<()> {
    let layout = open_layout(workspace)?;
    let config = PrimeConfig::load(&layout).context("Failed to load .prime/config.json")?;
    let source = RunDir::find(&layout.runs_dir(), &args.run)
        .with_context(|| format!("Failed to find run '{}'", args.run))?;

    // Same backend identity as the source run; everything else is the host
    // as it is now, so a changed environment shows up as missing entries.
    let source_env = source.env().context("Failed to read the run's env.json")?;
    let env = EnvSnapshot::capture(
        &source_env.backend,
        &source_env.model,
        layout.workspace(),
        &config.exec.env_allowlist,
    );

    let ctx = HandlerContext {
        memory: MemoryStore::open(&layout).context("Failed to open memory")?,
        registry: HandlerRegistry::load(&layout).context("Failed to load handlers.json")?,
        executor: Arc::new(ProcessExecutor),
        exec: config.exec.clone(),
        env: env.clone(),
        layout: layout.clone(),
    };
    let cache = CacheStore::open(layout.cache_dir()).context("Failed to open the cache")?;
    let parser = FenceParser::with_aliases(&config.verb_aliases());

    let slug = slugify(&format!("replay {}", source.name()));
    let mut run = RunContext::create(&layout.runs_dir(), &slug, &env)
        .context("Failed to create the replay run")?;
    let report = Replayer::new(&ctx, &cache, &parser)
        .replay(&source, &mut run)
        .with_context(|| format!("Failed to replay '{}'", source.name()))?;
    run.finish().context("Failed to finish the replay run")?;

    println!("{}", format_replay(&source.name(), run.name(), &report, format));
    Ok(())
}
