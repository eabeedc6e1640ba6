use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use prime_core::{PrimeConfig, PrimeLayout};
use prime_exec::guardrail::GUARDRAILS_TEMPLATE;
use prime_exec::HandlerRegistry;
use prime_query::MemoryStore;

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite config.json, handlers.json and guardrails.txt with defaults
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: &InitArgs, workspace: Option<&Path>) -> Result<()> {
    let workspace = match workspace {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("Failed to read the current directory")?,
    };
    let layout = PrimeLayout::new(&workspace);

    if layout.is_initialized() && !args.force {
        println!("Prime is already initialized in {}.", workspace.display());
        println!("Use --force to reset config.json, handlers.json and guardrails.txt.");
        return Ok(());
    }

    layout
        .create_dirs()
        .context("Failed to create .prime directories")?;
    if args.force || !layout.config_path().exists() {
        PrimeConfig::default()
            .save(&layout)
            .context("Failed to write config.json")?;
    }
    if args.force || !layout.registry_path().exists() {
        HandlerRegistry::default()
            .save(&layout)
            .context("Failed to write handlers.json")?;
    }
    if args.force || !layout.guardrails_path().exists() {
        fs::write(layout.guardrails_path(), GUARDRAILS_TEMPLATE)
            .context("Failed to write guardrails.txt")?;
    }
    MemoryStore::open(&layout).context("Failed to create memory notes")?;

    println!("Prime initialized in {}.", layout.root().display());
    println!();
    println!("Next steps:");
    println!("  set backend.command in .prime/config.json (or pass --backend-cmd)");
    println!("  prime profile              Measure the backend and pick its mode");
    println!("  prime turn \"<message>\"     Run one turn");
    Ok(())
}
