pub mod init;
pub mod profile;
pub mod reindex;
pub mod replay;
pub mod runs;
pub mod search;
pub mod session;
pub mod show;
pub mod turn;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use prime_agent::{Agent, CommandBackend, LlmBackend, ScriptedBackend};
use prime_core::model::env::allowlisted_env;
use prime_core::sessions::FileSessionStore;
use prime_core::{PrimeConfig, PrimeLayout};
use prime_exec::ProcessExecutor;
use tracing::debug;

#[derive(Subcommand)]
pub enum Commands {
    /// Create `.prime/` in the workspace
    Init(init::InitArgs),
    /// Send one message to the backend and run the actions in its reply
    Turn(turn::TurnArgs),
    /// Rebuild a run from the cache without executing anything
    Replay(replay::ReplayArgs),
    /// Measure the backend with the probe battery and set its mode
    Profile(profile::ProfileArgs),
    /// List sessions or show one
    Session(session::SessionArgs),
    /// List runs (most recent first)
    Runs(runs::RunsArgs),
    /// Show the steps of a run, or one step's contents
    Show(show::ShowArgs),
    /// Search memory notes
    Search(search::SearchArgs),
    /// Rebuild the memory search index
    Reindex,
}

/// Which LLM backend a command talks to.
#[derive(Args)]
pub struct BackendArgs {
    /// Shell command that reads a prompt on stdin and prints the reply
    #[arg(long, env = "PRIME_BACKEND_CMD")]
    pub backend_cmd: Option<String>,

    /// Model identifier recorded with the session
    #[arg(long, env = "PRIME_MODEL")]
    pub model: Option<String>,

    /// Serve replies from files instead of a live backend, in order (repeatable)
    #[arg(long = "reply-file", value_name = "FILE")]
    pub reply_files: Vec<PathBuf>,
}

/// Find the workspace layout, failing if `prime init` has not been run.
pub fn open_layout(workspace: Option<&Path>) -> Result<PrimeLayout> {
    let layout = match workspace {
        Some(dir) => PrimeLayout::new(dir),
        None => {
            let cwd = std::env::current_dir().context("Failed to read the current directory")?;
            match PrimeLayout::discover(&cwd) {
                Ok(layout) => layout,
                Err(_) => PrimeLayout::new(&cwd),
            }
        }
    };
    if !layout.is_initialized() {
        anyhow::bail!("Prime is not initialized. Run `prime init` first.");
    }
    Ok(layout)
}

pub fn build_backend(
    args: &BackendArgs,
    config: &PrimeConfig,
    layout: &PrimeLayout,
) -> Result<Arc<dyn LlmBackend>> {
    let model = args
        .model
        .clone()
        .unwrap_or_else(|| config.backend.model.clone());

    if !args.reply_files.is_empty() {
        let replies = args
            .reply_files
            .iter()
            .map(|path| {
                fs::read_to_string(path)
                    .with_context(|| format!("Failed to read reply file {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(replies = replies.len(), model = %model, "Using scripted replies");
        return Ok(Arc::new(ScriptedBackend::new(model, replies)));
    }

    let command = args
        .backend_cmd
        .clone()
        .or_else(|| config.backend.command.clone())
        .context("No backend configured. Set backend.command in .prime/config.json or pass --backend-cmd.")?;
    debug!(command = %command, model = %model, "Using command backend");
    let backend = CommandBackend::new(command, model, Arc::new(ProcessExecutor))
        .with_shell(config.exec.shell.clone())
        .with_cwd(layout.workspace())
        .with_env(allowlisted_env(&config.exec.env_allowlist));
    Ok(Arc::new(backend))
}

pub fn build_agent(layout: &PrimeLayout, args: &BackendArgs) -> Result<Agent> {
    let config = PrimeConfig::load(layout).context("Failed to load .prime/config.json")?;
    let backend = build_backend(args, &config, layout)?;
    let sessions = Arc::new(FileSessionStore::new(layout.sessions_dir()));
    Ok(Agent::new(
        layout.clone(),
        config,
        backend,
        Arc::new(ProcessExecutor),
        sessions,
    ))
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create async runtime")
}
