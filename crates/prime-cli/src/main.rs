use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(
    name = "prime",
    version,
    about = "Run agent turns as auditable, replayable UCM actions"
)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: output::OutputFormat,

    /// Workspace containing `.prime/` (default: search upwards from the current directory)
    #[arg(long, global = true, env = "PRIME_WORKSPACE")]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let workspace = cli.workspace.as_deref();

    match &cli.command {
        commands::Commands::Init(args) => commands::init::run(args, workspace),
        commands::Commands::Turn(args) => commands::turn::run(args, workspace, cli.format),
        commands::Commands::Replay(args) => commands::replay::run(args, workspace, cli.format),
        commands::Commands::Profile(args) => commands::profile::run(args, workspace, cli.format),
        commands::Commands::Session(args) => commands::session::run(args, workspace, cli.format),
        commands::Commands::Runs(args) => commands::runs::run(args, workspace, cli.format),
        commands::Commands::Show(args) => commands::show::run(args, workspace, cli.format),
        commands::Commands::Search(args) => commands::search::run(args, workspace, cli.format),
        commands::Commands::Reindex => commands::reindex::run(workspace),
    }
}
