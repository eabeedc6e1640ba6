use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use prime_core::sessions::{FileSessionStore, SessionStore};

use super::open_layout;
use crate::output::format::{format_session, format_session_list};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct SessionArgs {
    /// Session id to show (default: list every session)
    pub id: Option<String>,
}

pub fn run(args: &SessionArgs, workspace: Option<&Path>, format: OutputFormat) -> Result<()> {
    let layout = open_layout(workspace)?;
    let store = FileSessionStore::new(layout.sessions_dir());

    if let Some(id) = &args.id {
        let session = store
            .load(id)
            .with_context(|| format!("Failed to read session '{id}'"))?
            .with_context(|| format!("No session '{id}'"))?;
        println!("{}", format_session(&session, format));
        return Ok(());
    }

    let mut sessions = Vec::new();
    for id in store.list().context("Failed to list sessions")? {
        if let Some(session) = store
            .load(&id)
            .with_context(|| format!("Failed to read session '{id}'"))?
        {
            sessions.push(session);
        }
    }
    println!("{}", format_session_list(&sessions, format));
    Ok(())
}
