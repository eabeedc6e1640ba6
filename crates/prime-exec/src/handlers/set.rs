use prime_core::model::{ActionSpec, ErrorCode, SetSpec, WriteMode};
use prime_query::MemoryKind;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::{set_content, HandlerContext, Invocation, Outcome};
use crate::error::ExecError;
use crate::registry::{HandlerRegistry, RegistryFile};

pub const DEFAULT_CATEGORY: &str = "notes";

fn set_spec(inv: &Invocation) -> Result<&SetSpec, ExecError> {
    match &inv.action.spec {
        ActionSpec::Set(spec) => Ok(spec),
        _ => Err(ExecError::Rejected("not a set action".into())),
    }
}

fn memory_kind(path: &str) -> Result<MemoryKind, ExecError> {
    let name = path.trim_start_matches("memory://");
    MemoryKind::parse(name).ok_or_else(|| ExecError::NotFound(format!("no memory named {name:?}")))
}

fn verification_failed(target: &str) -> String {
    ErrorCode::ExecFailure.warning(format!("verification failed: {target} does not hold the written content"))
}

pub(super) async fn write_file(ctx: &HandlerContext, inv: &Invocation) -> Result<Outcome, ExecError> {
    let spec = set_spec(inv)?;
    let path = ctx.resolve(&spec.path);
    if path.is_dir() {
        return Err(ExecError::Rejected(format!("{} is a directory", spec.path)));
    }
    let content = set_content(inv.action.header.body());
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match spec.mode {
        WriteMode::Write => tokio::fs::write(&path, &content).await?,
        WriteMode::Append => {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
        }
    }

    let mut outcome = Outcome::new(json!({
        "path": spec.path,
        "mode": spec.mode,
        "bytes": content.len(),
    }));
    if inv.verify {
        let written = tokio::fs::read(&path).await?;
        let holds = match spec.mode {
            WriteMode::Write => written == content.as_bytes(),
            WriteMode::Append => written.ends_with(content.as_bytes()),
        };
        if !holds {
            outcome = outcome.warn(verification_failed(&spec.path));
        }
    }
    Ok(outcome)
}

/// Memory writes go straight to the note store, never through a shell.
pub(super) fn write_memory(ctx: &HandlerContext, inv: &Invocation) -> Result<Outcome, ExecError> {
    let spec = set_spec(inv)?;
    let kind = memory_kind(&spec.path)?;
    let category = spec.category.as_deref().unwrap_or(DEFAULT_CATEGORY);
    let write = ctx.memory.add(kind, category, inv.action.header.body())?;
    let note_id = write.note.as_ref().map(|n| n.note_id());

    let mut outcome = Outcome::new(json!({
        "path": spec.path,
        "category": category,
        "note_id": note_id,
    }));
    if let Some(warning) = write.warning {
        outcome = outcome.warn(warning);
    }
    if inv.verify {
        let stored = ctx
            .memory
            .document(kind)?
            .notes()
            .any(|n| Some(n.note_id()) == note_id);
        if !stored {
            outcome = outcome.warn(verification_failed(&spec.path));
        }
    }
    Ok(outcome)
}

/// Replace `handlers.json`. The body must parse as a registry before
/// anything is written.
pub(super) fn write_registry(ctx: &HandlerContext, inv: &Invocation) -> Result<Outcome, ExecError> {
    let spec = set_spec(inv)?;
    let file: RegistryFile = serde_json::from_str(inv.action.header.body())
        .map_err(|e| ExecError::Rejected(format!("not a valid handler registry: {e}")))?;
    let registry = HandlerRegistry::new(file);
    registry.save(&ctx.layout)?;
    info!(disabled = registry.file().disabled.len(), "Handler registry replaced");

    let mut outcome = Outcome::new(json!({
        "path": spec.path,
        "disabled": registry.file().disabled,
        "aliases": registry.file().aliases,
    }));
    if inv.verify && HandlerRegistry::load(&ctx.layout)? != registry {
        outcome = outcome.warn(verification_failed(&spec.path));
    }
    Ok(outcome)
}

pub(super) fn clear_memory(ctx: &HandlerContext) -> Result<Outcome, ExecError> {
    let write = ctx.memory.clear_short_term()?;
    let mut outcome = Outcome::new(json!({
        "path": MemoryKind::ShortTerm.locator(),
        "cleared": true,
    }));
    if let Some(warning) = write.warning {
        outcome = outcome.warn(warning);
    }
    Ok(outcome)
}
