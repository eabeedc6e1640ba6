//! Verb handlers. Each one takes an [`Invocation`] and either returns the
//! `data` of an ok result or an error saying why the action could not run.

pub(crate) mod get;
pub(crate) mod run;
pub(crate) mod set;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use prime_core::config::ExecConfig;
use prime_core::model::{Action, ActionResult, EnvSnapshot};
use prime_core::PrimeLayout;
use prime_query::MemoryStore;
use serde_json::Value;

pub use run::{interpreter, Interpreter};

use crate::error::ExecError;
use crate::process::{ShellExecutor, StreamSink};
use crate::registry::{HandlerKind, HandlerRegistry};

/// Everything handlers share for the length of a turn.
pub struct HandlerContext {
    pub layout: PrimeLayout,
    pub exec: ExecConfig,
    pub env: EnvSnapshot,
    pub memory: MemoryStore,
    pub registry: HandlerRegistry,
    pub executor: Arc<dyn ShellExecutor>,
}

impl HandlerContext {
    /// Resolve a fence path against the workspace.
    pub fn resolve(&self, raw: &str) -> PathBuf {
        resolve_path(self.layout.workspace(), raw)
    }

    /// Truncate captured output for result data.
    pub fn clip(&self, bytes: &[u8]) -> (String, bool) {
        let max = self.exec.max_output_bytes;
        if bytes.len() <= max {
            return (String::from_utf8_lossy(bytes).into_owned(), false);
        }
        (String::from_utf8_lossy(&bytes[..max]).into_owned(), true)
    }
}

/// One handler call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub action: Action,
    pub sink: StreamSink,
    pub artifacts_dir: PathBuf,
    pub retrieval_dir: PathBuf,
    /// Whether the governor asked for a post-check of this action.
    pub verify: bool,
}

/// What a handler produced: the `data` of an ok result plus warnings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outcome {
    pub data: Value,
    pub warnings: Vec<String>,
}

impl Outcome {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
        }
    }

    pub fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn into_result(self, for_id: &str) -> ActionResult {
        let mut result = ActionResult::ok(for_id, self.data);
        result.warnings = self.warnings;
        result
    }
}

pub async fn invoke(
    ctx: &HandlerContext,
    kind: HandlerKind,
    inv: &Invocation,
) -> Result<Outcome, ExecError> {
    match kind {
        HandlerKind::ReadFile => get::read_file(ctx, inv).await,
        HandlerKind::ReadMemory => get::read_memory(ctx, inv),
        HandlerKind::FetchUrl => get::fetch_url(ctx, inv).await,
        HandlerKind::SearchMemory => get::search_memory(ctx, inv).await,
        HandlerKind::ReadEnv => get::read_env(ctx),
        HandlerKind::RunScript => run::run_script(ctx, inv).await,
        HandlerKind::WriteFile => set::write_file(ctx, inv).await,
        HandlerKind::WriteMemory => set::write_memory(ctx, inv),
        HandlerKind::WriteRegistry => set::write_registry(ctx, inv),
        HandlerKind::ClearMemory => set::clear_memory(ctx),
    }
}

/// Join `raw` onto `base` unless it is absolute, then normalize.
pub fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    normalize(&base.join(raw))
}

/// Drop `.` and fold `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Content a `set` writes for a fence body: the body plus a final newline.
pub fn set_content(body: &str) -> String {
    if body.is_empty() || body.ends_with('\n') {
        body.to_string()
    } else {
        format!("{body}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/work/repo");
        assert_eq!(resolve_path(base, "./a/b.txt"), PathBuf::from("/work/repo/a/b.txt"));
        assert_eq!(resolve_path(base, "../x"), PathBuf::from("/work/x"));
        assert_eq!(resolve_path(base, "/etc/hosts"), PathBuf::from("/etc/hosts"));
        assert_eq!(
            resolve_path(base, ".prime/./handlers.json"),
            PathBuf::from("/work/repo/.prime/handlers.json")
        );
    }

    #[test]
    fn test_set_content() {
        assert_eq!(set_content("a"), "a\n");
        assert_eq!(set_content("a\n"), "a\n");
        assert_eq!(set_content(""), "");
    }
}
