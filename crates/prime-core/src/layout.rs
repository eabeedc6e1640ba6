use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CoreError;

const PRIME_DIR: &str = ".prime";
const CONFIG_FILE: &str = "config.json";
const REGISTRY_FILE: &str = "handlers.json";
const GUARDRAILS_FILE: &str = "guardrails.txt";

/// Paths of the `.prime/` tree.
///
/// ```text
/// .prime/
///   config.json
///   handlers.json
///   guardrails.txt
///   cache/<ab>/<hex>.{json,stream}
///   memory/{short_term.md, long_term.md, index/}
///   sessions/<session_id>/{caps.json, clg.json, model.md}
///   runs/<timestamp>_<slug>/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimeLayout {
    root: PathBuf,
}

impl PrimeLayout {
    /// Layout rooted at `<workspace>/.prime`.
    pub fn new(workspace: &Path) -> Self {
        Self {
            root: workspace.join(PRIME_DIR),
        }
    }

    /// Walk up from `start` looking for an existing `.prime` directory.
    pub fn discover(start: &Path) -> Result<Self, CoreError> {
        let mut dir = Some(start);
        while let Some(d) = dir {
            if d.join(PRIME_DIR).is_dir() {
                return Ok(Self::new(d));
            }
            dir = d.parent();
        }
        Err(CoreError::NotInitialized)
    }

    /// Create every directory of the layout. Idempotent.
    pub fn create_dirs(&self) -> Result<(), CoreError> {
        for dir in [
            self.root.clone(),
            self.cache_dir(),
            self.memory_dir(),
            self.memory_index_dir(),
            self.sessions_dir(),
            self.runs_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.root.is_dir()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory containing `.prime`, used as the default execution cwd.
    pub fn workspace(&self) -> &Path {
        self.root.parent().unwrap_or(&self.root)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    /// Extra destructive-command patterns, one per line.
    pub fn guardrails_path(&self) -> PathBuf {
        self.root.join(GUARDRAILS_FILE)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    pub fn memory_index_dir(&self) -> PathBuf {
        self.memory_dir().join("index")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(session_id)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }
}
