use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::context::{ENV_FILE, INDEX_FILE};
use crate::error::CoreError;
use crate::model::{ActionResult, EnvSnapshot, StepKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepEntry {
    pub index: u32,
    pub label: String,
    pub file: String,
}

/// Result counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub ok: usize,
    pub error: usize,
    pub hits: usize,
}

impl Tally {
    pub fn record(&mut self, result: &ActionResult) {
        if result.is_ok() {
            self.ok += 1;
        } else {
            self.error += 1;
        }
        if result.cache_hit {
            self.hits += 1;
        }
    }
}

pub(crate) fn render_index(
    name: &str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    steps: &[StepEntry],
    tally: Tally,
) -> String {
    let mut out = format!("# Run {name}\n\n");
    out.push_str(&format!("- started: {}\n", started_at.to_rfc3339()));
    out.push_str(&format!("- finished: {}\n", finished_at.to_rfc3339()));
    out.push_str(&format!(
        "- results: {} ok, {} error, {} cache hits\n\n",
        tally.ok, tally.error, tally.hits
    ));
    out.push_str("| step | kind | file |\n|------|------|------|\n");
    for step in steps {
        out.push_str(&format!(
            "| {:04} | {} | [{file}]({file}) |\n",
            step.index,
            step.label,
            file = step.file
        ));
    }
    out
}

/// Read-only view of an existing run directory.
#[derive(Debug, Clone)]
pub struct RunDir {
    dir: PathBuf,
}

/// One line of `prime runs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub name: String,
    pub path: PathBuf,
    pub steps: usize,
    pub finished: bool,
}

impl RunDir {
    pub fn open(dir: &Path) -> Result<Self, CoreError> {
        if !dir.join(ENV_FILE).is_file() {
            return Err(CoreError::NotFound(format!(
                "run directory {} (no {ENV_FILE})",
                dir.display()
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Resolve a run by directory path or by name under `runs_dir`.
    pub fn find(runs_dir: &Path, name_or_path: &str) -> Result<Self, CoreError> {
        let direct = Path::new(name_or_path);
        if direct.join(ENV_FILE).is_file() {
            return Self::open(direct);
        }
        Self::open(&runs_dir.join(name_or_path))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn env(&self) -> Result<EnvSnapshot, CoreError> {
        let data = fs::read_to_string(self.dir.join(ENV_FILE))?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Numbered steps in index order.
    pub fn steps(&self) -> Result<Vec<(u32, StepKind, PathBuf)>, CoreError> {
        let mut steps = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some((index, kind)) = StepKind::parse_file_name(&name.to_string_lossy()) {
                steps.push((index, kind, entry.path()));
            }
        }
        steps.sort_by_key(|(index, _, _)| *index);
        Ok(steps)
    }

    pub fn summary(&self) -> Result<RunSummary, CoreError> {
        Ok(RunSummary {
            name: self.name(),
            path: self.dir.clone(),
            steps: self.steps()?.len(),
            finished: self.dir.join(INDEX_FILE).is_file(),
        })
    }
}

/// Runs under `runs_dir`, newest first (names sort by timestamp).
pub fn list_runs(runs_dir: &Path) -> Result<Vec<RunSummary>, CoreError> {
    if !runs_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut runs = Vec::new();
    for entry in fs::read_dir(runs_dir)? {
        let path = entry?.path();
        if let Ok(run) = RunDir::open(&path) {
            runs.push(run.summary()?);
        }
    }
    runs.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionId;
    use crate::runlog::RunContext;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_tally() {
        let mut t = Tally::default();
        t.record(&ActionResult::ok("a", json!(1)));
        t.record(&ActionResult::ok("b", json!(1)).replayed_for("c"));
        t.record(&ActionResult::error(
            "d",
            crate::model::ErrorCode::ExecTimeout,
            "slow",
        ));
        assert_eq!(t, Tally { ok: 2, error: 1, hits: 1 });
    }

    #[test]
    fn test_run_dir_reads_steps_in_order() {
        let tmp = TempDir::new().unwrap();
        let env = EnvSnapshot::capture("b", "m", tmp.path(), &[]);
        let mut run = RunContext::create(tmp.path(), "read back", &env).unwrap();
        let r1 = ActionId::parse("r1").unwrap();
        run.append(StepKind::User, "hi").unwrap();
        run.append(StepKind::Command(r1.clone()), "cmd").unwrap();
        run.append_result(&ActionResult::ok("r1", json!(null))).unwrap();
        run.finish().unwrap();

        let dir = RunDir::find(tmp.path(), run.name()).unwrap();
        let kinds: Vec<StepKind> = dir.steps().unwrap().into_iter().map(|(_, k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![StepKind::User, StepKind::Command(r1.clone()), StepKind::Result(r1)]
        );
        assert_eq!(dir.env().unwrap().model, "m");

        let runs = list_runs(tmp.path()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].steps, 3);
        assert!(runs[0].finished);
    }

    #[test]
    fn test_open_rejects_non_run() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(RunDir::open(tmp.path()), Err(CoreError::NotFound(_))));
        assert!(list_runs(&tmp.path().join("missing")).unwrap().is_empty());
    }
}
