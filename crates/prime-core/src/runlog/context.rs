use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::index::{render_index, StepEntry, Tally};
use crate::error::CoreError;
use crate::model::{ActionId, ActionResult, EnvSnapshot, StepKind, MAX_STEPS};

pub const ENV_FILE: &str = "env.json";
pub const INDEX_FILE: &str = "index.md";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const RETRIEVAL_DIR: &str = "retrieval";

/// Incremental output of one handler, written to a pending file until the
/// action's result is logged and the stream gets its step number.
#[derive(Debug)]
pub struct StreamFile {
    id: ActionId,
    path: PathBuf,
    file: fs::File,
    len: u64,
}

impl StreamFile {
    pub fn id(&self) -> &ActionId {
        &self.id
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Write for StreamFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// One run directory, owned by the writer of the run.
///
/// Holds the step counter: every numbered file goes through [`append`],
/// so indices are strictly increasing and match execution order.
///
/// [`append`]: RunContext::append
#[derive(Debug)]
pub struct RunContext {
    dir: PathBuf,
    name: String,
    next_index: u32,
    started_at: DateTime<Utc>,
    steps: Vec<StepEntry>,
    tally: Tally,
}

impl RunContext {
    /// Create `<runs_dir>/<YYYYmmdd_HHMMSS>_<slug>` with its `env.json`,
    /// `artifacts/` and `retrieval/`. A name clash gets a `-2`, `-3` suffix.
    pub fn create(runs_dir: &Path, slug: &str, env: &EnvSnapshot) -> Result<Self, CoreError> {
        fs::create_dir_all(runs_dir)?;
        let started_at = Utc::now();
        let base = format!("{}_{}", started_at.format("%Y%m%d_%H%M%S"), slugify(slug));

        let mut name = base.clone();
        let mut n = 1;
        let dir = loop {
            let candidate = runs_dir.join(&name);
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    n += 1;
                    name = format!("{base}-{n}");
                }
                Err(e) => return Err(e.into()),
            }
        };

        fs::create_dir_all(dir.join(ARTIFACTS_DIR))?;
        fs::create_dir_all(dir.join(RETRIEVAL_DIR))?;
        fs::write(dir.join(ENV_FILE), serde_json::to_string_pretty(env)?)?;
        info!(run = %name, "Created run directory");

        Ok(Self {
            dir,
            name,
            next_index: 1,
            started_at,
            steps: Vec::new(),
            tally: Tally::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.join(ARTIFACTS_DIR)
    }

    pub fn retrieval_dir(&self) -> PathBuf {
        self.dir.join(RETRIEVAL_DIR)
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    fn allocate(&mut self, kind: &StepKind) -> Result<(u32, PathBuf), CoreError> {
        let index = self.next_index;
        if index > MAX_STEPS {
            return Err(CoreError::RunLog(format!(
                "run {} is full ({MAX_STEPS} steps)",
                self.name
            )));
        }
        self.next_index += 1;
        let file = kind.file_name(index);
        let path = self.dir.join(&file);
        self.steps.push(StepEntry {
            index,
            label: kind.label().to_string(),
            file,
        });
        Ok((index, path))
    }

    /// Write a complete step under the next index.
    pub fn append(&mut self, kind: StepKind, payload: impl AsRef<[u8]>) -> Result<PathBuf, CoreError> {
        if matches!(kind, StepKind::Stream(_)) {
            return Err(CoreError::RunLog(
                "stream steps are written through open_stream".into(),
            ));
        }
        let (index, path) = self.allocate(&kind)?;
        fs::write(&path, payload)?;
        debug!(index, kind = kind.label(), "Appended step");
        Ok(path)
    }

    /// Log a result fence and count it in the run tally.
    pub fn append_result(&mut self, result: &ActionResult) -> Result<PathBuf, CoreError> {
        let id = ActionId::parse(result.for_id.as_str())?;
        let path = self.append(StepKind::Result(id), result.to_fence()?)?;
        self.tally.record(result);
        Ok(path)
    }

    /// Start a stream for `id`. Bytes go to disk as they are written.
    pub fn open_stream(&self, id: &ActionId) -> Result<StreamFile, CoreError> {
        let path = self.dir.join(format!(".pending_STREAM__{id}.stdout.log"));
        let file = fs::File::create(&path)?;
        Ok(StreamFile {
            id: id.clone(),
            path,
            file,
            len: 0,
        })
    }

    /// Give a finished stream its step number. Empty streams leave no file.
    pub fn commit_stream(&mut self, mut stream: StreamFile) -> Result<Option<PathBuf>, CoreError> {
        stream.flush()?;
        if stream.is_empty() {
            fs::remove_file(&stream.path)?;
            return Ok(None);
        }
        let (_, path) = self.allocate(&StepKind::Stream(stream.id.clone()))?;
        fs::rename(&stream.path, &path)?;
        Ok(Some(path))
    }

    /// Write already-captured stream bytes (cache hits, replays).
    pub fn append_stream(&mut self, id: &ActionId, bytes: &[u8]) -> Result<Option<PathBuf>, CoreError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        let (_, path) = self.allocate(&StepKind::Stream(id.clone()))?;
        fs::write(&path, bytes)?;
        Ok(Some(path))
    }

    /// Store a binary payload under `artifacts/` and return its path.
    pub fn write_artifact(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, CoreError> {
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| CoreError::RunLog(format!("invalid artifact name {name:?}")))?;
        let path = self.artifacts_dir().join(file_name);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Write `index.md`. Can be called again; the last call wins.
    pub fn finish(&self) -> Result<PathBuf, CoreError> {
        let path = self.dir.join(INDEX_FILE);
        let index = render_index(&self.name, self.started_at, Utc::now(), &self.steps, self.tally);
        fs::write(&path, index)?;
        info!(run = %self.name, steps = self.steps.len(), "Run finished");
        Ok(path)
    }
}

/// Lowercase ASCII words joined by `-`, at most 40 characters.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for word in text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let sep = usize::from(!slug.is_empty());
        if slug.len() + sep + word.len() > 40 {
            break;
        }
        if sep == 1 {
            slug.push('-');
        }
        slug.push_str(&word.to_ascii_lowercase());
    }
    if slug.is_empty() {
        "run".into()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn env() -> EnvSnapshot {
        EnvSnapshot::capture("scripted", "test", Path::new("/tmp"), &[])
    }

    fn id(s: &str) -> ActionId {
        ActionId::parse(s).unwrap()
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_layout_and_order() {
        let tmp = TempDir::new().unwrap();
        let mut run = RunContext::create(tmp.path(), "List the files", &env()).unwrap();
        assert!(run.name().ends_with("_list-the-files"));

        run.append(StepKind::User, "list the files").unwrap();
        run.append(StepKind::Plan, "```run#r1 lang=\"sh\"\nls\n```").unwrap();
        run.append(StepKind::Command(id("r1")), "```run#r1 lang=\"sh\"\nls\n```").unwrap();

        let mut stream = run.open_stream(&id("r1")).unwrap();
        stream.write_all(b"a.txt\n").unwrap();
        assert_eq!(stream.len(), 6);
        run.append_result(&ActionResult::ok("r1", json!({"exit_code": 0})))
            .unwrap();
        let stream_path = run.commit_stream(stream).unwrap().unwrap();
        assert_eq!(fs::read(stream_path).unwrap(), b"a.txt\n");

        run.append(StepKind::Warn, "careful").unwrap();
        run.finish().unwrap();

        assert_eq!(
            listing(run.dir()),
            vec![
                "0001_USER.md",
                "0002_PLAN.md",
                "0003_COMMAND__r1.md",
                "0004_RESULT__r1.md",
                "0005_STREAM__r1.stdout.log",
                "0006_WARN.md",
                "artifacts",
                "env.json",
                "index.md",
                "retrieval",
            ]
        );
        let index = fs::read_to_string(run.dir().join(INDEX_FILE)).unwrap();
        assert!(index.contains("0004_RESULT__r1.md"));
        assert!(index.contains("1 ok"));
    }

    #[test]
    fn test_empty_stream_leaves_no_file() {
        let tmp = TempDir::new().unwrap();
        let mut run = RunContext::create(tmp.path(), "x", &env()).unwrap();
        let stream = run.open_stream(&id("g1")).unwrap();
        assert_eq!(run.commit_stream(stream).unwrap(), None);
        assert!(!listing(run.dir()).iter().any(|n| n.contains("STREAM")));
    }

    #[test]
    fn test_name_collision_gets_suffix() {
        let tmp = TempDir::new().unwrap();
        let a = RunContext::create(tmp.path(), "same", &env()).unwrap();
        let b = RunContext::create(tmp.path(), "same", &env()).unwrap();
        assert_ne!(a.dir(), b.dir());
    }

    #[test]
    fn test_run_stops_at_max_steps() {
        let tmp = TempDir::new().unwrap();
        let mut run = RunContext::create(tmp.path(), "long", &env()).unwrap();
        run.next_index = MAX_STEPS;
        let last = run.append(StepKind::Warn, "last").unwrap();
        assert!(last.ends_with("9999_WARN.md"));

        let err = run.append(StepKind::Warn, "one too many").unwrap_err();
        assert!(matches!(err, CoreError::RunLog(_)));
        assert!(run.append_stream(&id("r1"), b"x").is_err());
        assert!(!listing(run.dir()).iter().any(|n| n.starts_with("10000")));
    }

    #[test]
    fn test_stream_kind_rejected_by_append() {
        let tmp = TempDir::new().unwrap();
        let mut run = RunContext::create(tmp.path(), "x", &env()).unwrap();
        assert!(run.append(StepKind::Stream(id("r1")), "x").is_err());
    }

    #[test]
    fn test_artifacts_stay_inside() {
        let tmp = TempDir::new().unwrap();
        let run = RunContext::create(tmp.path(), "x", &env()).unwrap();
        let path = run.write_artifact("../escape.bin", b"\x00\x01").unwrap();
        assert_eq!(path, run.artifacts_dir().join("escape.bin"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Fix the build, please!"), "fix-the-build-please");
        assert_eq!(slugify("???"), "run");
        assert!(slugify(&"word ".repeat(30)).len() <= 40);
    }
}
