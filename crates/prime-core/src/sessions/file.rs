use std::fs;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{validate_session_id, SessionRecord, SessionStore};
use crate::error::CoreError;
use crate::governor::{CapabilityRecord, GovernorState};

const CAPS_FILE: &str = "caps.json";
const CLG_FILE: &str = "clg.json";
const MODEL_FILE: &str = "model.md";
const LOCK_FILE: &str = ".lock";

/// Sessions under `.prime/sessions/<id>/{caps.json, clg.json, model.md}`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn session_dir(&self, id: &str) -> Result<PathBuf, CoreError> {
        validate_session_id(id)?;
        Ok(self.dir.join(id))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, id: &str) -> Result<Option<SessionRecord>, CoreError> {
        let dir = self.session_dir(id)?;
        let Some(model_md) = read_locked(&dir.join(MODEL_FILE))? else {
            return Ok(None);
        };
        let identity = ModelIdentity::parse(&model_md);
        let clg: GovernorState = match read_json(&dir.join(CLG_FILE))? {
            Some(clg) => clg,
            None => return Err(CoreError::NotFound(format!("{CLG_FILE} for session {id}"))),
        };
        let caps: Option<CapabilityRecord> = read_json(&dir.join(CAPS_FILE))?;

        Ok(Some(SessionRecord {
            id: id.to_string(),
            backend: identity.backend,
            model: identity.model,
            created_at: identity.created_at.unwrap_or_else(Utc::now),
            caps,
            clg,
        }))
    }

    fn save(&self, record: &SessionRecord) -> Result<(), CoreError> {
        let dir = self.session_dir(&record.id)?;
        fs::create_dir_all(&dir)?;
        write_locked(&dir.join(CLG_FILE), &serde_json::to_string_pretty(&record.clg)?)?;
        if let Some(caps) = &record.caps {
            write_locked(&dir.join(CAPS_FILE), &serde_json::to_string_pretty(caps)?)?;
        }
        write_locked(&dir.join(MODEL_FILE), &render_model_md(record))?;
        debug!(session = %record.id, mode = %record.clg.mode, "Saved session");
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, CoreError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().join(MODEL_FILE).is_file() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn update(
        &self,
        id: &str,
        change: &mut dyn FnMut(&mut SessionRecord),
    ) -> Result<SessionRecord, CoreError> {
        let dir = self.session_dir(id)?;
        fs::create_dir_all(&dir)?;
        let lock = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        fs2::FileExt::lock_exclusive(&lock).map_err(CoreError::Io)?;

        let result = self
            .load(id)
            .and_then(|record| record.ok_or_else(|| CoreError::NotFound(format!("session {id}"))))
            .and_then(|mut record| {
                change(&mut record);
                self.save(&record)?;
                Ok(record)
            });

        fs2::FileExt::unlock(&lock).map_err(CoreError::Io)?;
        result
    }
}

struct ModelIdentity {
    backend: String,
    model: String,
    created_at: Option<DateTime<Utc>>,
}

impl ModelIdentity {
    /// Read the `- key: value` lines of `model.md`.
    fn parse(text: &str) -> Self {
        let mut identity = Self {
            backend: String::new(),
            model: String::new(),
            created_at: None,
        };
        for line in text.lines() {
            let Some((key, value)) = line.strip_prefix("- ").and_then(|l| l.split_once(": ")) else {
                continue;
            };
            match key {
                "backend" => identity.backend = value.trim().to_string(),
                "model" => identity.model = value.trim().to_string(),
                "created" => {
                    identity.created_at = DateTime::parse_from_rfc3339(value.trim())
                        .ok()
                        .map(|d| d.with_timezone(&Utc))
                }
                _ => {}
            }
        }
        identity
    }
}

fn render_model_md(record: &SessionRecord) -> String {
    let mut out = format!("# Session {}\n\n", record.id);
    out.push_str(&format!("- backend: {}\n", record.backend));
    out.push_str(&format!("- model: {}\n", record.model));
    out.push_str(&format!("- created: {}\n", record.created_at.to_rfc3339()));
    out.push_str(&format!("- mode: {}\n", record.clg.mode));
    if let Some(caps) = &record.caps {
        out.push_str(&format!("- brilliance: {:.3}\n", caps.brilliance));
    }
    out
}

fn write_locked(path: &Path, contents: &str) -> Result<(), CoreError> {
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    fs2::FileExt::lock_exclusive(&file).map_err(CoreError::Io)?;
    file.set_len(0)?;
    (&file).write_all(contents.as_bytes())?;
    fs2::FileExt::unlock(&file).map_err(CoreError::Io)?;
    Ok(())
}

fn read_locked(path: &Path) -> Result<Option<String>, CoreError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    fs2::FileExt::lock_shared(&file).map_err(CoreError::Io)?;
    let mut data = String::new();
    (&file).read_to_string(&mut data)?;
    fs2::FileExt::unlock(&file).map_err(CoreError::Io)?;
    Ok(Some(data))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CoreError> {
    match read_locked(path)? {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}
