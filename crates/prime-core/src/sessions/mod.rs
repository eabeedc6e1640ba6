//! Session persistence: capability scores, governor state and the model
//! identity, behind the [`SessionStore`] trait.

mod file;
mod memory;

use chrono::{DateTime, Utc};

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

use crate::error::CoreError;
use crate::governor::{CapabilityRecord, GovernorState, Transition, TurnSignal};
use crate::model::Mode;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub backend: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub caps: Option<CapabilityRecord>,
    pub clg: GovernorState,
}

impl SessionRecord {
    pub fn new(id: &str, backend: &str, model: &str, initial_mode: Mode) -> Result<Self, CoreError> {
        validate_session_id(id)?;
        Ok(Self {
            id: id.to_string(),
            backend: backend.to_string(),
            model: model.to_string(),
            created_at: Utc::now(),
            caps: None,
            clg: GovernorState::new(initial_mode),
        })
    }

    /// Promotion ceiling: the profiled candidate, or the current Mode while
    /// the session has not been profiled.
    pub fn candidate_mode(&self) -> Mode {
        self.caps
            .as_ref()
            .map(CapabilityRecord::candidate_mode)
            .unwrap_or(self.clg.mode)
    }

    /// Record a probe battery. The first profile of a session that has not
    /// run a turn yet also sets the starting Mode.
    pub fn apply_caps(&mut self, caps: CapabilityRecord) {
        if self.caps.is_none() && self.clg.window.is_empty() {
            self.clg.mode = caps.candidate_mode();
        }
        self.caps = Some(caps);
    }

    pub fn observe_turn(&mut self, signal: TurnSignal, window: usize) -> Option<Transition> {
        let candidate = self.candidate_mode();
        self.clg.observe(candidate, signal, window)
    }
}

/// Load/save of session records.
pub trait SessionStore: Send + Sync {
    fn load(&self, id: &str) -> Result<Option<SessionRecord>, CoreError>;
    fn save(&self, record: &SessionRecord) -> Result<(), CoreError>;
    fn list(&self) -> Result<Vec<String>, CoreError>;

    /// Load `id`, apply `change` and save, with no other `update` of the
    /// same session in between. Fails with `NotFound` when the session
    /// does not exist.
    fn update(
        &self,
        id: &str,
        change: &mut dyn FnMut(&mut SessionRecord),
    ) -> Result<SessionRecord, CoreError>;

    fn load_or_create(
        &self,
        id: &str,
        backend: &str,
        model: &str,
        initial_mode: Mode,
    ) -> Result<SessionRecord, CoreError> {
        match self.load(id)? {
            Some(record) => Ok(record),
            None => {
                let record = SessionRecord::new(id, backend, model, initial_mode)?;
                self.save(&record)?;
                Ok(record)
            }
        }
    }
}

/// Default session id for a backend/model pair.
pub fn session_id_for(backend: &str, model: &str) -> String {
    let raw = format!("{backend}-{model}");
    let id: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    id.trim_start_matches('.').to_string()
}

pub(crate) fn validate_session_id(id: &str) -> Result<(), CoreError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidId(format!("invalid session id {id:?}")))
    }
}
