use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::{validate_session_id, SessionRecord, SessionStore};
use crate::error::CoreError;

/// Session store kept in memory, for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: Mutex<BTreeMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &str) -> Result<Option<SessionRecord>, CoreError> {
        validate_session_id(id)?;
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(id).cloned())
    }

    fn save(&self, record: &SessionRecord) -> Result<(), CoreError> {
        validate_session_id(&record.id)?;
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, CoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.keys().cloned().collect())
    }

    fn update(
        &self,
        id: &str,
        change: &mut dyn FnMut(&mut SessionRecord),
    ) -> Result<SessionRecord, CoreError> {
        validate_session_id(id)?;
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("session {id}")))?;
        change(record);
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::TurnSignal;
    use std::sync::Arc;
    use crate::model::Mode;

    #[test]
    fn test_memory_store() {
        let store = MemorySessionStore::new();
        let mut record = store.load_or_create("a", "b", "m", Mode::M3).unwrap();
        record.observe_turn(TurnSignal { violations: 1, severe: true }, 10);
        store.save(&record).unwrap();
        assert_eq!(store.load("a").unwrap().unwrap().clg.mode, Mode::M2);
        assert_eq!(store.list().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn test_update_from_many_threads() {
        let store = Arc::new(MemorySessionStore::new());
        store.load_or_create("a", "b", "m", Mode::M2).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .update("a", &mut |s: &mut SessionRecord| {
                            s.observe_turn(TurnSignal::clean(), 100);
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.load("a").unwrap().unwrap().clg.window.len(), 8);
        assert!(matches!(
            store.update("missing", &mut |_: &mut SessionRecord| {}),
            Err(CoreError::NotFound(_))
        ));
    }
}
