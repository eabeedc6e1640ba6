use std::fs;
use std::path::{Path, PathBuf};

use prime_core::model::ErrorCode;
use prime_core::PrimeLayout;
use serde::Serialize;
use tracing::{debug, warn};

use super::notes::{MemoryKind, MemoryNote, NoteDocument};
use crate::error::QueryError;
use crate::index::{rebuild_index, MemoryIndexWriter, MemorySearcher, SearchHit};

/// Outcome of a memory write. The file write succeeded; `warning` is set
/// when the index could not be updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryWrite {
    pub kind: MemoryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<MemoryNote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// The memory notes plus their search index, kept in step: every write is
/// indexed before it returns.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    dir: PathBuf,
    index_dir: PathBuf,
}

impl MemoryStore {
    pub fn open(layout: &PrimeLayout) -> Result<Self, QueryError> {
        Self::at(layout.memory_dir(), layout.memory_index_dir())
    }

    pub fn at(dir: impl Into<PathBuf>, index_dir: impl Into<PathBuf>) -> Result<Self, QueryError> {
        let store = Self {
            dir: dir.into(),
            index_dir: index_dir.into(),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create both memory files if missing.
    pub fn initialize(&self) -> Result<(), QueryError> {
        fs::create_dir_all(&self.dir)?;
        for kind in MemoryKind::ALL {
            let path = self.path(kind);
            if !path.exists() {
                fs::write(&path, NoteDocument::empty(kind).render())?;
            }
        }
        Ok(())
    }

    pub fn path(&self, kind: MemoryKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn document(&self, kind: MemoryKind) -> Result<NoteDocument, QueryError> {
        let text = fs::read_to_string(self.path(kind))?;
        Ok(NoteDocument::parse(kind, &text))
    }

    /// Raw file text; `None` reads both, short-term first.
    pub fn read(&self, kind: Option<MemoryKind>) -> Result<String, QueryError> {
        match kind {
            Some(kind) => Ok(fs::read_to_string(self.path(kind))?),
            None => Ok(format!(
                "{}\n\n{}",
                fs::read_to_string(self.path(MemoryKind::ShortTerm))?,
                fs::read_to_string(self.path(MemoryKind::LongTerm))?
            )),
        }
    }

    pub fn add(&self, kind: MemoryKind, category: &str, content: &str) -> Result<MemoryWrite, QueryError> {
        let mut doc = self.document(kind)?;
        let note = doc.add(category, content)?;
        fs::write(self.path(kind), doc.render())?;
        debug!(kind = %kind, category, "Added memory note");

        let warning = self
            .index_with(|writer| writer.index_note(&note))
            .err()
            .map(|e| {
                warn!(error = %e, "Memory index update failed");
                ErrorCode::IndexWriteFailed.warning(e)
            });
        Ok(MemoryWrite {
            kind,
            note: Some(note),
            warning,
        })
    }

    /// Reset short-term memory to an empty document.
    pub fn clear_short_term(&self) -> Result<MemoryWrite, QueryError> {
        let kind = MemoryKind::ShortTerm;
        fs::write(self.path(kind), NoteDocument::empty(kind).render())?;
        let warning = self
            .index_with(|writer| {
                writer.delete_kind(kind);
                Ok(())
            })
            .err()
            .map(|e| {
                warn!(error = %e, "Memory index update failed");
                ErrorCode::IndexWriteFailed.warning(e)
            });
        Ok(MemoryWrite {
            kind,
            note: None,
            warning,
        })
    }

    pub fn categories(&self, kind: Option<MemoryKind>) -> Result<Vec<String>, QueryError> {
        let mut categories = Vec::new();
        for k in kinds(kind) {
            categories.extend(self.document(k)?.categories().into_iter().map(String::from));
        }
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    /// Top-`limit` notes for `query`, optionally restricted to `tags`.
    pub fn search(&self, query: &str, tags: &[String], limit: usize) -> Result<Vec<SearchHit>, QueryError> {
        if !self.index_dir.join("meta.json").exists() {
            self.reindex()?;
        }
        MemorySearcher::open(&self.index_dir)?.search(query, tags, limit)
    }

    /// Rebuild the index from the note files.
    pub fn reindex(&self) -> Result<usize, QueryError> {
        rebuild_index(&self.dir, &self.index_dir)
    }

    /// Short summary for prompts: categories and the latest short-term notes.
    pub fn summary(&self, recent: usize) -> Result<String, QueryError> {
        let mut out = String::new();
        let categories = self.categories(None)?;
        if !categories.is_empty() {
            out.push_str("Known categories: ");
            out.push_str(&categories.join(", "));
            out.push('\n');
        }
        let doc = self.document(MemoryKind::ShortTerm)?;
        let notes: Vec<&MemoryNote> = doc.notes().collect();
        for note in notes.iter().rev().take(recent).rev() {
            out.push_str(&format!("- [{}] {}\n", note.category, note.content));
        }
        Ok(out)
    }

    fn index_with(
        &self,
        f: impl FnOnce(&mut MemoryIndexWriter) -> Result<(), QueryError>,
    ) -> Result<(), QueryError> {
        if !self.index_dir.join("meta.json").exists() {
            // A fresh index picks the new note up from the files.
            self.reindex()?;
            return Ok(());
        }
        let mut writer = MemoryIndexWriter::open(&self.index_dir)?;
        f(&mut writer)?;
        writer.commit()
    }
}

fn kinds(kind: Option<MemoryKind>) -> Vec<MemoryKind> {
    match kind {
        Some(k) => vec![k],
        None => MemoryKind::ALL.to_vec(),
    }
}
