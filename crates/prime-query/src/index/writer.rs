use std::path::Path;

use tantivy::{doc, Index, IndexWriter, TantivyDocument, Term};

use super::schema::MemorySchema;
use crate::error::QueryError;
use crate::memory::{MemoryKind, MemoryNote};

/// Writes memory notes to the Tantivy index.
pub struct MemoryIndexWriter {
    schema: MemorySchema,
    index: Index,
    writer: IndexWriter,
}

impl MemoryIndexWriter {
    /// Open or create an index at the given path.
    pub fn open(path: &Path) -> Result<Self, QueryError> {
        let schema = MemorySchema::new();
        let index = if path.join("meta.json").exists() {
            Index::open_in_dir(path)?
        } else {
            std::fs::create_dir_all(path).map_err(QueryError::Io)?;
            Index::create_in_dir(path, schema.schema.clone())?
        };

        // 50MB heap for indexing
        let writer = index.writer(50_000_000)?;

        Ok(Self {
            schema,
            index,
            writer,
        })
    }

    /// Index a single note.
    pub fn index_note(&mut self, note: &MemoryNote) -> Result<(), QueryError> {
        let s = &self.schema;
        let created_at =
            tantivy::DateTime::from_timestamp_secs(note.added_at.map_or(0, |t| t.timestamp()));

        let mut document: TantivyDocument = doc!(
            s.note_id => note.note_id(),
            s.kind => note.kind.as_str(),
            s.category => note.category.as_str(),
            s.content => note.content.as_str(),
            s.path => note.kind.locator(),
            s.created_at => created_at,
        );
        for tag in note_tags(note) {
            document.add_text(s.tags, tag);
        }
        self.writer.add_document(document)?;
        Ok(())
    }

    /// Drop every note of one kind (before re-adding or after clearing it).
    pub fn delete_kind(&mut self, kind: MemoryKind) {
        let term = Term::from_field_text(self.schema.kind, kind.as_str());
        self.writer.delete_term(term);
    }

    /// Commit all pending changes.
    pub fn commit(&mut self) -> Result<(), QueryError> {
        self.writer.commit()?;
        Ok(())
    }

    pub fn index(&self) -> &Index {
        &self.index
    }
}

/// Tags of a note: its kind, its category and any `#word` in the content,
/// lowercased.
pub fn note_tags(note: &MemoryNote) -> Vec<String> {
    let mut tags = vec![note.kind.as_str().to_string(), note.category.to_lowercase()];
    for word in note.content.split_whitespace() {
        if let Some(tag) = word.strip_prefix('#') {
            let tag: String = tag
                .chars()
                .take_while(|c| c.is_alphanumeric() || matches!(c, '-' | '_'))
                .collect();
            if !tag.is_empty() {
                tags.push(tag.to_lowercase());
            }
        }
    }
    tags.sort();
    tags.dedup();
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_tags() {
        let note = MemoryNote {
            kind: MemoryKind::LongTerm,
            category: "Projects".into(),
            content: "ship #Release-1 after #qa, not #".into(),
            added_at: None,
        };
        assert_eq!(
            note_tags(&note),
            vec!["long_term", "projects", "qa", "release-1"]
        );
    }
}
