use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    ShortTerm,
    LongTerm,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 2] = [MemoryKind::ShortTerm, MemoryKind::LongTerm];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::ShortTerm => "short_term",
            MemoryKind::LongTerm => "long_term",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            MemoryKind::ShortTerm => "short_term.md",
            MemoryKind::LongTerm => "long_term.md",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            MemoryKind::ShortTerm => "# Prime Short-term Memory",
            MemoryKind::LongTerm => "# Prime Long-term Memory",
        }
    }

    /// Accepts `short`, `short_term`, `long`, `long_term`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" | "short_term" | "short-term" => Some(MemoryKind::ShortTerm),
            "long" | "long_term" | "long-term" => Some(MemoryKind::LongTerm),
            _ => None,
        }
    }

    /// `memory://short_term` style locator.
    pub fn locator(&self) -> String {
        format!("memory://{}", self.as_str())
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.file_name() == name)
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNote {
    pub kind: MemoryKind,
    pub category: String,
    pub content: String,
    pub added_at: Option<DateTime<Utc>>,
}

impl MemoryNote {
    /// Stable identity used as the index key.
    pub fn note_id(&self) -> String {
        let stamp = self
            .added_at
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default();
        let digest = prime_core::cache::content_digest(
            format!("{}\n{}\n{}\n{stamp}", self.kind, self.category, self.content).as_bytes(),
        );
        digest[..16].to_string()
    }

    fn render(&self) -> String {
        match self.added_at {
            Some(t) => format!("- {} (added: {})", self.content, t.format(TIMESTAMP_FORMAT)),
            None => format!("- {}", self.content),
        }
    }

    fn parse_entry(kind: MemoryKind, category: &str, line: &str) -> Option<Self> {
        let entry = line.strip_prefix("- ")?;
        let (content, added_at) = match entry.rfind(" (added: ") {
            Some(pos) if entry.ends_with(')') => {
                let stamp = &entry[pos + " (added: ".len()..entry.len() - 1];
                let added = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
                    .ok()
                    .map(|dt| dt.and_utc());
                match added {
                    Some(t) => (&entry[..pos], Some(t)),
                    None => (entry, None),
                }
            }
            _ => (entry, None),
        };
        Some(Self {
            kind,
            category: category.to_string(),
            content: content.trim().to_string(),
            added_at,
        })
    }
}

/// One memory file: a title, then `## <category>` sections of
/// `- <content> (added: <timestamp>)` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteDocument {
    pub kind: MemoryKind,
    sections: Vec<(String, Vec<MemoryNote>)>,
}

impl NoteDocument {
    pub fn empty(kind: MemoryKind) -> Self {
        Self {
            kind,
            sections: Vec::new(),
        }
    }

    /// Lines outside a category section and unknown lines are dropped.
    pub fn parse(kind: MemoryKind, text: &str) -> Self {
        let mut doc = Self::empty(kind);
        let mut current: Option<usize> = None;
        for line in text.lines() {
            if let Some(category) = line.strip_prefix("## ") {
                current = Some(doc.section_index(category.trim()));
            } else if let Some(index) = current {
                if let Some(note) = MemoryNote::parse_entry(kind, &doc.sections[index].0, line) {
                    doc.sections[index].1.push(note);
                }
            }
        }
        doc
    }

    fn section_index(&mut self, category: &str) -> usize {
        match self.sections.iter().position(|(c, _)| c == category) {
            Some(i) => i,
            None => {
                self.sections.push((category.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!("{}\n\n", self.kind.title());
        for (category, notes) in &self.sections {
            out.push_str(&format!("## {category}\n"));
            for note in notes {
                out.push_str(&note.render());
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }

    /// Add a note at the end of its category, creating the section.
    pub fn add(&mut self, category: &str, content: &str) -> Result<MemoryNote, QueryError> {
        let category = category.trim();
        let content = content.trim();
        if category.is_empty() || category.contains('\n') {
            return Err(QueryError::Memory(format!("invalid category {category:?}")));
        }
        if content.is_empty() {
            return Err(QueryError::Memory("memory content is empty".into()));
        }
        // One entry per line keeps the file parseable.
        let content = content.split_whitespace().collect::<Vec<_>>().join(" ");
        let note = MemoryNote {
            kind: self.kind,
            category: category.to_string(),
            content,
            added_at: Some(Utc::now()),
        };
        let index = self.section_index(category);
        self.sections[index].1.push(note.clone());
        Ok(note)
    }

    pub fn categories(&self) -> Vec<&str> {
        self.sections.iter().map(|(c, _)| c.as_str()).collect()
    }

    pub fn notes(&self) -> impl Iterator<Item = &MemoryNote> {
        self.sections.iter().flat_map(|(_, notes)| notes.iter())
    }
}
