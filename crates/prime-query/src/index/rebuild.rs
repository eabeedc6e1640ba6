use std::path::Path;

use walkdir::WalkDir;

use super::writer::MemoryIndexWriter;
use crate::error::QueryError;
use crate::memory::{MemoryKind, NoteDocument};

/// Rebuild the index from scratch by reading every memory file under
/// `memory_dir`.
pub fn rebuild_index(memory_dir: &Path, index_path: &Path) -> Result<usize, QueryError> {
    // Remove existing index
    if index_path.exists() {
        std::fs::remove_dir_all(index_path).map_err(QueryError::Io)?;
    }

    let mut writer = MemoryIndexWriter::open(index_path)?;

    let mut count = 0;
    for entry in WalkDir::new(memory_dir)
        .max_depth(1)
        .into_iter()
        .filter_entry(|e| e.path() != index_path)
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy();
        let Some(kind) = MemoryKind::from_file_name(&name) else {
            continue;
        };
        match std::fs::read_to_string(entry.path()) {
            Ok(text) => {
                for note in NoteDocument::parse(kind, &text).notes() {
                    writer.index_note(note)?;
                    count += 1;
                }
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}", entry.path().display());
            }
        }
    }

    writer.commit()?;

    tracing::info!("Indexed {count} memory notes");
    Ok(count)
}
