mod notes;
mod store;

pub use notes::{MemoryKind, MemoryNote, NoteDocument};
pub use store::{MemoryStore, MemoryWrite};
