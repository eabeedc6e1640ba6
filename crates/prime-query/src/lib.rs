//! Memory notes and the search collaborator behind `get action="search"`.

pub mod error;
pub mod index;
pub mod memory;

pub use error::QueryError;
pub use index::{MemorySearcher, SearchHit};
pub use memory::{MemoryKind, MemoryNote, MemoryStore, MemoryWrite};
