pub mod reader;
pub mod rebuild;
pub mod schema;
pub mod writer;

pub use reader::{MemorySearcher, SearchHit};
pub use rebuild::rebuild_index;
pub use writer::MemoryIndexWriter;
