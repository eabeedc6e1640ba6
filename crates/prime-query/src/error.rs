use prime_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Index error: {0}")]
    Index(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<tantivy::TantivyError> for QueryError {
    fn from(e: tantivy::TantivyError) -> Self {
        QueryError::Index(e.to_string())
    }
}

impl From<walkdir::Error> for QueryError {
    fn from(e: walkdir::Error) -> Self {
        QueryError::Io(e.into())
    }
}
