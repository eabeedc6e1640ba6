use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Prime is not initialized here (run `prime init`)")]
    NotInitialized,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid ID: {0}")]
    InvalidId(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Run log error: {0}")]
    RunLog(String),
}
