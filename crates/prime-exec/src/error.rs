use prime_core::error::CoreError;
use prime_core::model::ErrorCode;
use prime_query::QueryError;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExecError {
    /// Code carried by the error result of a handler that could not run.
    pub fn code(&self) -> ErrorCode {
        match self {
            ExecError::Spawn { .. }
            | ExecError::NotFound(_)
            | ExecError::Rejected(_)
            | ExecError::Io(_) => ErrorCode::ExecFailure,
            ExecError::Registry(_)
            | ExecError::Task(_)
            | ExecError::Core(_)
            | ExecError::Query(_)
            | ExecError::Json(_) => ErrorCode::InternalFault,
        }
    }
}
