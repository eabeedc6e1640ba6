use prime_core::error::CoreError;
use prime_exec::ExecError;
use prime_query::QueryError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Backend unreachable: {0}")]
    Backend(String),

    #[error("Backend returned an empty reply")]
    EmptyReply,

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Exec error: {0}")]
    Exec(#[from] ExecError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
