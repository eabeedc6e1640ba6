//! The LLM collaborator: anything that turns an assembled prompt into a
//! reply.

mod command;
mod scripted;

use async_trait::async_trait;

pub use command::CommandBackend;
pub use scripted::ScriptedBackend;

use crate::error::AgentError;

#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Short backend identifier recorded in `env.json` and the session id.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// One reply to `prompt`. An unreachable backend is an error; an empty
    /// reply is returned as is.
    async fn complete(&self, prompt: &str) -> Result<String, AgentError>;
}
