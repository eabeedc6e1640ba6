//! The agent side of Prime: LLM backends, prompt assembly, the capability
//! probe battery and the turn loop that ties parsing, dispatch and the
//! governor together.

pub mod agent;
pub mod backend;
pub mod error;
pub mod profile;
pub mod prompt;

pub use agent::{Agent, ProfileOutcome, TurnOutcome};
pub use backend::{CommandBackend, LlmBackend, ScriptedBackend};
pub use error::AgentError;
