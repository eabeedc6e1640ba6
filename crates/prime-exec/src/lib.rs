//! Execution side of Prime: the shell/process collaborator, the typed
//! handler registry and verb handlers, guardrails, the serial dispatcher
//! and the replay driver.

pub mod dispatcher;
pub mod error;
pub mod guardrail;
pub mod handlers;
pub mod keys;
pub mod process;
pub mod registry;
pub mod replay;

#[cfg(test)]
mod testing;

pub use dispatcher::{Dispatcher, TurnReport};
pub use error::ExecError;
pub use guardrail::Guardrails;
pub use handlers::HandlerContext;
pub use process::{ProcessExecutor, ShellExecutor, ShellOutput, ShellRequest, StreamSink};
pub use registry::{HandlerKind, HandlerRegistry, RegistryFile, Resolution};
pub use replay::{ReplayReport, Replayer};
