//! The shell/process collaborator and the stream sink handlers write to.

mod executor;
mod sink;

pub use executor::{ProcessExecutor, ShellExecutor, ShellOutput, ShellRequest};
pub use sink::StreamSink;
