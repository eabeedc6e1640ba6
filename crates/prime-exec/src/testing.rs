//! Fixtures shared by the unit tests.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use prime_core::config::ExecConfig;
use prime_core::model::{Action, EnvSnapshot};
use prime_core::parser::parse;
use prime_core::PrimeLayout;
use prime_query::MemoryStore;
use tempfile::TempDir;

use crate::error::ExecError;
use crate::handlers::{HandlerContext, Invocation};
use crate::process::{ProcessExecutor, ShellExecutor, ShellOutput, ShellRequest, StreamSink};
use crate::registry::HandlerRegistry;

pub fn fixture(tmp: &TempDir) -> HandlerContext {
    context(tmp.path())
}

pub fn context(workspace: &Path) -> HandlerContext {
    let layout = PrimeLayout::new(workspace);
    layout.create_dirs().unwrap();
    let exec = ExecConfig::default();
    let env = EnvSnapshot::capture("test", "test-model", workspace, &exec.env_allowlist);
    HandlerContext {
        memory: MemoryStore::open(&layout).unwrap(),
        registry: HandlerRegistry::default(),
        executor: Arc::new(ProcessExecutor),
        layout,
        exec,
        env,
    }
}

pub fn action(text: &str) -> Action {
    parse(text).into_iter().next().unwrap().unwrap()
}

pub fn invocation(tmp: &TempDir, text: &str, verify: bool) -> Invocation {
    Invocation {
        action: action(text),
        sink: StreamSink::detached(),
        artifacts_dir: tmp.path().join("run/artifacts"),
        retrieval_dir: tmp.path().join("run/retrieval"),
        verify,
    }
}

/// Records requests instead of spawning anything and echoes a fixed reply
/// into the stream.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    requests: Mutex<Vec<ShellRequest>>,
}

impl RecordingExecutor {
    pub fn last(&self) -> Option<ShellRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ShellExecutor for RecordingExecutor {
    async fn execute(
        &self,
        request: ShellRequest,
        sink: &StreamSink,
    ) -> Result<ShellOutput, ExecError> {
        self.requests.lock().unwrap().push(request);
        sink.write(b"recorded\n");
        Ok(ShellOutput {
            exit_code: Some(0),
            output: b"recorded\n".to_vec(),
            truncated: false,
        })
    }
}

/// Panics on every call.
#[derive(Debug, Default)]
pub struct PanickingExecutor;

#[async_trait]
impl ShellExecutor for PanickingExecutor {
    async fn execute(
        &self,
        _request: ShellRequest,
        _sink: &StreamSink,
    ) -> Result<ShellOutput, ExecError> {
        panic!("executor exploded")
    }
}
