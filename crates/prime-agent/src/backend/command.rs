use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use prime_exec::{ShellExecutor, ShellRequest, StreamSink};
use tracing::debug;

use super::LlmBackend;
use crate::error::AgentError;

/// Runs a configured shell command per request: the prompt goes to its
/// stdin and everything it prints is the reply. `PRIME_MODEL` carries the
/// model name.
pub struct CommandBackend {
    command: String,
    model: String,
    shell: String,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    executor: Arc<dyn ShellExecutor>,
}

impl CommandBackend {
    pub fn new(
        command: impl Into<String>,
        model: impl Into<String>,
        executor: Arc<dyn ShellExecutor>,
    ) -> Self {
        Self {
            command: command.into(),
            model: model.into(),
            shell: "sh".into(),
            cwd: PathBuf::from("."),
            env: BTreeMap::new(),
            executor,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

#[async_trait]
impl LlmBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, AgentError> {
        let mut env = self.env.clone();
        env.insert("PRIME_MODEL".into(), self.model.clone());
        let request = ShellRequest::new(&self.shell, &self.cwd)
            .arg("-c")
            .arg(&self.command)
            .env(&env)
            .stdin(prompt);

        let output = self
            .executor
            .execute(request, &StreamSink::detached())
            .await
            .map_err(|e| AgentError::Backend(e.to_string()))?;
        debug!(
            command = %self.command,
            exit_code = ?output.exit_code,
            bytes = output.output.len(),
            "Backend command finished"
        );
        if !output.success() {
            let text = output.text();
            let lines: Vec<&str> = text.lines().collect();
            let tail = lines[lines.len().saturating_sub(5)..].join("\n");
            return Err(AgentError::Backend(match output.exit_code {
                Some(code) => format!("`{}` exited with code {code}: {tail}", self.command),
                None => format!("`{}` was killed by a signal", self.command),
            }));
        }
        Ok(output.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_exec::ProcessExecutor;

    fn backend(command: &str) -> CommandBackend {
        let path = std::env::var("PATH").unwrap_or_default();
        CommandBackend::new(command, "echo-model", Arc::new(ProcessExecutor))
            .with_env(BTreeMap::from([("PATH".to_string(), path)]))
    }

    #[tokio::test]
    async fn test_prompt_goes_to_stdin() {
        let reply = backend("tr a-z A-Z").complete("read the readme").await.unwrap();
        assert_eq!(reply, "READ THE README");
    }

    #[tokio::test]
    async fn test_model_is_exported() {
        let reply = backend("printf %s \"$PRIME_MODEL\"").complete("").await.unwrap();
        assert_eq!(reply, "echo-model");
    }

    #[tokio::test]
    async fn test_failing_command_is_unreachable() {
        let err = backend("echo down; exit 7").complete("hi").await.unwrap_err();
        match err {
            AgentError::Backend(message) => {
                assert!(message.contains("code 7"), "{message}");
                assert!(message.contains("down"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
