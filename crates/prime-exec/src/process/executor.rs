use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use super::sink::StreamSink;
use crate::error::ExecError;

const READ_CHUNK: usize = 8 * 1024;

/// A process to run: program, arguments, working directory and the complete
/// environment it sees.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub stdin: Option<String>,
}

impl ShellRequest {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env = env.clone();
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// Exit status and the combined stdout/stderr of a finished process, as far
/// as the sink kept it in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub output: Vec<u8>,
    /// The process wrote more than the sink keeps.
    pub truncated: bool,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Runs processes for the handlers. Output is streamed to the sink as it
/// arrives; the returned output is what the sink captured.
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    async fn execute(&self, request: ShellRequest, sink: &StreamSink)
        -> Result<ShellOutput, ExecError>;
}

/// [`ShellExecutor`] on top of `tokio::process`. The child only sees the
/// request's environment and is killed if the future is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl ShellExecutor for ProcessExecutor {
    async fn execute(
        &self,
        request: ShellRequest,
        sink: &StreamSink,
    ) -> Result<ShellOutput, ExecError> {
        debug!(program = %request.program, cwd = %request.cwd.display(), "Spawning process");
        let spawn_error = |e: std::io::Error| ExecError::Spawn {
            program: request.program.clone(),
            message: e.to_string(),
        };

        let mut child = Command::new(&request.program)
            .args(&request.args)
            .current_dir(&request.cwd)
            .env_clear()
            .envs(&request.env)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let (Some(input), Some(mut stdin)) = (request.stdin.clone(), child.stdin.take()) {
            // Fed from its own task so a child that writes before reading
            // cannot fill both pipes. Dropping stdin closes it.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(error = %e, "Child closed stdin early");
                }
            });
        }

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Rejected("child stdout was not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Rejected("child stderr was not captured".into()))?;

        let mut out_buf = vec![0u8; READ_CHUNK];
        let mut err_buf = vec![0u8; READ_CHUNK];
        let (mut out_done, mut err_done) = (false, false);
        while !(out_done && err_done) {
            tokio::select! {
                n = stdout.read(&mut out_buf), if !out_done => {
                    match n? {
                        0 => out_done = true,
                        n => sink.write(&out_buf[..n]),
                    }
                }
                n = stderr.read(&mut err_buf), if !err_done => {
                    match n? {
                        0 => err_done = true,
                        n => sink.write(&err_buf[..n]),
                    }
                }
            }
        }

        let status = child.wait().await?;
        debug!(program = %request.program, code = ?status.code(), "Process exited");
        Ok(ShellOutput {
            exit_code: status.code(),
            output: sink.captured(),
            truncated: sink.truncated(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_core::model::env::allowlisted_env;

    fn request(script: &str) -> ShellRequest {
        ShellRequest::new("sh", std::env::temp_dir())
            .arg("-c")
            .arg(script)
            .env(&allowlisted_env(&["PATH".to_string()]))
    }

    #[tokio::test]
    async fn test_combined_output_is_streamed() {
        let sink = StreamSink::detached();
        let out = ProcessExecutor
            .execute(request("echo out; echo err 1>&2"), &sink)
            .await
            .unwrap();
        assert!(out.success());
        let text = out.text();
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
        assert_eq!(sink.captured(), out.output);
    }

    #[tokio::test]
    async fn test_large_output_is_capped_in_memory() {
        let sink = StreamSink::capped(1000);
        let out = ProcessExecutor
            .execute(request("yes x | head -c 200000"), &sink)
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.output.len(), 1000);
        assert!(out.truncated);
        assert_eq!(sink.written(), 200_000);
    }

    #[tokio::test]
    async fn test_exit_code_and_clean_env() {
        std::env::set_var("PRIME_EXEC_SECRET", "hidden");
        let sink = StreamSink::detached();
        let out = ProcessExecutor
            .execute(request("echo \"[$PRIME_EXEC_SECRET]\"; exit 3"), &sink)
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.text(), "[]\n");
    }

    #[tokio::test]
    async fn test_stdin_is_passed() {
        let sink = StreamSink::detached();
        let out = ProcessExecutor
            .execute(request("cat").stdin("piped"), &sink)
            .await
            .unwrap();
        assert_eq!(out.text(), "piped");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let sink = StreamSink::detached();
        let err = ProcessExecutor
            .execute(ShellRequest::new("prime-no-such-binary", "."), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
