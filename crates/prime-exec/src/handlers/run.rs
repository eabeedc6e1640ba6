use std::path::PathBuf;

use prime_core::config::ExecConfig;
use prime_core::model::env::find_on_path;
use prime_core::model::{ActionSpec, ErrorCode, RunSpec};
use serde_json::json;

use super::{normalize, HandlerContext, Invocation, Outcome};
use crate::error::ExecError;
use crate::process::ShellRequest;

/// How a `lang` is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interpreter {
    pub program: &'static str,
    pub extension: &'static str,
    /// Shell languages get the body as a `-c` command string; the rest run
    /// a script file written to `artifacts/`.
    pub shell: bool,
}

impl Interpreter {
    /// Program to spawn. Plain `sh` follows the configured shell.
    pub fn program<'a>(&self, exec: &'a ExecConfig) -> &'a str {
        if self.program == "sh" {
            exec.shell.as_str()
        } else {
            self.program
        }
    }
}

pub fn interpreter(lang: &str) -> Option<Interpreter> {
    let (program, extension, shell) = match lang {
        "sh" | "shell" => ("sh", "sh", true),
        "bash" => ("bash", "sh", true),
        "zsh" => ("zsh", "zsh", true),
        "python" | "python3" | "py" => ("python3", "py", false),
        "node" | "js" | "javascript" => ("node", "js", false),
        "ruby" | "rb" => ("ruby", "rb", false),
        "perl" | "pl" => ("perl", "pl", false),
        "php" => ("php", "php", false),
        _ => return None,
    };
    Some(Interpreter {
        program,
        extension,
        shell,
    })
}

/// Toolchain identity for the cache key: the program and where it resolves.
pub fn toolchain(ctx: &HandlerContext, lang: &str) -> String {
    match interpreter(lang) {
        Some(interp) => {
            let program = interp.program(&ctx.exec);
            let location = find_on_path(program)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "not-found".into());
            format!("{program}@{location}")
        }
        None => format!("{lang}@unknown"),
    }
}

/// Absolute working directory of a `run`.
pub fn run_cwd(ctx: &HandlerContext, spec: &RunSpec) -> PathBuf {
    match spec.cwd.as_deref() {
        Some(cwd) => ctx.resolve(cwd),
        None => normalize(ctx.layout.workspace()),
    }
}

pub(super) async fn run_script(ctx: &HandlerContext, inv: &Invocation) -> Result<Outcome, ExecError> {
    let ActionSpec::Run(spec) = &inv.action.spec else {
        return Err(ExecError::Rejected("not a run action".into()));
    };
    let interp = interpreter(&spec.lang)
        .ok_or_else(|| ExecError::Rejected(format!("no interpreter for lang `{}`", spec.lang)))?;
    let program = interp.program(&ctx.exec);
    let cwd = run_cwd(ctx, spec);
    if !cwd.is_dir() {
        return Err(ExecError::NotFound(format!("working directory {}", cwd.display())));
    }

    let body = inv.action.header.body();
    let args: Vec<&str> = spec
        .args
        .as_deref()
        .map(|a| a.split_whitespace().collect())
        .unwrap_or_default();

    let mut script = None;
    let request = if interp.shell {
        ShellRequest::new(program, &cwd)
            .arg("-c")
            .arg(body)
            .arg("prime")
            .args(args)
    } else {
        let name = format!("{}.{}", inv.action.id(), interp.extension);
        let path = inv.artifacts_dir.join(&name);
        tokio::fs::create_dir_all(&inv.artifacts_dir).await?;
        tokio::fs::write(&path, body).await?;
        script = Some(name);
        ShellRequest::new(program, &cwd)
            .arg(path.to_string_lossy())
            .args(args)
    }
    .env(&ctx.env.env);

    let output = ctx.executor.execute(request, &inv.sink).await?;
    let (text, clipped) = ctx.clip(&output.output);
    let truncated = clipped || output.truncated;
    let mut data = json!({
        "lang": spec.lang,
        "exit_code": output.exit_code,
        "output": text,
    });
    if truncated {
        data["truncated"] = json!(true);
    }
    if let Some(name) = script {
        data["script"] = json!(format!("artifacts/{name}"));
    }

    let mut outcome = Outcome::new(data);
    if inv.verify && !output.success() {
        let detail = match output.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by a signal".to_string(),
        };
        outcome = outcome.warn(ErrorCode::ExecFailure.warning(detail));
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::invoke;
    use crate::process::StreamSink;
    use crate::registry::HandlerKind;
    use crate::testing::{fixture, invocation, RecordingExecutor};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_interpreter_table() {
        assert!(interpreter("sh").unwrap().shell);
        assert_eq!(interpreter("python").unwrap().program, "python3");
        assert_eq!(interpreter("js").unwrap().extension, "js");
        assert!(interpreter("cobol").is_none());

        let mut exec = ExecConfig::default();
        exec.shell = "bash".into();
        assert_eq!(interpreter("sh").unwrap().program(&exec), "bash");
        assert_eq!(interpreter("ruby").unwrap().program(&exec), "ruby");
    }

    #[tokio::test]
    async fn test_shell_body_runs_in_workspace() {
        let tmp = TempDir::new().unwrap();
        let ctx = fixture(&tmp);
        std::fs::write(tmp.path().join("marker.txt"), "x").unwrap();
        let inv = invocation(&tmp, "```run#r1 lang=\"sh\"\nls; echo done\n```", false);
        let outcome = invoke(&ctx, HandlerKind::RunScript, &inv).await.unwrap();
        assert_eq!(outcome.data["exit_code"], 0);
        let output = outcome.data["output"].as_str().unwrap();
        assert!(output.contains("marker.txt"));
        assert!(output.ends_with("done\n"));
        assert_eq!(inv.sink.captured(), output.as_bytes());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_data() {
        let tmp = TempDir::new().unwrap();
        let ctx = fixture(&tmp);
        let inv = invocation(&tmp, "```run#r1 lang=\"sh\"\nexit 4\n```", false);
        let outcome = invoke(&ctx, HandlerKind::RunScript, &inv).await.unwrap();
        assert_eq!(outcome.data["exit_code"], 4);
        assert!(outcome.warnings.is_empty());

        let inv = invocation(&tmp, "```run#r2 lang=\"sh\"\nexit 4\n```", true);
        let outcome = invoke(&ctx, HandlerKind::RunScript, &inv).await.unwrap();
        assert_eq!(outcome.warnings, vec!["EXEC_FAILURE: exit code 4"]);
    }

    #[tokio::test]
    async fn test_interpreted_body_goes_to_artifacts() {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(RecordingExecutor::default());
        let mut ctx = fixture(&tmp);
        ctx.executor = recorder.clone();
        let inv = invocation(
            &tmp,
            "```run#py1 lang=\"python\" args=\"--fast 3\"\nprint('hi')\n```",
            false,
        );
        let outcome = invoke(&ctx, HandlerKind::RunScript, &inv).await.unwrap();
        assert_eq!(outcome.data["script"], "artifacts/py1.py");

        let script = inv.artifacts_dir.join("py1.py");
        assert_eq!(std::fs::read_to_string(&script).unwrap(), "print('hi')");
        let request = recorder.last().unwrap();
        assert_eq!(request.program, "python3");
        assert_eq!(
            request.args,
            vec![script.to_string_lossy().to_string(), "--fast".into(), "3".into()]
        );
        assert_eq!(request.env, ctx.env.env);
    }

    #[tokio::test]
    async fn test_long_output_is_truncated() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = fixture(&tmp);
        ctx.exec.max_output_bytes = 16;
        let mut inv = invocation(&tmp, "```run#r1 lang=\"sh\"\nseq 1 1000\n```", false);
        inv.sink = StreamSink::capped(ctx.exec.max_output_bytes);
        let outcome = invoke(&ctx, HandlerKind::RunScript, &inv).await.unwrap();
        assert_eq!(outcome.data["truncated"], true);
        assert_eq!(outcome.data["output"].as_str().unwrap().len(), 16);
        assert_eq!(inv.sink.captured().len(), 16);
        assert!(inv.sink.written() > 16);
    }

    #[tokio::test]
    async fn test_missing_cwd() {
        let tmp = TempDir::new().unwrap();
        let ctx = fixture(&tmp);
        let inv = invocation(&tmp, "```run#r1 lang=\"sh\" cwd=\"nope\"\npwd\n```", false);
        let err = invoke(&ctx, HandlerKind::RunScript, &inv).await.unwrap_err();
        assert!(matches!(err, ExecError::NotFound(_)));
    }
}
