use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use prime_core::cache::{CacheStore, Cached, Flight};
use prime_core::governor::{
    turn_signal, DefaultPolicy, GuardrailPolicy, Severity, TurnSignal, Violation, ViolationKind,
};
use prime_core::model::{Action, ActionId, ActionResult, ErrorCode, ModeConstraints, StepKind};
use prime_core::parser::{ParseIssue, Parsed};
use prime_core::runlog::RunContext;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ExecError;
use crate::guardrail::Guardrails;
use crate::handlers::{self, HandlerContext, Invocation};
use crate::keys::action_key;
use crate::process::StreamSink;
use crate::registry::{HandlerKind, Resolution};

/// Everything one turn's dispatch produced, in fence order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnReport {
    pub results: Vec<ActionResult>,
    pub violations: Vec<Violation>,
}

impl TurnReport {
    pub fn ok_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn hit_count(&self) -> usize {
        self.results.iter().filter(|r| r.cache_hit).count()
    }
}

/// Executes parsed actions strictly one after another, logging each
/// action, its result and its stream into the run before the next starts.
pub struct Dispatcher {
    ctx: Arc<HandlerContext>,
    cache: Option<Arc<CacheStore>>,
    policy: Arc<dyn GuardrailPolicy>,
    guardrails: Guardrails,
    constraints: ModeConstraints,
}

impl Dispatcher {
    pub fn new(ctx: HandlerContext, constraints: ModeConstraints) -> Self {
        Self {
            ctx: Arc::new(ctx),
            cache: None,
            policy: Arc::new(DefaultPolicy),
            guardrails: Guardrails::default(),
            constraints,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn GuardrailPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_guardrails(mut self, guardrails: Guardrails) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    pub fn constraints(&self) -> ModeConstraints {
        self.constraints
    }

    /// Governor signal for a finished turn.
    pub fn signal(&self, report: &TurnReport) -> TurnSignal {
        turn_signal(&report.violations, self.policy.as_ref())
    }

    /// Dispatch one turn. Every non-`result` fence, malformed or not, ends
    /// up with exactly one logged result. Only run-log failures are errors.
    pub async fn dispatch(
        &self,
        run: &mut RunContext,
        parsed: Vec<Parsed>,
    ) -> Result<TurnReport, ExecError> {
        let mut report = TurnReport::default();
        let mut position = 0;
        for item in parsed {
            match item {
                Err(issue) => self.log_issue(run, &issue, &mut report)?,
                Ok(action) if action.is_result() => {
                    debug!(id = %action.id(), "Ignoring result fence in reply");
                }
                Ok(action) => {
                    let result = self
                        .dispatch_action(run, &action, position, &mut report.violations)
                        .await?;
                    report.results.push(result);
                    position += 1;
                }
            }
        }
        info!(
            run = run.name(),
            actions = report.results.len(),
            ok = report.ok_count(),
            hits = report.hit_count(),
            violations = report.violations.len(),
            "Turn dispatched"
        );
        Ok(report)
    }

    fn log_issue(
        &self,
        run: &mut RunContext,
        issue: &ParseIssue,
        report: &mut TurnReport,
    ) -> Result<(), ExecError> {
        report.violations.push(Violation {
            kind: ViolationKind::MalformedFence,
            action: issue.result_id(),
            detail: issue.message.clone(),
        });
        if issue.is_result_fence() {
            run.append(StepKind::Warn, format!("{issue}\n"))?;
            return Ok(());
        }
        let id = ActionId::parse(issue.result_id())?;
        run.append(StepKind::Command(id.clone()), &issue.raw)?;
        let result = ActionResult::error(
            id.as_str(),
            ErrorCode::ParseError,
            format!("line {}: {}", issue.line, issue.message),
        );
        run.append_result(&result)?;
        report.results.push(result);
        Ok(())
    }

    /// Log `action`, execute it (or serve it from the cache) and log the
    /// result and stream. `position` counts executable actions in the turn.
    pub async fn dispatch_action(
        &self,
        run: &mut RunContext,
        action: &Action,
        position: usize,
        violations: &mut Vec<Violation>,
    ) -> Result<ActionResult, ExecError> {
        let id = action.id().clone();
        run.append(StepKind::Command(id.clone()), &action.header.raw)?;

        let (result, stream) = match self.precheck(action, position, violations) {
            Err(result) => (result, Stream::None),
            Ok(kind) => self.execute(run, action, kind, position).await?,
        };

        run.append_result(&result)?;
        match stream {
            Stream::Live(sink) => {
                if let Some(file) = sink.take_file() {
                    run.commit_stream(file)?;
                }
            }
            Stream::Replayed(sink, bytes) => {
                if let Some(file) = sink.take_file() {
                    run.commit_stream(file)?;
                }
                run.append_stream(&id, &bytes)?;
            }
            Stream::None => {}
        }
        debug!(id = %id, status = ?result.status, hit = result.cache_hit, "Action done");
        Ok(result)
    }

    /// Plan limit, guardrails and handler resolution. An `Err` is the
    /// result to log instead of running anything.
    fn precheck(
        &self,
        action: &Action,
        position: usize,
        violations: &mut Vec<Violation>,
    ) -> Result<HandlerKind, ActionResult> {
        let id = action.id().as_str();
        let limit = self.constraints.max_actions;
        if position >= limit {
            let detail = format!("plan allows {limit} action(s) in this mode");
            violations.push(Violation {
                kind: ViolationKind::PlanLimit,
                action: id.to_string(),
                detail: detail.clone(),
            });
            return Err(ActionResult::error(id, ErrorCode::PlanLimitExceeded, detail));
        }

        let screened = self.guardrails.screen(action);
        let blocked = screened
            .iter()
            .find(|v| self.policy.classify(v) == Severity::Severe)
            .map(|v| v.detail.clone());
        violations.extend(screened);
        if let Some(detail) = blocked {
            warn!(id, detail = %detail, "Action blocked by guardrail");
            return Err(ActionResult::error(id, ErrorCode::GuardrailBlocked, detail));
        }

        match self.ctx.registry.resolve(action, &self.ctx.layout) {
            Resolution::Handler(kind) => Ok(kind),
            Resolution::Unregistered {
                verb,
                qualifier,
                reason,
            } => {
                let detail = format!("no handler for {verb} action=\"{qualifier}\": {reason}");
                violations.push(Violation {
                    kind: ViolationKind::UnknownHandler,
                    action: id.to_string(),
                    detail: detail.clone(),
                });
                Err(ActionResult::error(id, ErrorCode::UnknownHandler, detail))
            }
        }
    }

    async fn execute(
        &self,
        run: &RunContext,
        action: &Action,
        kind: HandlerKind,
        position: usize,
    ) -> Result<(ActionResult, Stream), ExecError> {
        let id = action.id().as_str();
        let key = match action_key(&self.ctx, action, kind) {
            Ok(key) => key,
            Err(e) => {
                let result = ActionResult::error(
                    id,
                    ErrorCode::InternalFault,
                    format!("cannot compute cache key: {e}"),
                );
                return Ok((result, Stream::None));
            }
        };

        let critical = kind.is_critical() || kind == HandlerKind::RunScript;
        let verify = self.constraints.verification.applies(position, critical);
        let timeout = action.header.timeout.unwrap_or(Duration::from_secs(
            self.ctx.exec.default_timeout_secs,
        ));
        let sink = StreamSink::to_file(
            run.open_stream(action.id())?,
            self.ctx.exec.max_output_bytes,
        );
        let invocation = || Invocation {
            action: action.clone(),
            sink: sink.clone(),
            artifacts_dir: run.artifacts_dir(),
            retrieval_dir: run.retrieval_dir(),
            verify,
        };

        let skip_cache = action.header.attrs.get("cache") == Some("skip");
        let cache = self.cache.as_ref().filter(|_| !skip_cache);
        let Some(cache) = cache else {
            let result = self.invoke(kind, invocation(), timeout).await.with_key(key.as_str());
            return Ok((result, Stream::Live(sink)));
        };

        let flight = cache
            .get_or_compute(&key, || async {
                let result = self.invoke(kind, invocation(), timeout).await.with_key(key.as_str());
                Cached {
                    result,
                    stream: sink.captured(),
                }
            })
            .await;
        let outcome = match flight {
            Ok(Flight::Hit(cached)) => {
                debug!(id, key = %key, "Served from cache");
                (
                    cached.result.replayed_for(id),
                    Stream::Replayed(sink, cached.stream),
                )
            }
            Ok(Flight::Computed { cached, warning }) => {
                let mut result = cached.result;
                result.warnings.extend(warning);
                (result, Stream::Live(sink))
            }
            Err(e) => {
                // The store could not be consulted, so the action runs
                // uncached.
                warn!(id, error = %e, "Cache unavailable");
                let result = self
                    .invoke(kind, invocation(), timeout)
                    .await
                    .with_key(key.as_str())
                    .with_warning(ErrorCode::CacheWriteFailed.warning(e));
                (result, Stream::Live(sink))
            }
        };
        Ok(outcome)
    }

    /// Run a handler on its own task so a panic or a timeout becomes an
    /// error result instead of tearing the turn down.
    async fn invoke(&self, kind: HandlerKind, inv: Invocation, timeout: Duration) -> ActionResult {
        let id = inv.action.id().to_string();
        let ctx = Arc::clone(&self.ctx);
        let mut task = tokio::spawn(async move { handlers::invoke(&ctx, kind, &inv).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(outcome))) => outcome.into_result(&id),
            Ok(Ok(Err(e))) => {
                debug!(id = %id, error = %e, "Handler failed");
                ActionResult::error(&id, e.code(), e.to_string())
            }
            Ok(Err(join)) => {
                let message = if join.is_panic() {
                    format!("handler panicked: {}", panic_message(join.into_panic()))
                } else {
                    "handler was cancelled".to_string()
                };
                warn!(id = %id, message = %message, "Handler fault");
                ActionResult::error(&id, ErrorCode::InternalFault, message)
            }
            Err(_) => {
                task.abort();
                let _ = task.await;
                warn!(id = %id, ?timeout, "Handler timed out");
                ActionResult::error(
                    &id,
                    ErrorCode::ExecTimeout,
                    format!("no result within {timeout:?}"),
                )
            }
        }
    }
}

/// What to log as the action's stream.
enum Stream {
    None,
    /// Written by the handler as it ran.
    Live(StreamSink),
    /// Bytes stored with a cache entry; the unused pending file is dropped.
    Replayed(StreamSink, Vec<u8>),
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, PanickingExecutor, RecordingExecutor};
    use prime_core::model::{Mode, Status};
    use prime_core::parser::parse;
    use prime_core::runlog::RunDir;
    use tempfile::TempDir;

    fn new_run(ctx: &HandlerContext) -> RunContext {
        RunContext::create(&ctx.layout.runs_dir(), "test", &ctx.env).unwrap()
    }

    fn labels(run: &RunContext) -> Vec<String> {
        RunDir::open(run.dir())
            .unwrap()
            .steps()
            .unwrap()
            .into_iter()
            .map(|(_, kind, _)| match kind.action_id() {
                Some(id) => format!("{}:{id}", kind.label()),
                None => kind.label().to_string(),
            })
            .collect()
    }

    fn cached_dispatcher(ctx: HandlerContext, mode: Mode) -> Dispatcher {
        let cache = CacheStore::open(ctx.layout.cache_dir()).unwrap();
        Dispatcher::new(ctx, mode.constraints()).with_cache(Arc::new(cache))
    }

    #[tokio::test]
    async fn test_steps_follow_fence_order() {
        let tmp = TempDir::new().unwrap();
        let ctx = fixture(&tmp);
        std::fs::write(tmp.path().join("a.txt"), "alpha\n").unwrap();
        let mut run = new_run(&ctx);
        let dispatcher = cached_dispatcher(ctx, Mode::M4);

        let reply = "```get#g1 path=\"a.txt\"\n```\n\
                     ```run#r1 lang=\"sh\"\necho hi\n```\n\
                     ```result#g1\n{\"status\":\"ok\"}\n```\n";
        let report = dispatcher.dispatch(&mut run, parse(reply)).await.unwrap();
        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(ActionResult::is_ok));
        assert!(report.violations.is_empty());
        assert_eq!(
            labels(&run),
            ["COMMAND:g1", "RESULT:g1", "COMMAND:r1", "RESULT:r1", "STREAM:r1"]
        );
        assert!(dispatcher.signal(&report).is_clean());
    }

    #[tokio::test]
    async fn test_second_run_is_served_from_cache() {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(RecordingExecutor::default());
        let mut ctx = fixture(&tmp);
        ctx.executor = recorder.clone();
        let mut run = new_run(&ctx);
        let dispatcher = cached_dispatcher(ctx, Mode::M4);

        let first = dispatcher
            .dispatch(&mut run, parse("```run#r1 lang=\"sh\"\nmake\n```"))
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(&mut run, parse("```run#r2 lang=\"sh\"\nmake\n```"))
            .await
            .unwrap();
        assert_eq!(recorder.calls(), 1);

        let (a, b) = (&first.results[0], &second.results[0]);
        assert!(!a.cache_hit);
        assert!(b.cache_hit);
        assert_eq!(b.for_id, "r2");
        assert_eq!(a.cache_key, b.cache_key);
        assert_eq!(a.data, b.data);
        assert_eq!(second.hit_count(), 1);
        assert_eq!(
            labels(&run),
            ["COMMAND:r1", "RESULT:r1", "STREAM:r1", "COMMAND:r2", "RESULT:r2", "STREAM:r2"]
        );
        let steps = RunDir::open(run.dir()).unwrap().steps().unwrap();
        let replayed = std::fs::read_to_string(&steps[5].2).unwrap();
        assert_eq!(replayed, "recorded\n");
    }

    #[tokio::test]
    async fn test_stream_file_keeps_output_past_the_cap() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = fixture(&tmp);
        ctx.exec.max_output_bytes = 32;
        let mut run = new_run(&ctx);
        let dispatcher = cached_dispatcher(ctx, Mode::M4);

        let report = dispatcher
            .dispatch(&mut run, parse("```run#r1 lang=\"sh\"\nseq 1 2000\n```"))
            .await
            .unwrap();
        let data = report.results[0].data.as_ref().unwrap();
        assert_eq!(data["truncated"], true);
        assert_eq!(data["output"].as_str().unwrap().len(), 32);

        let steps = RunDir::open(run.dir()).unwrap().steps().unwrap();
        let stream = std::fs::read_to_string(&steps[2].2).unwrap();
        assert!(stream.starts_with("1\n2\n"));
        assert!(stream.ends_with("1999\n2000\n"));
    }

    #[tokio::test]
    async fn test_cache_skip_reruns() {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(RecordingExecutor::default());
        let mut ctx = fixture(&tmp);
        ctx.executor = recorder.clone();
        let mut run = new_run(&ctx);
        let dispatcher = cached_dispatcher(ctx, Mode::M4);

        let reply = "```run#r1 lang=\"sh\"\nmake\n```\n\
                     ```run#r2 lang=\"sh\" cache=\"skip\"\nmake\n```\n";
        let report = dispatcher.dispatch(&mut run, parse(reply)).await.unwrap();
        assert_eq!(recorder.calls(), 2);
        assert!(report.results.iter().all(|r| !r.cache_hit));
    }

    #[tokio::test]
    async fn test_timeout_does_not_stop_the_turn() {
        let tmp = TempDir::new().unwrap();
        let ctx = fixture(&tmp);
        let mut run = new_run(&ctx);
        let dispatcher = Dispatcher::new(ctx, Mode::M4.constraints());

        let reply = "```run#slow lang=\"sh\" timeout=\"200ms\"\nsleep 5\n```\n\
                     ```run#next lang=\"sh\"\necho after\n```\n";
        let started = std::time::Instant::now();
        let report = dispatcher.dispatch(&mut run, parse(reply)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(report.results[0].error_code(), Some(ErrorCode::ExecTimeout));
        assert!(report.results[1].is_ok());
        assert_eq!(report.results[1].data.as_ref().unwrap()["output"], "after\n");
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_internal_fault() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = fixture(&tmp);
        ctx.executor = Arc::new(PanickingExecutor);
        let mut run = new_run(&ctx);
        let dispatcher = Dispatcher::new(ctx, Mode::M4.constraints());

        let report = dispatcher
            .dispatch(&mut run, parse("```run#r1 lang=\"sh\"\nls\n```\n```get#g1 action=\"env\"\n```"))
            .await
            .unwrap();
        let fault = &report.results[0];
        assert_eq!(fault.error_code(), Some(ErrorCode::InternalFault));
        assert!(fault.error.as_ref().unwrap().message.contains("executor exploded"));
        assert!(report.results[1].is_ok());
    }

    #[tokio::test]
    async fn test_plan_limit() {
        let tmp = TempDir::new().unwrap();
        let ctx = fixture(&tmp);
        let mut run = new_run(&ctx);
        let dispatcher = Dispatcher::new(ctx, Mode::M1.constraints());

        let reply = "```get#e1 action=\"env\"\n```\n```get#e2 action=\"env\"\n```\n";
        let report = dispatcher.dispatch(&mut run, parse(reply)).await.unwrap();
        assert!(report.results[0].is_ok());
        assert_eq!(report.results[1].error_code(), Some(ErrorCode::PlanLimitExceeded));
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::PlanLimit);
        assert_eq!(labels(&run), ["COMMAND:e1", "RESULT:e1", "COMMAND:e2", "RESULT:e2"]);
    }

    #[tokio::test]
    async fn test_destructive_run_is_blocked() {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(RecordingExecutor::default());
        let mut ctx = fixture(&tmp);
        ctx.executor = recorder.clone();
        let mut run = new_run(&ctx);
        let dispatcher = Dispatcher::new(ctx, Mode::M4.constraints());

        let report = dispatcher
            .dispatch(&mut run, parse("```run#r1 lang=\"sh\"\nrm -rf /\n```"))
            .await
            .unwrap();
        assert_eq!(recorder.calls(), 0);
        assert_eq!(report.results[0].error_code(), Some(ErrorCode::GuardrailBlocked));
        let signal = dispatcher.signal(&report);
        assert!(signal.severe);
        assert_eq!(signal.violations, 1);
    }

    #[tokio::test]
    async fn test_user_guardrail_pattern_blocks() {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(RecordingExecutor::default());
        let mut ctx = fixture(&tmp);
        ctx.executor = recorder.clone();
        std::fs::write(ctx.layout.guardrails_path(), "# infra\nterraform destroy\n").unwrap();
        let guardrails = Guardrails::load(&ctx.layout).unwrap();
        let mut run = new_run(&ctx);
        let dispatcher = Dispatcher::new(ctx, Mode::M4.constraints()).with_guardrails(guardrails);

        let report = dispatcher
            .dispatch(
                &mut run,
                parse("```run#r1 lang=\"sh\"\nterraform destroy -auto-approve\n```\n```run#r2 lang=\"sh\"\nterraform plan\n```"),
            )
            .await
            .unwrap();
        assert_eq!(report.results[0].error_code(), Some(ErrorCode::GuardrailBlocked));
        assert!(report.results[1].is_ok());
        assert_eq!(recorder.calls(), 1);
        assert!(dispatcher.signal(&report).severe);
    }

    #[tokio::test]
    async fn test_unknown_handler_and_parse_error() {
        let tmp = TempDir::new().unwrap();
        let ctx = fixture(&tmp);
        let mut run = new_run(&ctx);
        let dispatcher = cached_dispatcher(ctx, Mode::M4);

        let reply = "```run#r1 lang=\"cobol\"\nDISPLAY 'HI'.\n```\n\
                     ```get#g1 range=\"1..5\"\n```\n\
                     ```result#x1\nnot json\n```\n";
        let report = dispatcher.dispatch(&mut run, parse(reply)).await.unwrap();
        assert_eq!(report.results.len(), 2);
        let unknown = &report.results[0];
        assert_eq!(unknown.error_code(), Some(ErrorCode::UnknownHandler));
        assert!(unknown.cache_key.is_empty());
        assert_eq!(report.results[1].error_code(), Some(ErrorCode::ParseError));
        assert_eq!(report.results[1].status, Status::Error);

        let kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            [
                ViolationKind::UnknownHandler,
                ViolationKind::MalformedFence,
                ViolationKind::MalformedFence
            ]
        );
        assert_eq!(
            labels(&run),
            ["COMMAND:r1", "RESULT:r1", "COMMAND:g1", "RESULT:g1", "WARN"]
        );
        assert!(!dispatcher.signal(&report).severe);
    }
}
