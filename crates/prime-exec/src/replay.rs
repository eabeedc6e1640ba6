//! Rebuilding a run from a prior run directory and the cache.

use std::fs;
use std::path::Path;

use prime_core::cache::{CacheKey, CacheStore};
use prime_core::model::{Action, ActionId, ActionResult, ActionSpec, ErrorCode, StepKind};
use prime_core::parser::FenceParser;
use prime_core::runlog::{RunContext, RunDir};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ExecError;
use crate::handlers::HandlerContext;
use crate::keys::action_key;
use crate::registry::Resolution;

/// What a replay produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayReport {
    pub results: Vec<ActionResult>,
    /// Ids whose recomputed key had no cache entry.
    pub missing: Vec<String>,
}

/// Walks the `COMMAND` steps of a source run and serves each one from the
/// cache without invoking any handler.
pub struct Replayer<'a> {
    ctx: &'a HandlerContext,
    cache: &'a CacheStore,
    parser: &'a FenceParser,
}

impl<'a> Replayer<'a> {
    pub fn new(ctx: &'a HandlerContext, cache: &'a CacheStore, parser: &'a FenceParser) -> Self {
        Self { ctx, cache, parser }
    }

    /// Replay `source` into `run`. `USER` and `PLAN` steps are copied as
    /// they are. Actions that never reached a handler in the source run
    /// (parse errors, blocked or unregistered actions) get their logged
    /// result back; every other action is looked up by its recomputed key,
    /// which must match the key logged in the source run. A missing or
    /// mismatched entry writes a `WARN` step and replay moves on.
    pub fn replay(&self, source: &RunDir, run: &mut RunContext) -> Result<ReplayReport, ExecError> {
        let steps = source.steps()?;
        let mut report = ReplayReport::default();

        for (pos, (_, kind, path)) in steps.iter().enumerate() {
            match kind {
                StepKind::User | StepKind::Plan => {
                    run.append(kind.clone(), fs::read(path)?)?;
                }
                StepKind::Command(id) => {
                    let raw = fs::read_to_string(path)?;
                    run.append(StepKind::Command(id.clone()), &raw)?;
                    let logged = steps[pos + 1..]
                        .iter()
                        .find(|(_, k, _)| matches!(k, StepKind::Result(r) if r == id))
                        .map(|(_, _, p)| self.read_result(id, p))
                        .transpose()?
                        .flatten();
                    self.replay_action(run, id, &raw, logged, &mut report)?;
                }
                _ => {}
            }
        }

        info!(
            source = %source.name(),
            run = run.name(),
            actions = report.results.len(),
            missing = report.missing.len(),
            "Replay finished"
        );
        Ok(report)
    }

    fn replay_action(
        &self,
        run: &mut RunContext,
        id: &ActionId,
        raw: &str,
        logged: Option<ActionResult>,
        report: &mut ReplayReport,
    ) -> Result<(), ExecError> {
        if let Some(result) = logged.as_ref().filter(|r| r.cache_key.is_empty()) {
            debug!(id = %id, "Reusing logged result of an action that never ran");
            run.append_result(result)?;
            report.results.push(result.clone());
            return Ok(());
        }

        let key = match self.recompute_key(id, raw) {
            Ok(key) => key,
            Err(reason) => return self.missing(run, id, reason, report),
        };
        // The logged key is authoritative: a different recomputed key means
        // the inputs changed since the source run.
        if let Some(logged) = logged.as_ref().filter(|r| r.cache_key != key.as_str()) {
            let reason = format!(
                "inputs of {id} changed since the source run (logged {}, now {key})",
                logged.cache_key
            );
            return self.missing(run, id, reason, report);
        }
        match self.cache.lookup(&key)? {
            Some(cached) => {
                let result = cached.result.replayed_for(id.as_str());
                run.append_result(&result)?;
                run.append_stream(id, &cached.stream)?;
                report.results.push(result);
                Ok(())
            }
            None => self.missing(run, id, format!("no cache entry for {id} ({key})"), report),
        }
    }

    fn recompute_key(&self, id: &ActionId, raw: &str) -> Result<CacheKey, String> {
        let mut action = self.reparse(raw)?;
        action.header.id = id.clone();
        match self.ctx.registry.resolve(&action, &self.ctx.layout) {
            Resolution::Handler(kind) => {
                action_key(self.ctx, &action, kind).map_err(|e| format!("cannot compute key for {id}: {e}"))
            }
            Resolution::Unregistered { reason, .. } => {
                Err(format!("{id} no longer resolves to a handler: {reason}"))
            }
        }
    }

    fn reparse(&self, raw: &str) -> Result<Action, String> {
        match self.parser.parse(raw).into_iter().next() {
            Some(Ok(action)) => Ok(action),
            Some(Err(issue)) => Err(issue.to_string()),
            None => Err("no fence in logged command".into()),
        }
    }

    fn missing(
        &self,
        run: &mut RunContext,
        id: &ActionId,
        reason: String,
        report: &mut ReplayReport,
    ) -> Result<(), ExecError> {
        warn!(id = %id, reason = %reason, "Replay entry missing");
        run.append(StepKind::Warn, format!("{}\n", ErrorCode::ReplayMissingEntry.warning(&reason)))?;
        let result = ActionResult::error(id.as_str(), ErrorCode::ReplayMissingEntry, reason);
        run.append_result(&result)?;
        report.results.push(result);
        report.missing.push(id.to_string());
        Ok(())
    }

    /// Result logged for `id` in the source run, if the file still parses.
    fn read_result(&self, id: &ActionId, path: &Path) -> Result<Option<ActionResult>, ExecError> {
        let text = fs::read_to_string(path)?;
        let parsed = self.parser.parse(&text).into_iter().next();
        let Some(Ok(Action {
            spec: ActionSpec::Result(spec),
            ..
        })) = parsed
        else {
            warn!(id = %id, path = %path.display(), "Unreadable result step");
            return Ok(None);
        };
        Ok(spec
            .payload
            .as_ref()
            .and_then(|payload| ActionResult::from_payload(id.as_str(), payload).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::testing::{fixture, RecordingExecutor};
    use prime_core::model::Mode;
    use prime_core::parser::parse;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn labels(dir: &Path) -> Vec<String> {
        RunDir::open(dir)
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

    async fn recorded_run(
        tmp: &TempDir,
        reply: &str,
    ) -> (Arc<RecordingExecutor>, RunDir, Vec<ActionResult>) {
        let recorder = Arc::new(RecordingExecutor::default());
        let mut ctx = fixture(tmp);
        ctx.executor = recorder.clone();
        let mut run = RunContext::create(&ctx.layout.runs_dir(), "source", &ctx.env).unwrap();
        run.append(StepKind::User, "build it\n").unwrap();
        run.append(StepKind::Plan, reply).unwrap();
        let cache = Arc::new(CacheStore::open(ctx.layout.cache_dir()).unwrap());
        let dispatcher = Dispatcher::new(ctx, Mode::M4.constraints()).with_cache(cache);
        let report = dispatcher.dispatch(&mut run, parse(reply)).await.unwrap();
        run.finish().unwrap();
        (recorder, RunDir::open(run.dir()).unwrap(), report.results)
    }

    fn replay(tmp: &TempDir, source: &RunDir) -> (ReplayReport, RunDir) {
        let ctx = fixture(tmp);
        let cache = CacheStore::open(ctx.layout.cache_dir()).unwrap();
        let parser = FenceParser::default();
        let mut run = RunContext::create(&ctx.layout.runs_dir(), "replay", &ctx.env).unwrap();
        let report = Replayer::new(&ctx, &cache, &parser)
            .replay(source, &mut run)
            .unwrap();
        (report, RunDir::open(run.dir()).unwrap())
    }

    fn data_json(result: &ActionResult) -> String {
        serde_json::to_string(&result.data).unwrap()
    }

    #[tokio::test]
    async fn test_replay_serves_cache_without_running() {
        let tmp = TempDir::new().unwrap();
        let reply = "```run#r1 lang=\"sh\"\nmake\n```\n```run#r2 lang=\"cobol\"\nRUN.\n```\n";
        let (recorder, source, _) = recorded_run(&tmp, reply).await;
        assert_eq!(recorder.calls(), 1);

        let ctx = fixture(&tmp);
        let cache = CacheStore::open(ctx.layout.cache_dir()).unwrap();
        let parser = FenceParser::default();
        let mut run = RunContext::create(&ctx.layout.runs_dir(), "replay", &ctx.env).unwrap();
        let report = Replayer::new(&ctx, &cache, &parser)
            .replay(&source, &mut run)
            .unwrap();

        assert!(report.missing.is_empty());
        assert!(report.results[0].cache_hit);
        assert_eq!(report.results[0].for_id, "r1");
        assert_eq!(report.results[1].error_code(), Some(ErrorCode::UnknownHandler));
        assert_eq!(labels(run.dir()), labels(source.dir()));
    }

    #[tokio::test]
    async fn test_missing_entry_warns_and_continues() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "v1\n").unwrap();
        let reply = "```get#g1 path=\"a.txt\"\n```\n```run#r1 lang=\"sh\"\nmake\n```\n";
        let (_, source, _) = recorded_run(&tmp, reply).await;

        // The file changed since the source run, so its key has no entry.
        std::fs::write(tmp.path().join("a.txt"), "v2\n").unwrap();
        let ctx = fixture(&tmp);
        let cache = CacheStore::open(ctx.layout.cache_dir()).unwrap();
        let parser = FenceParser::default();
        let mut run = RunContext::create(&ctx.layout.runs_dir(), "replay", &ctx.env).unwrap();
        let report = Replayer::new(&ctx, &cache, &parser)
            .replay(&source, &mut run)
            .unwrap();

        assert_eq!(report.missing, ["g1"]);
        assert_eq!(report.results[0].error_code(), Some(ErrorCode::ReplayMissingEntry));
        assert!(report.results[1].cache_hit);
        assert_eq!(
            labels(run.dir()),
            [
                "USER",
                "PLAN",
                "COMMAND:g1",
                "WARN",
                "RESULT:g1",
                "COMMAND:r1",
                "RESULT:r1",
                "STREAM:r1"
            ]
        );
    }

    #[tokio::test]
    async fn test_unchanged_source_replays_identical_data() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "v1\n").unwrap();
        let reply = "```get#g1 path=\"a.txt\"\n```\n```get#g2 path=\"a.txt\" range=\"1..1\"\n```\n";
        let (_, source, original) = recorded_run(&tmp, reply).await;

        let (report, _) = replay(&tmp, &source);
        assert!(report.missing.is_empty());
        assert_eq!(report.results.len(), original.len());
        for (replayed, first) in report.results.iter().zip(&original) {
            assert!(replayed.cache_hit);
            assert_eq!(replayed.cache_key, first.cache_key);
            assert_eq!(data_json(replayed), data_json(first));
        }
    }

    #[tokio::test]
    async fn test_read_before_write_is_not_served_a_later_entry() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "v1\n").unwrap();
        let reply = "```get#g1 path=\"a.txt\"\n```\n\
                     ```set#s1 path=\"a.txt\"\nv2\n```\n\
                     ```get#g2 path=\"a.txt\"\n```\n";
        let (_, source, original) = recorded_run(&tmp, reply).await;
        assert!(data_json(&original[0]).contains("v1"));
        assert_ne!(original[0].cache_key, original[2].cache_key);

        let (report, run) = replay(&tmp, &source);
        assert_eq!(report.missing, ["g1"]);
        assert_eq!(report.results[0].error_code(), Some(ErrorCode::ReplayMissingEntry));
        assert!(labels(run.dir()).contains(&"WARN".to_string()));
        for i in [1, 2] {
            assert!(report.results[i].cache_hit, "{}", report.results[i].for_id);
            assert_eq!(data_json(&report.results[i]), data_json(&original[i]));
        }
    }
}
