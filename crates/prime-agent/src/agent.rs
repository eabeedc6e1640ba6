//! One user turn, end to end: log the message, ask the backend, dispatch
//! the reply and feed the outcome to the governor.

use std::path::PathBuf;
use std::sync::Arc;

use prime_core::cache::CacheStore;
use prime_core::governor::{
    CapabilityRecord, DefaultPolicy, GuardrailPolicy, Transition, TurnSignal,
};
use prime_core::model::{EnvSnapshot, Mode, StepKind};
use prime_core::parser::{FenceParser, Parsed};
use prime_core::runlog::{slugify, RunContext};
use prime_core::sessions::{session_id_for, SessionRecord, SessionStore};
use prime_core::{PrimeConfig, PrimeLayout};
use prime_exec::{
    Dispatcher, Guardrails, HandlerContext, HandlerRegistry, ShellExecutor, TurnReport,
};
use prime_query::MemoryStore;
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::LlmBackend;
use crate::error::AgentError;
use crate::profile::{run_probes, PROBES_DIR};
use crate::prompt::{build_prompt, recent_history, PromptContext};

/// Earlier turns included in the prompt.
const HISTORY_TURNS: usize = 3;
/// Short-term notes included in the prompt.
const MEMORY_NOTES: usize = 20;

/// What a finished turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub run: String,
    pub run_dir: PathBuf,
    pub session: String,
    /// Mode the turn ran under.
    pub mode: Mode,
    pub report: TurnReport,
    pub signal: TurnSignal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileOutcome {
    pub session: String,
    pub caps: CapabilityRecord,
    pub mode: Mode,
}

pub struct Agent {
    layout: PrimeLayout,
    config: PrimeConfig,
    backend: Arc<dyn LlmBackend>,
    executor: Arc<dyn ShellExecutor>,
    sessions: Arc<dyn SessionStore>,
    policy: Arc<dyn GuardrailPolicy>,
}

impl Agent {
    pub fn new(
        layout: PrimeLayout,
        config: PrimeConfig,
        backend: Arc<dyn LlmBackend>,
        executor: Arc<dyn ShellExecutor>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            layout,
            config,
            backend,
            executor,
            sessions,
            policy: Arc::new(DefaultPolicy),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn GuardrailPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn session_id(&self) -> String {
        session_id_for(self.backend.name(), self.backend.model())
    }

    pub fn session(&self) -> Result<SessionRecord, AgentError> {
        Ok(self.sessions.load_or_create(
            &self.session_id(),
            self.backend.name(),
            self.backend.model(),
            self.config.governor.initial_mode,
        )?)
    }

    /// Run the probe battery and record it on the session.
    pub async fn profile(&self) -> Result<ProfileOutcome, AgentError> {
        let session = self.session()?;
        let transcripts = self.layout.session_dir(&session.id).join(PROBES_DIR);
        let caps = run_probes(self.backend.as_ref(), Some(&transcripts)).await?;
        let session = self
            .sessions
            .update(&session.id, &mut |s: &mut SessionRecord| s.apply_caps(caps.clone()))?;
        Ok(ProfileOutcome {
            session: session.id,
            caps,
            mode: session.clg.mode,
        })
    }

    /// Handle one user message. Fails only when the run log cannot be
    /// written or the backend gives no reply; the latter leaves an `ERROR`
    /// step in the run.
    pub async fn turn(&self, message: &str) -> Result<TurnOutcome, AgentError> {
        let session = self.session()?;
        let mode = session.clg.mode;
        let constraints = mode.constraints();

        let history = recent_history(&self.layout.runs_dir(), HISTORY_TURNS)?;
        let env = EnvSnapshot::capture(
            self.backend.name(),
            self.backend.model(),
            self.layout.workspace(),
            &self.config.exec.env_allowlist,
        );
        let mut run = RunContext::create(&self.layout.runs_dir(), &slugify(message), &env)?;
        run.append(StepKind::User, message)?;

        let registry = HandlerRegistry::load(&self.layout)?;
        let memory = MemoryStore::open(&self.layout)?;
        let palette = registry.palette();
        let memory_excerpt = memory.summary(MEMORY_NOTES)?;
        let prompt = build_prompt(&PromptContext {
            mode,
            constraints,
            palette: &palette,
            memory: &memory_excerpt,
            env: &env,
            history: &history,
            message,
        });

        let parser = FenceParser::with_aliases(&self.config.verb_aliases());
        let (reply, parsed) = match self.sample(&prompt, constraints.sampling_passes, &parser).await {
            Ok(best) => best,
            Err(e) => {
                run.append(StepKind::Error, format!("{e}\n"))?;
                run.finish()?;
                return Err(e);
            }
        };
        run.append(StepKind::Plan, &reply)?;

        let ctx = HandlerContext {
            layout: self.layout.clone(),
            exec: self.config.exec.clone(),
            env,
            memory,
            registry,
            executor: Arc::clone(&self.executor),
        };
        let mut dispatcher = Dispatcher::new(ctx, constraints)
            .with_policy(Arc::clone(&self.policy))
            .with_guardrails(Guardrails::load(&self.layout)?);
        if self.config.cache.enabled {
            dispatcher = dispatcher.with_cache(Arc::new(CacheStore::open(self.layout.cache_dir())?));
        }
        let report = dispatcher.dispatch(&mut run, parsed).await?;

        let signal = dispatcher.signal(&report);
        let window = self.config.governor.window;
        let mut transition = None;
        let session = self.sessions.update(&session.id, &mut |s: &mut SessionRecord| {
            transition = s.observe_turn(signal, window);
        })?;
        run.finish()?;

        info!(
            run = run.name(),
            session = %session.id,
            mode = %mode,
            violations = signal.violations,
            "Turn complete"
        );
        Ok(TurnOutcome {
            run: run.name().to_string(),
            run_dir: run.dir().to_path_buf(),
            session: session.id,
            mode,
            report,
            signal,
            transition,
        })
    }

    /// Ask for `passes` replies and keep the one with the fewest parse
    /// issues; the earliest wins a tie. Passes that fail are skipped as long
    /// as one succeeds.
    async fn sample(
        &self,
        prompt: &str,
        passes: u32,
        parser: &FenceParser,
    ) -> Result<(String, Vec<Parsed>), AgentError> {
        let mut best: Option<(usize, String, Vec<Parsed>)> = None;
        let mut last_error = None;
        for pass in 0..passes.max(1) {
            let reply = match self.backend.complete(prompt).await {
                Ok(reply) if reply.trim().is_empty() => {
                    last_error = Some(AgentError::EmptyReply);
                    continue;
                }
                Ok(reply) => reply,
                Err(e) => {
                    warn!(pass, error = %e, "Backend pass failed");
                    last_error = Some(e);
                    continue;
                }
            };
            let parsed = parser.parse(&reply);
            let issues = parsed.iter().filter(|p| p.is_err()).count();
            if best.as_ref().map_or(true, |(fewest, _, _)| issues < *fewest) {
                best = Some((issues, reply, parsed));
            }
        }
        match best {
            Some((_, reply, parsed)) => Ok((reply, parsed)),
            None => Err(last_error.unwrap_or(AgentError::EmptyReply)),
        }
    }
}
