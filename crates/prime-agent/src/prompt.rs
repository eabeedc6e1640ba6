//! Prompt assembly: instructions, the handler palette, memory, the
//! environment snapshot, recent turns and the new message.
//!
//! None of this is persisted; the run log only keeps the user message and
//! the reply.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use prime_core::model::{EnvSnapshot, Mode, ModeConstraints, StepKind, Verbosity};
use prime_core::runlog::{list_runs, RunDir};
use prime_core::CoreError;
use prime_exec::HandlerKind;

/// Per-step cap on history text, in characters.
const HISTORY_STEP_CHARS: usize = 2000;

/// One earlier turn as the model saw and answered it.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTurn {
    pub run: String,
    pub user: String,
    pub plan: String,
    pub results: Vec<String>,
}

pub struct PromptContext<'a> {
    pub mode: Mode,
    pub constraints: ModeConstraints,
    pub palette: &'a [HandlerKind],
    pub memory: &'a str,
    pub env: &'a EnvSnapshot,
    pub history: &'a [HistoryTurn],
    pub message: &'a str,
}

/// The last `limit` turns, oldest first, read back from their run
/// directories.
pub fn recent_history(runs_dir: &Path, limit: usize) -> Result<Vec<HistoryTurn>, CoreError> {
    let mut turns = Vec::new();
    for summary in list_runs(runs_dir)?.into_iter().take(limit) {
        let run = RunDir::open(&summary.path)?;
        let mut turn = HistoryTurn {
            run: summary.name,
            user: String::new(),
            plan: String::new(),
            results: Vec::new(),
        };
        for (_, kind, path) in run.steps()? {
            match kind {
                StepKind::User => turn.user = read_clipped(&path)?,
                StepKind::Plan => turn.plan = read_clipped(&path)?,
                StepKind::Result(_) => turn.results.push(read_clipped(&path)?),
                _ => {}
            }
        }
        turns.push(turn);
    }
    turns.reverse();
    Ok(turns)
}

fn read_clipped(path: &Path) -> Result<String, CoreError> {
    let text = fs::read_to_string(path)?;
    if text.chars().count() <= HISTORY_STEP_CHARS {
        return Ok(text);
    }
    let mut clipped: String = text.chars().take(HISTORY_STEP_CHARS).collect();
    clipped.push_str("\n[...]\n");
    Ok(clipped)
}

fn verbosity_rule(verbosity: Verbosity) -> &'static str {
    match verbosity {
        Verbosity::Minimal => "Keep prose to a single short sentence; let the fences speak.",
        Verbosity::Concise => "Keep prose short: a line of intent before the fences.",
        Verbosity::Standard => "Explain your plan briefly before the fences.",
        Verbosity::Expansive => "Explain your reasoning and plan as fully as is useful.",
    }
}

pub fn build_prompt(ctx: &PromptContext<'_>) -> String {
    let c = &ctx.constraints;
    let mut out = String::from(
        "# Prime System Instructions\n\n\
         You act on this workspace only through UCM action fences. Each fence is one action:\n\
         an opening line ```<verb>#<id> key=\"value\" ..., an optional body, and a closing ```.\n\
         Verbs: get (read), run (execute), set (write). Ids must be unique within your reply.\n\
         Every action gets a result fence back; do not write result fences yourself.\n\n",
    );

    out.push_str("## Available Handlers\n");
    for kind in ctx.palette.iter().take(c.palette_cap) {
        let _ = writeln!(out, "- {}", kind.usage());
    }

    let _ = write!(
        out,
        "\n## Discipline ({})\n\
         - At most {} action(s) per reply; extra actions are rejected.\n\
         - {}\n\
         - Destructive commands are blocked.\n\n",
        ctx.mode,
        c.max_actions,
        verbosity_rule(c.verbosity),
    );

    out.push_str("## Memory\n");
    if ctx.memory.trim().is_empty() {
        out.push_str("(empty)\n");
    } else {
        out.push_str(ctx.memory.trim_end());
        out.push('\n');
    }

    let _ = write!(out, "\n## Environment\n{}\n", ctx.env.summary());

    if !ctx.history.is_empty() {
        out.push_str("\n## Recent Conversation History\n");
        for turn in ctx.history {
            let _ = write!(
                out,
                "### User\n{}\n### Prime\n{}\n",
                turn.user.trim_end(),
                turn.plan.trim_end()
            );
            for result in &turn.results {
                out.push_str(result.trim_end());
                out.push('\n');
            }
        }
    }

    let _ = write!(
        out,
        "\n## Current User Request\n{}\n\n# Prime Response:\n",
        ctx.message.trim_end()
    );
    out
}
