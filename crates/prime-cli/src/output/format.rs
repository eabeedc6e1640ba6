use std::path::PathBuf;

use chrono::NaiveDateTime;
use prime_agent::{ProfileOutcome, TurnOutcome};
use prime_core::governor::{CapabilityRecord, Transition};
use prime_core::model::{ActionResult, EnvSnapshot, StepKind};
use prime_core::runlog::RunSummary;
use prime_core::sessions::SessionRecord;
use prime_exec::ReplayReport;
use prime_query::SearchHit;
use serde_json::{json, Value};

use super::OutputFormat;

pub fn format_turn(outcome: &TurnOutcome, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
        OutputFormat::Text => format_turn_text(outcome),
    }
}

fn format_turn_text(outcome: &TurnOutcome) -> String {
    let report = &outcome.report;
    let mut out = String::new();
    out.push_str(&format!("Run:     {}\n", outcome.run));
    out.push_str(&format!("Session: {} ({})\n", outcome.session, outcome.mode));
    out.push_str(&format!(
        "Actions: {} ok / {} ({} cached)\n",
        report.ok_count(),
        report.results.len(),
        report.hit_count()
    ));
    out.push_str(&format_results(&report.results));
    if !report.violations.is_empty() {
        out.push_str(&format!("Violations: {}\n", report.violations.len()));
        for v in &report.violations {
            out.push_str(&format!("  {:?} {} {}\n", v.kind, v.action, v.detail));
        }
    }
    if let Some(transition) = &outcome.transition {
        out.push_str(&format!("Mode:    {}\n", format_transition(transition)));
    }
    out.trim_end().to_string()
}

fn format_results(results: &[ActionResult]) -> String {
    let mut out = String::new();
    for r in results {
        let status = if r.is_ok() { "ok" } else { "error" };
        let hit = if r.cache_hit { " [cached]" } else { "" };
        match &r.error {
            Some(err) => out.push_str(&format!(
                "  {status:<5} {}{hit}  {}: {}\n",
                r.for_id, err.code, err.message
            )),
            None => out.push_str(&format!("  {status:<5} {}{hit}\n", r.for_id)),
        }
        for w in &r.warnings {
            out.push_str(&format!("        ! {w}\n"));
        }
    }
    out
}

fn format_transition(transition: &Transition) -> String {
    match transition {
        Transition::Promoted { from, to } => format!("{from} -> {to} (promoted)"),
        Transition::Demoted { from, to, severe } => {
            let why = if *severe { "severe breach" } else { "repeated violations" };
            format!("{from} -> {to} (demoted: {why})")
        }
    }
}

pub fn format_profile(outcome: &ProfileOutcome, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
        OutputFormat::Text => {
            let mut out = format!("Session: {}\n", outcome.session);
            out.push_str(&format_caps(&outcome.caps));
            out.push_str(&format!("Mode:    {}", outcome.mode));
            out
        }
    }
}

fn format_caps(caps: &CapabilityRecord) -> String {
    let mut out = String::new();
    for (probe, score) in &caps.scores {
        let name = probe.file_name().trim_end_matches(".md");
        out.push_str(&format!("  {name:<20} {score:.2}\n"));
    }
    out.push_str(&format!("Brilliance: {:.3}\n", caps.brilliance));
    out
}

pub fn format_replay(source: &str, run: &str, report: &ReplayReport, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "source": source,
            "run": run,
            "results": report.results,
            "missing": report.missing,
        }))
        .unwrap_or_default(),
        OutputFormat::Text => {
            let mut out = format!("Replayed {source} into {run}\n");
            out.push_str(&format_results(&report.results));
            if report.missing.is_empty() {
                out.push_str("All actions served from cache.");
            } else {
                out.push_str(&format!(
                    "Missing cache entries: {}",
                    report.missing.join(", ")
                ));
            }
            out
        }
    }
}

fn session_json(session: &SessionRecord) -> Value {
    json!({
        "id": session.id,
        "backend": session.backend,
        "model": session.model,
        "created_at": session.created_at,
        "caps": session.caps,
        "clg": session.clg,
    })
}

pub fn format_session(session: &SessionRecord, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(&session_json(session)).unwrap_or_default(),
        OutputFormat::Text => {
            let clg = &session.clg;
            let mut out = String::new();
            out.push_str(&format!("Session: {}\n", session.id));
            out.push_str(&format!("Backend: {} / {}\n", session.backend, session.model));
            out.push_str(&format!(
                "Created: {}\n",
                session.created_at.format("%Y-%m-%d %H:%M")
            ));
            out.push_str(&format!(
                "Mode:    {} (clean streak {}, hit streak {})\n",
                clg.mode, clg.clean_streak, clg.hit_streak
            ));
            match &session.caps {
                Some(caps) => out.push_str(&format_caps(caps)),
                None => out.push_str("Not profiled. Run `prime profile`.\n"),
            }
            if !clg.window.is_empty() {
                out.push_str("Recent turns:\n");
                for turn in &clg.window {
                    let signal = if turn.signal.is_clean() {
                        "clean".to_string()
                    } else {
                        format!(
                            "{} violation(s){}",
                            turn.signal.violations,
                            if turn.signal.severe { ", severe" } else { "" }
                        )
                    };
                    out.push_str(&format!(
                        "  {} {} {signal}",
                        turn.at.format("%Y-%m-%d %H:%M"),
                        turn.mode
                    ));
                    if let Some(t) = &turn.transition {
                        out.push_str(&format!("  {}", format_transition(t)));
                    }
                    out.push('\n');
                }
            }
            out.trim_end().to_string()
        }
    }
}

pub fn format_session_list(sessions: &[SessionRecord], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => {
            let list: Vec<Value> = sessions.iter().map(session_json).collect();
            serde_json::to_string_pretty(&list).unwrap_or_default()
        }
        OutputFormat::Text => {
            if sessions.is_empty() {
                return "No sessions found.".to_string();
            }
            let mut out = String::new();
            for s in sessions {
                let brilliance = s
                    .caps
                    .as_ref()
                    .map(|c| format!("B={:.2}", c.brilliance))
                    .unwrap_or_else(|| "unprofiled".to_string());
                out.push_str(&format!("{}  {}  {brilliance}\n", s.id, s.clg.mode));
            }
            out.trim_end().to_string()
        }
    }
}

pub fn format_run_list(runs: &[RunSummary], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(runs).unwrap_or_default(),
        OutputFormat::Text => {
            if runs.is_empty() {
                return "No runs found.".to_string();
            }
            let mut out = String::new();
            for r in runs {
                let state = if r.finished { "" } else { "  (unfinished)" };
                let time = run_started(&r.name)
                    .map(|t| format!("  {}", t.format("%Y-%m-%d %H:%M")))
                    .unwrap_or_default();
                out.push_str(&format!(
                    "\u{25c6} {}  {} step(s){state}{time}\n",
                    r.name, r.steps
                ));
            }
            out.trim_end().to_string()
        }
    }
}

/// Start time encoded in a run name (`<YYYYmmdd_HHMMSS>_<slug>`).
fn run_started(name: &str) -> Option<NaiveDateTime> {
    let stamp = name.get(..15)?;
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").ok()
}

fn step_json(index: u32, kind: &StepKind) -> Value {
    json!({
        "index": index,
        "kind": kind.label(),
        "id": kind.action_id().map(|id| id.as_str()),
    })
}

pub fn format_run_steps(
    name: &str,
    env: &EnvSnapshot,
    steps: &[(u32, StepKind, PathBuf)],
    fmt: OutputFormat,
) -> String {
    match fmt {
        OutputFormat::Json => {
            let steps: Vec<Value> = steps
                .iter()
                .map(|(index, kind, path)| {
                    let mut entry = step_json(*index, kind);
                    entry["file"] = json!(path.file_name().map(|n| n.to_string_lossy()));
                    entry
                })
                .collect();
            serde_json::to_string_pretty(&json!({
                "run": name,
                "env": env,
                "steps": steps,
            }))
            .unwrap_or_default()
        }
        OutputFormat::Text => {
            let mut out = format!("Run: {name}\n{}\n\n", env.summary().trim_end());
            for (index, kind, path) in steps {
                let id = kind.action_id().map(|id| id.as_str()).unwrap_or("");
                let file = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                out.push_str(&format!("{index:>4}  {:<8} {id:<16} {file}\n", kind.label()));
            }
            out.trim_end().to_string()
        }
    }
}

pub fn format_step(index: u32, kind: &StepKind, content: &str, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => {
            let mut entry = step_json(index, kind);
            entry["content"] = json!(content);
            serde_json::to_string_pretty(&entry).unwrap_or_default()
        }
        OutputFormat::Text => content.trim_end().to_string(),
    }
}

pub fn format_search_hits(hits: &[SearchHit], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(hits).unwrap_or_default(),
        OutputFormat::Text => {
            let mut out = String::new();
            for h in hits {
                out.push_str(&format!(
                    "[{}] {}  (score: {:.2})\n    {}\n",
                    h.category, h.path, h.score, h.snippet
                ));
            }
            out.trim_end().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_started_parses_name_prefix() {
        let time = run_started("20261019_143005_read-hello").unwrap();
        assert_eq!(time.format("%Y-%m-%d %H:%M:%S").to_string(), "2026-10-19 14:30:05");
        assert!(run_started("read-hello").is_none());
    }

    #[test]
    fn test_run_list_shows_start_time() {
        let runs = [RunSummary {
            name: "20261019_143005_read-hello".into(),
            path: PathBuf::from("/tmp/x"),
            steps: 4,
            finished: true,
        }];
        let text = format_run_list(&runs, OutputFormat::Text);
        assert!(text.contains("4 step(s)  2026-10-19 14:30"), "{text}");
    }
}
