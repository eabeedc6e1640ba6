//! Fence parser and validator.
//!
//! Turns a reply into an ordered list of actions. Parsing is pure: no I/O,
//! and a bad fence yields a [`ParseIssue`] in its slot instead of aborting
//! the batch.

mod header;
mod scan;
mod validate;

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::PrimeConfig;
use crate::model::{Action, ActionId, ActionSpec, Attrs, FenceHeader, RunSpec, Verb};

pub use header::parse_duration;

/// A fence that could not be turned into an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseIssue {
    /// 1-based line of the opening delimiter.
    pub line: usize,
    /// The fence id, when it could be read.
    pub id: Option<ActionId>,
    pub verb: Option<Verb>,
    pub message: String,
    pub raw: String,
}

impl ParseIssue {
    /// Id the error result is addressed to: the fence id, or `L<line>`.
    pub fn result_id(&self) -> String {
        self.id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| format!("L{}", self.line))
    }

    /// Malformed `result` fences get no result of their own.
    pub fn is_result_fence(&self) -> bool {
        self.verb == Some(Verb::Result)
    }
}

impl std::fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

pub type Parsed = Result<Action, ParseIssue>;

#[derive(Debug, Clone)]
pub struct FenceParser {
    aliases: BTreeMap<String, Verb>,
}

impl Default for FenceParser {
    fn default() -> Self {
        Self::with_aliases(&PrimeConfig::default().verb_aliases())
    }
}

impl FenceParser {
    /// Parser resolving `alias -> verb` pairs. Pairs naming an unknown verb
    /// are dropped.
    pub fn with_aliases(aliases: &BTreeMap<String, String>) -> Self {
        let aliases = aliases
            .iter()
            .filter_map(|(alias, target)| match Verb::from_token(target) {
                Some(verb) => Some((alias.clone(), verb)),
                None => {
                    warn!(alias = %alias, target = %target, "Ignoring alias to unknown verb");
                    None
                }
            })
            .collect();
        Self { aliases }
    }

    pub fn resolve_verb(&self, token: &str) -> Option<Verb> {
        Verb::from_token(token).or_else(|| self.aliases.get(token).copied())
    }

    /// Parse a reply into actions in textual order.
    ///
    /// With no action fences at all, single-backtick spans in prose become
    /// implicit `run` actions (`lang="sh"`, ids `i1`, `i2`, ...).
    pub fn parse(&self, text: &str) -> Vec<Parsed> {
        let scanned = scan::scan(text);
        if scanned.fences.is_empty() {
            let implicit = implicit_runs(&scanned.prose);
            if !implicit.is_empty() {
                debug!(count = implicit.len(), "No fences, using inline spans");
            }
            return implicit.into_iter().map(Ok).collect();
        }

        let mut validator = validate::Validator::new(self);
        let parsed: Vec<Parsed> = scanned
            .fences
            .iter()
            .map(|fence| validator.validate(fence))
            .collect();
        debug!(
            fences = parsed.len(),
            issues = parsed.iter().filter(|p| p.is_err()).count(),
            "Parsed reply"
        );
        parsed
    }
}

/// Parse with the built-in aliases only.
pub fn parse(text: &str) -> Vec<Parsed> {
    FenceParser::default().parse(text)
}

fn implicit_runs(prose: &[(usize, &str)]) -> Vec<Action> {
    let mut actions = Vec::new();
    for (line, text) in prose {
        for span in scan::inline_spans(text) {
            let Ok(id) = ActionId::parse(format!("i{}", actions.len() + 1)) else {
                continue;
            };
            let mut attrs = Attrs::new();
            attrs.insert("lang", "sh");
            actions.push(Action {
                header: FenceHeader {
                    id,
                    attrs,
                    body: Some(span.to_string()),
                    line: *line,
                    raw: format!("`{span}`"),
                    timeout: None,
                },
                spec: ActionSpec::Run(RunSpec {
                    lang: "sh".into(),
                    args: None,
                    cwd: None,
                }),
            });
        }
    }
    actions
}
