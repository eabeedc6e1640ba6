use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Attribute selecting the handler variant of a verb.
pub const QUALIFIER_ATTR: &str = "action";
/// Qualifier used when a fence carries no `action` attribute.
pub const DEFAULT_QUALIFIER: &str = "execute";

/// The four UCM verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    Run,
    Set,
    Result,
}

impl Verb {
    pub const ALL: [Verb; 4] = [Verb::Get, Verb::Run, Verb::Set, Verb::Result];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Run => "run",
            Verb::Set => "set",
            Verb::Result => "result",
        }
    }

    /// Exact token match. Aliases are resolved by the parser.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == token)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of an action, unique within a run.
///
/// Ids end up in step file names, so only `[A-Za-z0-9_.-]` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(String);

impl ActionId {
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() || s.len() > 64 {
            return Err(CoreError::InvalidId(format!(
                "action id must be 1..=64 characters, got {}",
                s.len()
            )));
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(CoreError::InvalidId(format!(
                "invalid character {bad:?} in action id {s:?}"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered `key="value"` attributes of a fence header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attrs(Vec<(String, String)>);

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute. Returns false (and keeps the first value) on a
    /// duplicate key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.contains(&key) {
            return false;
        }
        self.0.push((key, value.into()));
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy without the given keys, order preserved.
    pub fn without(&self, keys: &[&str]) -> Attrs {
        Attrs(
            self.0
                .iter()
                .filter(|(k, _)| !keys.contains(&k.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Render as a header attribute list: `a="1" b="two"`.
    pub fn to_header(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}=\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Fields shared by every parsed fence.
#[derive(Debug, Clone, PartialEq)]
pub struct FenceHeader {
    pub id: ActionId,
    pub attrs: Attrs,
    pub body: Option<String>,
    /// 1-based line of the opening delimiter.
    pub line: usize,
    /// The fence exactly as it appeared in the reply.
    pub raw: String,
    pub timeout: Option<Duration>,
}

impl FenceHeader {
    pub fn qualifier(&self) -> &str {
        self.attrs.get(QUALIFIER_ATTR).unwrap_or(DEFAULT_QUALIFIER)
    }

    pub fn body(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }
}

/// Inclusive, 1-based line range written `A..B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn parse(s: &str) -> Option<Self> {
        let (a, b) = s.split_once("..").or_else(|| s.split_once('-'))?;
        let start = a.trim().parse().ok()?;
        let end = b.trim().parse().ok()?;
        (start >= 1 && end >= start).then_some(Self { start, end })
    }

    /// The part of the range inside a text of `lines` lines, if any.
    pub fn clamp(&self, lines: usize) -> Option<Self> {
        (self.start <= lines).then(|| Self {
            start: self.start,
            end: self.end.min(lines),
        })
    }
}

impl std::fmt::Display for LineRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Path(String),
    Url(String),
}

impl Locator {
    pub fn as_str(&self) -> &str {
        match self {
            Locator::Path(p) | Locator::Url(p) => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetSpec {
    pub locator: Option<Locator>,
    pub range: Option<LineRange>,
    pub query: Option<String>,
    pub tags: Vec<String>,
    pub limit: Option<usize>,
    /// HTTP method for `url` locators; `None` means GET.
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    /// Language or target, lowercased (`sh`, `python`, ...).
    pub lang: String,
    pub args: Option<String>,
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Write,
    Append,
}

impl WriteMode {
    pub fn is_append(&self) -> bool {
        matches!(self, WriteMode::Append)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetSpec {
    pub path: String,
    pub mode: WriteMode,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultSpec {
    pub for_id: String,
    pub payload: Option<serde_json::Value>,
}

/// Typed payload, one variant per verb.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpec {
    Get(GetSpec),
    Run(RunSpec),
    Set(SetSpec),
    Result(ResultSpec),
}

/// A validated action, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub header: FenceHeader,
    pub spec: ActionSpec,
}

impl Action {
    pub fn verb(&self) -> Verb {
        match self.spec {
            ActionSpec::Get(_) => Verb::Get,
            ActionSpec::Run(_) => Verb::Run,
            ActionSpec::Set(_) => Verb::Set,
            ActionSpec::Result(_) => Verb::Result,
        }
    }

    pub fn id(&self) -> &ActionId {
        &self.header.id
    }

    pub fn qualifier(&self) -> &str {
        self.header.qualifier()
    }

    pub fn is_result(&self) -> bool {
        matches!(self.spec, ActionSpec::Result(_))
    }
}
