use std::collections::HashSet;

use super::header::{parse_duration, parse_header};
use super::scan::RawFence;
use super::{FenceParser, ParseIssue, Parsed};
use crate::model::{
    Action, ActionId, ActionSpec, Attrs, FenceHeader, GetSpec, LineRange, Locator, ResultSpec,
    RunSpec, SetSpec, Verb, WriteMode, DEFAULT_QUALIFIER, QUALIFIER_ATTR,
};

/// Per-reply validation state: ids already taken.
pub(crate) struct Validator<'p> {
    parser: &'p FenceParser,
    action_ids: HashSet<ActionId>,
    result_ids: HashSet<ActionId>,
}

impl<'p> Validator<'p> {
    pub fn new(parser: &'p FenceParser) -> Self {
        Self {
            parser,
            action_ids: HashSet::new(),
            result_ids: HashSet::new(),
        }
    }

    pub fn validate(&mut self, fence: &RawFence<'_>) -> Parsed {
        let mut issue = ParseIssue {
            line: fence.line,
            id: None,
            verb: None,
            message: String::new(),
            raw: fence.raw.clone(),
        };
        let fail = |mut issue: ParseIssue, message: String| {
            issue.message = message;
            Err(issue)
        };

        let header = match parse_header(fence.header) {
            Ok(h) => h,
            Err(message) => return fail(issue, message),
        };
        issue.id = ActionId::parse(header.id).ok();

        let Some(verb) = self.parser.resolve_verb(header.verb) else {
            return fail(issue, format!("unknown verb `{}`", header.verb));
        };
        issue.verb = Some(verb);

        let id = match ActionId::parse(header.id) {
            Ok(id) => id,
            Err(e) => return fail(issue, e.to_string()),
        };

        let seen = if verb == Verb::Result {
            &mut self.result_ids
        } else {
            &mut self.action_ids
        };
        if !seen.insert(id.clone()) {
            return fail(issue, format!("duplicate id `{id}` in this run"));
        }

        if !fence.terminated {
            return fail(issue, "fence is never closed".into());
        }

        let mut attrs = Attrs::new();
        for (key, value) in header.attrs {
            if !attrs.insert(key.clone(), value) {
                return fail(issue, format!("duplicate attribute `{key}`"));
            }
        }

        let timeout = match attrs.get("timeout") {
            Some(raw) => match parse_duration(raw) {
                Some(d) if !d.is_zero() => Some(d),
                _ => return fail(issue, format!("invalid timeout `{raw}`")),
            },
            None => None,
        };

        if header.inline_json.is_some() && verb != Verb::Result {
            return fail(issue, "inline JSON is only allowed on result fences".into());
        }

        let body = fence.body.clone();
        let qualifier = attrs.get(QUALIFIER_ATTR).unwrap_or(DEFAULT_QUALIFIER);
        let spec = match verb {
            Verb::Get => get_spec(qualifier, &attrs),
            Verb::Run => run_spec(qualifier, &attrs, body.as_deref()),
            Verb::Set => set_spec(qualifier, &attrs),
            Verb::Result => result_spec(&id, &attrs, header.inline_json, body.as_deref()),
        };
        let spec = match spec {
            Ok(spec) => spec,
            Err(message) => return fail(issue, message),
        };

        Ok(Action {
            header: FenceHeader {
                id,
                attrs,
                body,
                line: fence.line,
                raw: fence.raw.clone(),
                timeout,
            },
            spec,
        })
    }
}

fn get_spec(qualifier: &str, attrs: &Attrs) -> Result<ActionSpec, String> {
    let locator = match (attrs.get("path"), attrs.get("url")) {
        (Some(_), Some(_)) => return Err("get takes either `path` or `url`, not both".into()),
        (Some(p), None) => Some(Locator::Path(p.to_string())),
        (None, Some(u)) => Some(Locator::Url(u.to_string())),
        (None, None) => None,
    };
    let range = match attrs.get("range") {
        Some(raw) => Some(LineRange::parse(raw).ok_or_else(|| format!("invalid range `{raw}`"))?),
        None => None,
    };
    let limit = match attrs.get("k") {
        Some(raw) => Some(
            raw.parse::<usize>()
                .ok()
                .filter(|k| *k > 0)
                .ok_or_else(|| format!("invalid k `{raw}`"))?,
        ),
        None => None,
    };
    let method = attrs.get("method").map(|m| m.to_ascii_uppercase());
    let spec = GetSpec {
        locator,
        range,
        query: attrs.get("query").map(str::to_string),
        tags: attrs
            .get("tags")
            .map(|t| {
                t.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        limit,
        method,
    };

    match qualifier {
        "execute" => {
            let Some(locator) = &spec.locator else {
                return Err("get requires a `path` or `url` attribute".into());
            };
            if let (Locator::Url(_), Some(method)) = (locator, &spec.method) {
                let read_only = matches!(method.as_str(), "GET" | "HEAD");
                let mutate = attrs.get("mutate") == Some("true");
                let rationale = attrs.get("rationale").is_some_and(|r| !r.trim().is_empty());
                if !read_only && !(mutate && rationale) {
                    return Err(format!(
                        "{method} requires mutate=\"true\" and a non-empty rationale"
                    ));
                }
            }
        }
        "search" => {
            if spec.query.as_deref().map_or(true, |q| q.trim().is_empty()) {
                return Err("get action=\"search\" requires a `query` attribute".into());
            }
        }
        _ => {}
    }
    Ok(ActionSpec::Get(spec))
}

fn run_spec(qualifier: &str, attrs: &Attrs, body: Option<&str>) -> Result<ActionSpec, String> {
    let lang = attrs
        .get("lang")
        .or_else(|| attrs.get("target"))
        .map(|l| l.trim().to_ascii_lowercase());
    if qualifier == "execute" {
        if lang.as_deref().map_or(true, str::is_empty) {
            return Err("run requires a `lang` or `target` attribute".into());
        }
        if body.is_none() {
            return Err("run has an empty body".into());
        }
    }
    Ok(ActionSpec::Run(RunSpec {
        lang: lang.unwrap_or_default(),
        args: attrs.get("args").map(str::to_string),
        cwd: attrs.get("cwd").map(str::to_string),
    }))
}

fn set_spec(qualifier: &str, attrs: &Attrs) -> Result<ActionSpec, String> {
    let mode = match attrs.get("mode") {
        None | Some("write") | Some("overwrite") => WriteMode::Write,
        Some("append") => WriteMode::Append,
        Some(other) => return Err(format!("invalid mode `{other}` (expected write or append)")),
    };
    let path = attrs.get("path").map(str::to_string);
    if matches!(qualifier, "execute" | "clear") && path.as_deref().map_or(true, str::is_empty) {
        return Err("set requires a `path` attribute".into());
    }
    Ok(ActionSpec::Set(SetSpec {
        path: path.unwrap_or_default(),
        mode,
        category: attrs.get("category").map(str::to_string),
    }))
}

fn result_spec(
    id: &ActionId,
    attrs: &Attrs,
    inline_json: Option<&str>,
    body: Option<&str>,
) -> Result<ActionSpec, String> {
    let raw = inline_json.or(body.map(str::trim));
    let payload = match raw {
        Some(raw) => Some(
            serde_json::from_str::<serde_json::Value>(raw)
                .map_err(|e| format!("result payload is not valid JSON: {e}"))?,
        ),
        None => None,
    };
    Ok(ActionSpec::Result(ResultSpec {
        for_id: attrs.get("for").unwrap_or(id.as_str()).to_string(),
        payload,
    }))
}
