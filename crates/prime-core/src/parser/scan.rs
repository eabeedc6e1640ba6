//! Line scanner: splits a reply into action fences and prose.

/// An action fence as found in the text, before header parsing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawFence<'a> {
    pub line: usize,
    pub header: &'a str,
    pub body: Option<String>,
    pub raw: String,
    pub terminated: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Scan<'a> {
    pub fences: Vec<RawFence<'a>>,
    /// Lines outside any code block, with their 1-based numbers.
    pub prose: Vec<(usize, &'a str)>,
}

pub(crate) fn scan(text: &str) -> Scan<'_> {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    let mut out = Scan::default();

    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim_start();
        let ticks = trimmed.bytes().take_while(|b| *b == b'`').count();
        if ticks < 3 {
            out.prose.push((i + 1, lines[i]));
            i += 1;
            continue;
        }

        let info = trimmed[ticks..].trim();
        let close = (i + 1..lines.len()).find(|&j| is_closing(lines[j], ticks));
        let body_end = close.unwrap_or(lines.len());

        if let Some(header) = action_header(info) {
            let raw_end = close.map_or(lines.len(), |c| c + 1);
            out.fences.push(RawFence {
                line: i + 1,
                header,
                body: clean_body(&lines[i + 1..body_end]),
                raw: lines[i..raw_end].join("\n"),
                terminated: close.is_some(),
            });
        }
        // Plain code blocks are skipped whole.
        i = close.map_or(lines.len(), |c| c + 1);
    }
    out
}

fn is_closing(line: &str, ticks: usize) -> bool {
    let t = line.trim();
    t.len() >= ticks && t.bytes().all(|b| b == b'`')
}

/// Header text when `info` opens an action fence: either `ucm <header>` or
/// an info string whose first token looks like `<verb>#<id>`.
fn action_header(info: &str) -> Option<&str> {
    if let Some(rest) = info.strip_prefix("ucm") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Some(rest.trim());
        }
    }
    let first = info.split_whitespace().next()?;
    let (verb, id) = first.split_once('#')?;
    let verb_like = !verb.is_empty()
        && verb
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    (verb_like && !id.is_empty()).then_some(info)
}

/// Join body lines and strip trailing whitespace and stray fence tokens.
fn clean_body(lines: &[&str]) -> Option<String> {
    let mut body = lines.join("\n");
    loop {
        let trimmed = body.trim_end();
        match trimmed.strip_suffix("```") {
            Some(rest) => body = rest.to_string(),
            None => {
                body.truncate(trimmed.len());
                break;
            }
        }
    }
    (!body.trim().is_empty()).then_some(body)
}

/// Single-backtick spans of a prose line. Double-backtick runs are skipped.
pub(crate) fn inline_spans(line: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut i = 0;
    while let Some(offset) = line[i..].find('`') {
        let start = i + offset;
        let run = line[start..].bytes().take_while(|b| *b == b'`').count();
        if run > 1 {
            i = start + run;
            continue;
        }
        match line[start + 1..].find('`') {
            Some(len) => {
                let content = line[start + 1..start + 1 + len].trim();
                if !content.is_empty() {
                    spans.push(content);
                }
                i = start + len + 2;
            }
            None => break,
        }
    }
    spans
}
