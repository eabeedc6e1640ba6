use std::time::Duration;

/// Tokenized fence header: `verb#id key="value" ... [{inline json}]`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Header<'a> {
    pub verb: &'a str,
    pub id: &'a str,
    pub attrs: Vec<(String, String)>,
    /// Trailing `{...}` on a result header.
    pub inline_json: Option<&'a str>,
}

pub(crate) fn parse_header(text: &str) -> Result<Header<'_>, String> {
    let text = text.trim();
    let (first, rest) = match text.find(char::is_whitespace) {
        Some(i) => text.split_at(i),
        None => (text, ""),
    };
    let (verb, id) = first
        .split_once('#')
        .ok_or_else(|| "fence header must start with `<verb>#<id>`".to_string())?;
    if verb.is_empty() {
        return Err("fence header has no verb".into());
    }

    let mut attrs = Vec::new();
    let mut inline_json = None;
    let mut chars = rest.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        let Some(&(start, c)) = chars.peek() else {
            break;
        };
        if c == '{' {
            inline_json = Some(rest[start..].trim());
            break;
        }

        let mut key = String::new();
        while let Some((_, c)) = chars.next_if(|(_, c)| c.is_ascii_alphanumeric() || *c == '_' || *c == '-') {
            key.push(c);
        }
        if key.is_empty() {
            return Err(format!("unexpected character {c:?} in attributes"));
        }
        if chars.next_if(|(_, c)| *c == '=').is_none() {
            return Err(format!("attribute `{key}` has no value"));
        }

        let mut value = String::new();
        if chars.next_if(|(_, c)| *c == '"').is_some() {
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some((_, escaped)) => value.push(escaped),
                        None => break,
                    },
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(format!("unterminated quote in attribute `{key}`"));
            }
        } else {
            while let Some((_, c)) = chars.next_if(|(_, c)| !c.is_whitespace()) {
                value.push(c);
            }
        }
        attrs.push((key, value));
    }

    Ok(Header {
        verb,
        id,
        attrs,
        inline_json,
    })
}

/// Parse `10s`, `500ms`, `2m`, `1h` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let n: u64 = num.parse().ok()?;
    match unit.trim() {
        "" | "s" | "sec" | "secs" => Some(Duration::from_secs(n)),
        "ms" => Some(Duration::from_millis(n)),
        "m" | "min" => Some(Duration::from_secs(n.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(n.checked_mul(3600)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_attrs() {
        let h = parse_header(r#"get#g1 path="./README.md" range="1..50""#).unwrap();
        assert_eq!(h.verb, "get");
        assert_eq!(h.id, "g1");
        assert_eq!(
            h.attrs,
            vec![
                ("path".to_string(), "./README.md".to_string()),
                ("range".to_string(), "1..50".to_string()),
            ]
        );
        assert!(h.inline_json.is_none());
    }

    #[test]
    fn test_header_bare_values_and_escapes() {
        let h = parse_header(r#"run#r1 lang=sh args="a \"b\" c""#).unwrap();
        assert_eq!(h.attrs[0], ("lang".to_string(), "sh".to_string()));
        assert_eq!(h.attrs[1].1, r#"a "b" c"#);
    }

    #[test]
    fn test_header_inline_json() {
        let h = parse_header(r#"result#r1 for="r1" {"status":"ok","data":{"x":1}}"#).unwrap();
        assert_eq!(h.attrs.len(), 1);
        assert_eq!(h.inline_json, Some(r#"{"status":"ok","data":{"x":1}}"#));
    }

    #[test]
    fn test_header_errors() {
        assert!(parse_header("get path=x").is_err());
        assert!(parse_header("#g1").is_err());
        assert!(parse_header(r#"get#g1 path="x"#).is_err());
        assert!(parse_header("get#g1 path").is_err());
        assert!(parse_header("get#g1 =x").is_err());
    }

    #[test]
    fn test_durations() {
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("ten"), None);
        assert_eq!(parse_duration("5 days"), None);
    }
}
