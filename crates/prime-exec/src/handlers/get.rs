use std::io::ErrorKind;
use std::path::Path;

use prime_core::cache::content_digest;
use prime_core::model::{ActionSpec, ErrorCode, GetSpec, Locator};
use prime_query::MemoryKind;
use serde_json::json;
use tracing::debug;

use super::{HandlerContext, Invocation, Outcome};
use crate::error::ExecError;
use crate::process::ShellRequest;

const DEFAULT_SEARCH_LIMIT: usize = 5;

fn get_spec(inv: &Invocation) -> Result<&GetSpec, ExecError> {
    match &inv.action.spec {
        ActionSpec::Get(spec) => Ok(spec),
        _ => Err(ExecError::Rejected("not a get action".into())),
    }
}

/// Version of whatever sits at `path`: the digest of a file's bytes or of a
/// directory's entry names.
pub fn source_version(path: &Path) -> String {
    if path.is_dir() {
        let mut names: Vec<String> = std::fs::read_dir(path)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        return content_digest(names.join("\n").as_bytes());
    }
    match std::fs::read(path) {
        Ok(bytes) => content_digest(&bytes),
        Err(_) => "missing".into(),
    }
}

pub(super) async fn read_file(ctx: &HandlerContext, inv: &Invocation) -> Result<Outcome, ExecError> {
    let spec = get_spec(inv)?;
    let Some(Locator::Path(raw)) = &spec.locator else {
        return Err(ExecError::Rejected("get requires a path".into()));
    };
    let path = ctx.resolve(raw);
    let meta = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ExecError::NotFound(raw.clone()),
        _ => e.into(),
    })?;

    if meta.is_dir() {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                entries.push(format!("{name}/"));
            } else {
                entries.push(name);
            }
        }
        entries.sort();
        return Ok(Outcome::new(json!({
            "path": raw,
            "kind": "directory",
            "entries": entries,
        })));
    }

    let bytes = tokio::fs::read(&path).await?;
    let version = content_digest(&bytes);
    let mut outcome = match std::str::from_utf8(&bytes) {
        Ok(text) if !text.contains('\0') => {
            let lines: Vec<&str> = text.lines().collect();
            let (content, range) = match spec.range {
                Some(r) => match r.clamp(lines.len()) {
                    Some(r) => (lines[r.start - 1..r.end].join("\n"), Some(r.to_string())),
                    None => (String::new(), Some("empty".to_string())),
                },
                None => (text.to_string(), None),
            };
            let (content, truncated) = ctx.clip(content.as_bytes());
            let mut data = json!({
                "path": raw,
                "kind": "file",
                "lines": lines.len(),
                "content": content,
            });
            if let Some(range) = range {
                data["range"] = json!(range);
            }
            if truncated {
                data["truncated"] = json!(true);
            }
            Outcome::new(data)
        }
        _ => {
            // Binary payloads never go inline.
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "blob".into());
            let name = format!("{}-{file_name}", inv.action.id());
            tokio::fs::create_dir_all(&inv.artifacts_dir).await?;
            tokio::fs::write(inv.artifacts_dir.join(&name), &bytes).await?;
            Outcome::new(json!({
                "path": raw,
                "kind": "binary",
                "bytes": bytes.len(),
                "artifact": format!("artifacts/{name}"),
            }))
        }
    };

    if inv.verify && source_version(&path) != version {
        outcome = outcome.warn(ErrorCode::ExecFailure.warning(format!("{raw} changed while it was read")));
    }
    Ok(outcome)
}

pub(super) fn read_memory(ctx: &HandlerContext, inv: &Invocation) -> Result<Outcome, ExecError> {
    let spec = get_spec(inv)?;
    let Some(Locator::Path(raw)) = &spec.locator else {
        return Err(ExecError::Rejected("get requires a path".into()));
    };
    let name = raw.trim_start_matches("memory://");
    let kind = match name {
        "" | "all" => None,
        other => Some(
            MemoryKind::parse(other)
                .ok_or_else(|| ExecError::NotFound(format!("no memory named {other:?}")))?,
        ),
    };
    let content = ctx.memory.read(kind)?;
    Ok(Outcome::new(json!({ "path": raw, "content": content })))
}

pub(super) async fn fetch_url(ctx: &HandlerContext, inv: &Invocation) -> Result<Outcome, ExecError> {
    let spec = get_spec(inv)?;
    let Some(Locator::Url(url)) = &spec.locator else {
        return Err(ExecError::Rejected("get requires a url".into()));
    };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ExecError::Rejected(format!("unsupported url {url:?}")));
    }
    let method = spec.method.as_deref().unwrap_or("GET");

    let mut request = ShellRequest::new("curl", ctx.layout.workspace()).args(["-sS", "-L"]);
    request = match method {
        "GET" => request,
        "HEAD" => request.arg("-I"),
        other => request.args(["-X", other]),
    };
    let body = inv.action.header.body();
    if !matches!(method, "GET" | "HEAD") && !body.is_empty() {
        request = request.args(["--data-binary", "@-"]).stdin(body);
    }
    let request = request.arg(url.as_str()).env(&ctx.env.env);

    let output = ctx.executor.execute(request, &inv.sink).await?;
    let (text, clipped) = ctx.clip(&output.output);
    let truncated = clipped || output.truncated;
    let mut data = json!({
        "url": url,
        "method": method,
        "exit_code": output.exit_code,
        "body": text,
    });
    if truncated {
        data["truncated"] = json!(true);
    }
    let mut outcome = Outcome::new(data);
    if !output.success() {
        outcome = outcome.warn(ErrorCode::ExecFailure.warning(format!("curl exited with {:?}", output.exit_code)));
    }
    Ok(outcome)
}

pub(super) async fn search_memory(ctx: &HandlerContext, inv: &Invocation) -> Result<Outcome, ExecError> {
    let spec = get_spec(inv)?;
    let query = spec
        .query
        .clone()
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ExecError::Rejected("search requires a query".into()))?;
    let tags = spec.tags.clone();
    let limit = spec.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

    let memory = ctx.memory.clone();
    let (query, tags, hits) = tokio::task::spawn_blocking(move || {
        let hits = memory.search(&query, &tags, limit);
        (query, tags, hits)
    })
    .await
    .map_err(|e| ExecError::Task(e.to_string()))?;
    let hits = hits?;
    debug!(query = %query, hits = hits.len(), "Memory search");

    let data = json!({ "query": query, "tags": tags, "hits": hits });
    tokio::fs::create_dir_all(&inv.retrieval_dir).await?;
    tokio::fs::write(
        inv.retrieval_dir.join(format!("{}.json", inv.action.id())),
        serde_json::to_vec_pretty(&data)?,
    )
    .await?;
    Ok(Outcome::new(data))
}

pub(super) fn read_env(ctx: &HandlerContext) -> Result<Outcome, ExecError> {
    Ok(Outcome::new(serde_json::to_value(&ctx.env)?))
}
