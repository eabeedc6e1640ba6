use prime_core::cache::{content_digest, get_key, run_key, set_key, CacheKey};
use prime_core::model::{Action, ActionSpec};
use serde_json::json;

use crate::error::ExecError;
use crate::handlers::get::source_version;
use crate::handlers::run::{run_cwd, toolchain};
use crate::handlers::set::DEFAULT_CATEGORY;
use crate::handlers::{set_content, HandlerContext};
use crate::registry::HandlerKind;

/// Key for `action` as handled by `kind`. The fence id never contributes.
pub fn action_key(
    ctx: &HandlerContext,
    action: &Action,
    kind: HandlerKind,
) -> Result<CacheKey, ExecError> {
    let attrs = &action.header.attrs;
    let body = action.header.body();
    let key = match (&action.spec, kind) {
        (ActionSpec::Get(spec), HandlerKind::ReadFile) => {
            let locator = spec.locator.as_ref();
            let version = locator
                .map(|l| source_version(&ctx.resolve(l.as_str())))
                .unwrap_or_default();
            get_key(attrs, locator, spec.range, &version)
        }
        (ActionSpec::Get(spec), HandlerKind::ReadMemory | HandlerKind::SearchMemory) => {
            let version = content_digest(ctx.memory.read(None)?.as_bytes());
            get_key(attrs, spec.locator.as_ref(), spec.range, &version)
        }
        // Remote content has no version we can see; `cache="skip"` refetches.
        (ActionSpec::Get(spec), HandlerKind::FetchUrl) => {
            get_key(attrs, spec.locator.as_ref(), spec.range, "")
        }
        (ActionSpec::Get(spec), HandlerKind::ReadEnv) => {
            let env = &ctx.env;
            let material = json!({
                "backend": env.backend,
                "model": env.model,
                "os": env.os,
                "cwd": env.cwd,
                "tools": env.tool_palette,
                "env": env.env,
            });
            get_key(attrs, spec.locator.as_ref(), spec.range, &content_digest(material.to_string().as_bytes()))
        }
        (ActionSpec::Run(spec), HandlerKind::RunScript) => run_key(
            attrs,
            &toolchain(ctx, &spec.lang),
            body,
            &ctx.env.env,
            &run_cwd(ctx, spec),
        ),
        (ActionSpec::Set(spec), HandlerKind::WriteFile) => set_key(
            action.qualifier(),
            &ctx.resolve(&spec.path).to_string_lossy(),
            set_content(body).as_bytes(),
            spec.mode.is_append(),
        ),
        (ActionSpec::Set(spec), HandlerKind::WriteMemory) => {
            let category = spec.category.as_deref().unwrap_or(DEFAULT_CATEGORY);
            set_key(
                action.qualifier(),
                &format!("{}#{category}", spec.path),
                body.as_bytes(),
                true,
            )
        }
        (ActionSpec::Set(_), HandlerKind::WriteRegistry) => set_key(
            action.qualifier(),
            &ctx.layout.registry_path().to_string_lossy(),
            body.as_bytes(),
            false,
        ),
        (ActionSpec::Set(spec), HandlerKind::ClearMemory) => {
            set_key(action.qualifier(), &spec.path, b"", false)
        }
        _ => {
            return Err(ExecError::Rejected(format!(
                "{kind:?} cannot handle a {} action",
                action.verb()
            )))
        }
    };
    Ok(key)
}
