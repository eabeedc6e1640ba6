use std::collections::BTreeMap;
use std::fs;

use prime_core::model::{Action, ActionSpec, Locator, Verb};
use prime_core::PrimeLayout;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExecError;
use crate::handlers::{interpreter, normalize, resolve_path};

const MEMORY_SCHEME: &str = "memory://";

/// Every handler the engine has. Resolution maps `(verb, qualifier)` plus
/// the fence's target onto exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    ReadFile,
    ReadMemory,
    FetchUrl,
    SearchMemory,
    ReadEnv,
    RunScript,
    WriteFile,
    WriteMemory,
    WriteRegistry,
    ClearMemory,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 10] = [
        HandlerKind::ReadFile,
        HandlerKind::RunScript,
        HandlerKind::WriteFile,
        HandlerKind::SearchMemory,
        HandlerKind::WriteMemory,
        HandlerKind::ReadMemory,
        HandlerKind::FetchUrl,
        HandlerKind::ReadEnv,
        HandlerKind::ClearMemory,
        HandlerKind::WriteRegistry,
    ];

    pub fn verb(&self) -> Verb {
        match self {
            HandlerKind::ReadFile
            | HandlerKind::ReadMemory
            | HandlerKind::FetchUrl
            | HandlerKind::SearchMemory
            | HandlerKind::ReadEnv => Verb::Get,
            HandlerKind::RunScript => Verb::Run,
            HandlerKind::WriteFile
            | HandlerKind::WriteMemory
            | HandlerKind::WriteRegistry
            | HandlerKind::ClearMemory => Verb::Set,
        }
    }

    pub fn qualifier(&self) -> &'static str {
        match self {
            HandlerKind::SearchMemory => "search",
            HandlerKind::ReadEnv => "env",
            HandlerKind::ClearMemory => "clear",
            _ => "execute",
        }
    }

    /// Targets that bypass the shell and count as critical for verification.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            HandlerKind::WriteMemory | HandlerKind::WriteRegistry | HandlerKind::ClearMemory
        )
    }

    /// One-line usage shown to the model in the tool palette.
    pub fn usage(&self) -> &'static str {
        match self {
            HandlerKind::ReadFile => {
                "get#<id> path=\"<file or dir>\" [range=\"A..B\"]: read a file or list a directory"
            }
            HandlerKind::ReadMemory => {
                "get#<id> path=\"memory://short_term|long_term\": read memory notes"
            }
            HandlerKind::FetchUrl => {
                "get#<id> url=\"<url>\" [method=\"GET\"]: fetch a URL read-only (other methods need mutate=\"true\" rationale=\"...\")"
            }
            HandlerKind::SearchMemory => {
                "get#<id> action=\"search\" query=\"<text>\" [tags=\"a,b\"] [k=\"5\"]: search memory"
            }
            HandlerKind::ReadEnv => "get#<id> action=\"env\": show the environment snapshot",
            HandlerKind::RunScript => {
                "run#<id> lang=\"sh|bash|python|node|ruby|perl\" [timeout=\"10s\"] [cwd=\"..\"] [args=\"..\"]: run the body"
            }
            HandlerKind::WriteFile => {
                "set#<id> path=\"<file>\" [mode=\"write|append\"]: write the body to a file"
            }
            HandlerKind::WriteMemory => {
                "set#<id> path=\"memory://short_term|long_term\" category=\"<name>\": remember the body"
            }
            HandlerKind::WriteRegistry => {
                "set#<id> path=\".prime/handlers.json\": replace the handler registry (JSON body)"
            }
            HandlerKind::ClearMemory => {
                "set#<id> action=\"clear\" path=\"memory://short_term\": clear short-term memory"
            }
        }
    }
}

/// Outcome of looking an action up in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Handler(HandlerKind),
    Unregistered {
        verb: Verb,
        qualifier: String,
        reason: String,
    },
}

/// Contents of `.prime/handlers.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryFile {
    /// `verb/qualifier` pairs (or a bare verb) that no longer resolve.
    pub disabled: Vec<String>,
    /// Qualifier aliases, e.g. `find` -> `search`.
    pub aliases: BTreeMap<String, String>,
}

/// The handler lookup table, adjusted by `handlers.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerRegistry {
    file: RegistryFile,
}

impl HandlerRegistry {
    pub fn new(file: RegistryFile) -> Self {
        Self { file }
    }

    /// Read `handlers.json`; a missing file means everything is enabled.
    pub fn load(layout: &PrimeLayout) -> Result<Self, ExecError> {
        let path = layout.registry_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)?;
        let file = serde_json::from_str(&data)
            .map_err(|e| ExecError::Registry(format!("{}: {e}", path.display())))?;
        Ok(Self { file })
    }

    pub fn save(&self, layout: &PrimeLayout) -> Result<(), ExecError> {
        let path = layout.registry_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.file)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn file(&self) -> &RegistryFile {
        &self.file
    }

    fn canonical_qualifier<'a>(&'a self, qualifier: &'a str) -> &'a str {
        self.file
            .aliases
            .get(qualifier)
            .map(String::as_str)
            .unwrap_or(qualifier)
    }

    fn is_disabled(&self, verb: Verb, qualifier: &str) -> bool {
        let pair = format!("{verb}/{qualifier}");
        self.file
            .disabled
            .iter()
            .any(|d| d == &pair || d == verb.as_str())
    }

    /// Handlers that currently resolve, in palette order.
    pub fn palette(&self) -> Vec<HandlerKind> {
        HandlerKind::ALL
            .into_iter()
            .filter(|k| !self.is_disabled(k.verb(), k.qualifier()))
            .collect()
    }

    pub fn resolve(&self, action: &Action, layout: &PrimeLayout) -> Resolution {
        let verb = action.verb();
        let qualifier = self.canonical_qualifier(action.qualifier());
        let unregistered = |reason: &str| Resolution::Unregistered {
            verb,
            qualifier: qualifier.to_string(),
            reason: reason.to_string(),
        };

        if self.is_disabled(verb, qualifier) {
            return unregistered("disabled in handlers.json");
        }

        let kind = match (&action.spec, qualifier) {
            (ActionSpec::Get(spec), "execute") => match &spec.locator {
                Some(Locator::Path(p)) if p.starts_with(MEMORY_SCHEME) => HandlerKind::ReadMemory,
                Some(Locator::Path(_)) => HandlerKind::ReadFile,
                Some(Locator::Url(_)) => HandlerKind::FetchUrl,
                None => return unregistered("no locator"),
            },
            (ActionSpec::Get(_), "search") => HandlerKind::SearchMemory,
            (ActionSpec::Get(_), "env") => HandlerKind::ReadEnv,
            (ActionSpec::Run(spec), "execute") => {
                if interpreter(&spec.lang).is_none() {
                    return unregistered(
                        format!("no interpreter for lang `{}`", spec.lang).as_str(),
                    );
                }
                HandlerKind::RunScript
            }
            (ActionSpec::Set(spec), "execute") => {
                if spec.path.starts_with(MEMORY_SCHEME) {
                    HandlerKind::WriteMemory
                } else if resolve_path(layout.workspace(), &spec.path)
                    == normalize(&layout.registry_path())
                {
                    HandlerKind::WriteRegistry
                } else {
                    HandlerKind::WriteFile
                }
            }
            (ActionSpec::Set(spec), "clear") if spec.path == "memory://short_term" => {
                HandlerKind::ClearMemory
            }
            (ActionSpec::Set(_), "clear") => {
                return unregistered("only memory://short_term can be cleared")
            }
            _ => return unregistered("no handler for this verb/qualifier"),
        };
        debug!(id = %action.id(), ?kind, "Resolved handler");
        Resolution::Handler(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_core::parser::parse;
    use std::path::Path;

    fn resolve(registry: &HandlerRegistry, text: &str) -> Resolution {
        let layout = PrimeLayout::new(Path::new("/work"));
        let action = parse(text).into_iter().next().unwrap().unwrap();
        registry.resolve(&action, &layout)
    }

    fn kind(text: &str) -> HandlerKind {
        match resolve(&HandlerRegistry::default(), text) {
            Resolution::Handler(kind) => kind,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_resolves_each_target() {
        assert_eq!(kind("```get#g1 path=\"./a.txt\"\n```"), HandlerKind::ReadFile);
        assert_eq!(kind("```get#g1 path=\"memory://long_term\"\n```"), HandlerKind::ReadMemory);
        assert_eq!(kind("```get#g1 url=\"https://example.com\"\n```"), HandlerKind::FetchUrl);
        assert_eq!(
            kind("```get#g1 action=\"search\" query=\"x\"\n```"),
            HandlerKind::SearchMemory
        );
        assert_eq!(kind("```get#g1 action=\"env\"\n```"), HandlerKind::ReadEnv);
        assert_eq!(kind("```run#r1 lang=\"python\"\nprint(1)\n```"), HandlerKind::RunScript);
        assert_eq!(kind("```set#s1 path=\"out.txt\"\nx\n```"), HandlerKind::WriteFile);
        assert_eq!(
            kind("```set#s1 path=\"memory://short_term\"\nx\n```"),
            HandlerKind::WriteMemory
        );
        assert_eq!(
            kind("```set#s1 path=\"./.prime/handlers.json\"\n{}\n```"),
            HandlerKind::WriteRegistry
        );
        assert_eq!(
            kind("```set#s1 action=\"clear\" path=\"memory://short_term\"\n```"),
            HandlerKind::ClearMemory
        );
    }

    #[test]
    fn test_unknown_pairs_are_unregistered() {
        let registry = HandlerRegistry::default();
        assert!(matches!(
            resolve(&registry, "```get#g1 action=\"teleport\" path=\"a\"\n```"),
            Resolution::Unregistered { verb: Verb::Get, .. }
        ));
        assert!(matches!(
            resolve(&registry, "```run#r1 lang=\"cobol\"\nDISPLAY 1\n```"),
            Resolution::Unregistered { verb: Verb::Run, .. }
        ));
        assert!(matches!(
            resolve(&registry, "```set#s1 action=\"clear\" path=\"a.txt\"\n```"),
            Resolution::Unregistered { .. }
        ));
    }

    #[test]
    fn test_disabled_and_aliases() {
        let registry = HandlerRegistry::new(RegistryFile {
            disabled: vec!["run/execute".into()],
            aliases: [("find".to_string(), "search".to_string())].into(),
        });
        assert!(matches!(
            resolve(&registry, "```run#r1 lang=\"sh\"\necho hi\n```"),
            Resolution::Unregistered { .. }
        ));
        assert_eq!(
            resolve(&registry, "```get#g1 action=\"find\" query=\"x\"\n```"),
            Resolution::Handler(HandlerKind::SearchMemory)
        );
        assert!(!registry.palette().contains(&HandlerKind::RunScript));
        assert_eq!(registry.palette().len(), HandlerKind::ALL.len() - 1);
    }

    #[test]
    fn test_load_and_save() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = PrimeLayout::new(tmp.path());
        layout.create_dirs().unwrap();
        assert_eq!(HandlerRegistry::load(&layout).unwrap(), HandlerRegistry::default());

        let registry = HandlerRegistry::new(RegistryFile {
            disabled: vec!["get/env".into()],
            aliases: BTreeMap::new(),
        });
        registry.save(&layout).unwrap();
        assert_eq!(HandlerRegistry::load(&layout).unwrap(), registry);

        fs::write(layout.registry_path(), "not json").unwrap();
        assert!(matches!(
            HandlerRegistry::load(&layout),
            Err(ExecError::Registry(_))
        ));
    }
}
