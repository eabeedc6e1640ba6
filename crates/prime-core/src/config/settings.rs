use std::collections::BTreeMap;
use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::layout::PrimeLayout;
use crate::model::Mode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Shell command that reads a prompt on stdin and streams the reply on
    /// stdout.
    pub command: Option<String>,
    pub model: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: None,
            model: "unknown".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub default_timeout_secs: u64,
    pub shell: String,
    pub env_allowlist: Vec<String>,
    /// Output beyond this many bytes only reaches the stream file: it is
    /// not kept in memory, in result data or in the cache.
    pub max_output_bytes: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 300,
            shell: "sh".into(),
            env_allowlist: ["PATH", "HOME", "LANG", "USER", "TERM"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_output_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub initial_mode: Mode,
    /// Number of recent turns kept in the session window.
    pub window: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            initial_mode: Mode::M2,
            window: 10,
        }
    }
}

/// Contents of `.prime/config.json`. Missing fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimeConfig {
    pub backend: BackendConfig,
    pub exec: ExecConfig,
    pub cache: CacheConfig,
    pub governor: GovernorConfig,
    /// Extra verb aliases, merged over the built-in ones.
    pub aliases: BTreeMap<String, String>,
}

impl PrimeConfig {
    /// Read the config, falling back to defaults when the file is absent.
    pub fn load(layout: &PrimeLayout) -> Result<Self, CoreError> {
        let path = layout.config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)?;
        serde_json::from_str(&data)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, layout: &PrimeLayout) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(layout.config_path(), json)?;
        Ok(())
    }

    /// Built-in verb aliases overlaid with the configured ones.
    pub fn verb_aliases(&self) -> BTreeMap<String, String> {
        let mut aliases: BTreeMap<String, String> = [
            ("read", "get"),
            ("exec", "run"),
            ("shell", "run"),
            ("write", "set"),
        ]
        .into_iter()
        .map(|(a, v)| (a.to_string(), v.to_string()))
        .collect();
        aliases.extend(self.aliases.clone());
        aliases
    }
}
