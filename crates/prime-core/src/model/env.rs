use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Interpreters probed on `PATH` to build the tool palette.
const KNOWN_INTERPRETERS: &[&str] = &[
    "sh", "bash", "zsh", "python3", "python", "node", "ruby", "perl", "php", "pwsh", "curl", "git",
];

/// Environment captured once at run start and written to `env.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvSnapshot {
    pub executable: String,
    pub version: String,
    pub backend: String,
    pub model: String,
    pub os: String,
    pub cwd: PathBuf,
    pub tool_palette: Vec<String>,
    /// Allow-listed environment variables only.
    pub env: BTreeMap<String, String>,
    pub captured_at: DateTime<Utc>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    pub fn capture(backend: &str, model: &str, cwd: &Path, allowlist: &[String]) -> Self {
        let executable = std::env::current_exe()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".into());
        let tool_palette = KNOWN_INTERPRETERS
            .iter()
            .filter(|name| find_on_path(name).is_some())
            .map(|name| name.to_string())
            .collect();

        Self {
            executable,
            version: env!("CARGO_PKG_VERSION").to_string(),
            backend: backend.to_string(),
            model: model.to_string(),
            os: std::env::consts::OS.to_string(),
            cwd: cwd.to_path_buf(),
            tool_palette,
            env: allowlisted_env(allowlist),
            captured_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![format!("OS: {}", self.os)];
        parts.push(format!("cwd: {}", self.cwd.display()));
        if !self.tool_palette.is_empty() {
            parts.push(format!("Tools: {}", self.tool_palette.join(", ")));
        }
        parts.push(format!("Model: {} via {}", self.model, self.backend));
        parts.join(" | ")
    }
}

/// The subset of the process environment named in `allowlist`.
pub fn allowlisted_env(allowlist: &[String]) -> BTreeMap<String, String> {
    allowlist
        .iter()
        .filter_map(|k| std::env::var(k).ok().map(|v| (k.clone(), v)))
        .collect()
}

/// Resolve an executable name against `PATH`.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_filters_env() {
        std::env::set_var("PRIME_TEST_ALLOWED", "yes");
        std::env::set_var("PRIME_TEST_SECRET", "no");
        let snap = EnvSnapshot::capture(
            "scripted",
            "test-model",
            Path::new("/tmp"),
            &["PRIME_TEST_ALLOWED".to_string()],
        );
        assert_eq!(snap.env.get("PRIME_TEST_ALLOWED").map(String::as_str), Some("yes"));
        assert!(!snap.env.contains_key("PRIME_TEST_SECRET"));
        assert_eq!(snap.model, "test-model");
        assert!(snap.summary().contains("test-model via scripted"));
    }

    #[test]
    fn test_snapshot_serde_roundtrip() {
        let snap = EnvSnapshot::capture("b", "m", Path::new("/"), &[]);
        let json = serde_json::to_string_pretty(&snap).unwrap();
        let parsed: EnvSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, parsed);
    }
}
