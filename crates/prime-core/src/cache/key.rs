use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::model::{Attrs, LineRange, Locator, Verb};

/// Tag prefixed to every key's input. Bumped whenever the material changes.
pub const KEY_VERSION: &str = "ucm-key/v2";

/// Attributes that steer the engine rather than the action.
const CONTROL_ATTRS: &[&str] = &["cache"];

/// Content digest identifying an action's normalized inputs: `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    const PREFIX: &'static str = "sha256:";

    /// Digest of `material`, serialized canonically (object keys sorted).
    fn digest(material: &Value) -> Self {
        let input = format!("{KEY_VERSION}\n{material}");
        Self(format!("{}{:x}", Self::PREFIX, Sha256::digest(input.as_bytes())))
    }

    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.strip_prefix(Self::PREFIX)?;
        (hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .then(|| Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn hex(&self) -> &str {
        &self.0[Self::PREFIX.len()..]
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("malformed cache key {s:?}"))
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Hex SHA-256 of arbitrary bytes, used for source versions and content.
pub fn content_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn attrs_value(attrs: &Attrs) -> Value {
    let kept = attrs.without(CONTROL_ATTRS);
    let map: BTreeMap<&str, &str> = kept.iter().collect();
    json!(map)
}

/// `get`: verb, attributes, locator, range and the version of the source
/// (e.g. the digest of the file contents).
pub fn get_key(
    attrs: &Attrs,
    locator: Option<&Locator>,
    range: Option<LineRange>,
    source_version: &str,
) -> CacheKey {
    let locator = locator.map(|l| match l {
        Locator::Path(p) => json!({"path": p}),
        Locator::Url(u) => json!({"url": u}),
    });
    CacheKey::digest(&json!({
        "verb": Verb::Get.as_str(),
        "attrs": attrs_value(attrs),
        "locator": locator,
        "range": range.map(|r| r.to_string()),
        "source_version": source_version,
    }))
}

/// `run`: verb, attributes, toolchain identity, body, the allow-listed
/// environment and a hash of the absolute working directory.
pub fn run_key(
    attrs: &Attrs,
    toolchain: &str,
    body: &str,
    env: &BTreeMap<String, String>,
    cwd: &Path,
) -> CacheKey {
    let cwd_hash = content_digest(cwd.to_string_lossy().as_bytes());
    CacheKey::digest(&json!({
        "verb": Verb::Run.as_str(),
        "attrs": attrs_value(attrs),
        "toolchain": toolchain,
        "body": body,
        "env": env,
        "cwd": cwd_hash,
    }))
}

/// `set`: target, content and the append flag. The qualifier separates
/// `clear` from writing empty content.
pub fn set_key(qualifier: &str, target: &str, content: &[u8], append: bool) -> CacheKey {
    CacheKey::digest(&json!({
        "verb": Verb::Set.as_str(),
        "qualifier": qualifier,
        "target": target,
        "content": content_digest(content),
        "append": append,
    }))
}
