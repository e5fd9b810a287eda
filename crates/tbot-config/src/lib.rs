//! Layered YAML configuration.
//!
//! Documents are deep-merged in order (later layers override earlier ones),
//! checked for literal secrets, canonicalized to JSON and hashed. The hash is
//! what the CLI prints so two runs can prove they used the same settings.
//! [`AppConfig`] is the typed view the binaries consume.

use std::collections::BTreeSet;
use std::fs;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub mod app;
pub mod secrets;

pub use app::{
    AppConfig, BotConfig, ConnectionConfig, PaperConfig, RecorderConfig, ENV_CLIENT_ID, ENV_HOST,
    ENV_PORT,
};
pub use secrets::{resolve_secrets, ResolvedSecrets};

/// If any leaf string in the merged config starts with one of these, loading
/// fails with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "glpat-",
    "xoxb-",
    "xoxp-",
];

/// Top-level sections [`AppConfig`] reads. Anything outside them is unused.
pub const CONSUMED_POINTERS: &[&str] = &["/connection", "/bots", "/recorder", "/paper"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Sorted leaf pointers not under any consumed prefix.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// With `Fail`, unused keys are an error; with `Warn` the report is returned
/// for the caller to log.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let mut unused = BTreeSet::new();
    walk_leaves(config_json, &mut String::new(), &mut |ptr, _| {
        if !CONSUMED_POINTERS.iter().any(|p| is_prefix_pointer(p, ptr)) {
            unused.insert(ptr.to_string());
        }
    });

    let report = UnusedKeyReport {
        unused_leaf_pointers: unused.into_iter().collect(),
    };
    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        let first: Vec<&String> = report.unused_leaf_pointers.iter().take(12).collect();
        bail!(
            "CONFIG_UNUSED_KEYS: {} unused config leaf key(s). First few: {first:?}",
            report.unused_leaf_pointers.len()
        );
    }
    Ok(report)
}

/// "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    leaf.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Calls `visit` with the JSON pointer of every scalar leaf. A scalar root
/// is reported as "/".
fn walk_leaves<'a>(v: &'a Value, path: &mut String, visit: &mut impl FnMut(&str, &'a Value)) {
    let mark = path.len();
    match v {
        Value::Object(map) => {
            for (key, child) in map {
                path.push('/');
                path.push_str(&key.replace('~', "~0").replace('/', "~1"));
                walk_leaves(child, path, visit);
                path.truncate(mark);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                path.push('/');
                path.push_str(&idx.to_string());
                walk_leaves(child, path, visit);
                path.truncate(mark);
            }
        }
        leaf if path.is_empty() => visit("/", leaf),
        leaf => visit(path.as_str(), leaf),
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    pub fn app(&self) -> Result<AppConfig> {
        AppConfig::from_json(&self.config_json)
    }
}

pub fn load_layered_yaml<P: AsRef<str>>(paths: &[P]) -> Result<LoadedConfig> {
    let mut docs = Vec::with_capacity(paths.len());
    for p in paths {
        let p = p.as_ref();
        docs.push(fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?);
    }
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());
    for (i, raw) in yaml_docs.iter().enumerate() {
        let layer: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("invalid yaml in layer {i}"))?;
        let layer = serde_json::to_value(layer)
            .with_context(|| format!("layer {i} is not representable as json"))?;
        // An empty document is a no-op layer.
        if !layer.is_null() {
            merge_into(&mut merged, layer);
        }
    }

    reject_secret_literals(&merged)?;

    // serde_json's map is ordered by key, so this text is canonical.
    let canonical_json = serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Maps merge key by key; arrays and scalars in `layer` replace wholesale.
fn merge_into(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn reject_secret_literals(v: &Value) -> Result<()> {
    let mut hit = None;
    walk_leaves(v, &mut String::new(), &mut |ptr, leaf| {
        if hit.is_none() && leaf.as_str().is_some_and(looks_like_secret) {
            hit = Some(ptr.to_string());
        }
    });
    match hit {
        Some(ptr) => bail!("CONFIG_SECRET_DETECTED leaf={ptr} value=REDACTED"),
        None => Ok(()),
    }
}

/// Known key prefixes, or a literal broker account id (`U1234567`,
/// `DU1234567`): account ids belong in the environment, named by
/// `connection.account_env`.
fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 7 {
        return false;
    }
    if SECRET_PREFIXES.iter().any(|p| t.starts_with(p)) {
        return true;
    }
    let digits = t.strip_prefix("DU").or_else(|| t.strip_prefix('U'));
    matches!(digits, Some(d) if d.len() >= 6 && d.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_scalars_and_recurses_into_maps() {
        let mut merged = serde_json::json!({"connection": {"host": "a", "port": 1}, "bots": [1, 2]});
        merge_into(&mut merged, serde_json::json!({"connection": {"port": 2}, "bots": [3]}));
        assert_eq!(
            merged,
            serde_json::json!({"connection": {"host": "a", "port": 2}, "bots": [3]})
        );
    }

    #[test]
    fn account_ids_look_like_secrets() {
        assert!(looks_like_secret("DU1234567"));
        assert!(looks_like_secret("U7654321"));
        assert!(looks_like_secret("sk-abcdefgh"));
        assert!(!looks_like_secret("UBER"));
        assert!(!looks_like_secret("TBOT_ACCOUNT"));
        assert!(!looks_like_secret("USD"));
    }

    #[test]
    fn prefix_pointer_boundaries() {
        assert!(is_prefix_pointer("/bots", "/bots/0/symbol"));
        assert!(is_prefix_pointer("/bots", "/bots"));
        assert!(!is_prefix_pointer("/bots", "/botsx/0"));
    }
}
