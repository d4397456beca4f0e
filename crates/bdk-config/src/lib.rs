//! bdk-config
//!
//! Layered YAML configuration for the billing ledger.
//! - Documents merge in order; later documents override earlier ones
//! - Secret-looking literal values are refused (`CONFIG_SECRET_DETECTED`)
//! - The merged config is canonicalized and hashed (SHA-256) so every run
//!   can record exactly which configuration it used
//! - Leaf keys that no code reads are reported (`CONFIG_UNUSED_KEYS`)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;

pub mod secrets;

/// Prefixes of values that must never appear literally in YAML.
const SECRET_PREFIXES: &[&str] = &[
    "postgres://",   // connection string with credentials
    "postgresql://", // same, long scheme
    "sk_live",       // payment provider live key
    "sk_test",       // payment provider test key
    "AKIA",          // AWS access key ID
    "-----BEGIN",    // PEM private keys
    "ghp_",          // GitHub PAT
    "xoxb-",         // Slack bot token
];

// ---------------------------------------------------------------------------
// Consumed keys
// ---------------------------------------------------------------------------

/// JSON-pointer prefixes read by code today. A leaf under any of these is
/// consumed; anything else is reported as unused.
pub const CONSUMED_POINTERS: &[&str] = &[
    // LedgerConfig::from_config_json
    "/ledger/overdue_after_days",
    "/ledger/currency",
    "/audit/path",
    "/audit/hash_chain",
    "/db/max_connections",
    "/reconcile/repair_owners",
    // secrets::resolve_database_url
    "/db/url_env",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Leaf pointers no code reads, sorted.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Report leaf keys not covered by [`CONSUMED_POINTERS`].
///
/// `Warn` always returns the report; `Fail` errors when it is not clean.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);
    let unused: BTreeSet<String> = leaves
        .into_iter()
        .filter(|leaf| !CONSUMED_POINTERS.iter().any(|c| covers(c, leaf)))
        .collect();
    let report = UnusedKeyReport {
        unused_leaf_pointers: unused.into_iter().collect(),
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        let shown: Vec<&String> = report.unused_leaf_pointers.iter().take(12).collect();
        bail!(
            "CONFIG_UNUSED_KEYS: {} config key(s) are not read by bdk: {shown:?}",
            report.unused_leaf_pointers.len()
        );
    }
    Ok(report)
}

/// "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc".
fn covers(consumed: &str, leaf: &str) -> bool {
    leaf.strip_prefix(consumed)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// JSON pointers of every scalar leaf; a scalar root is "/".
fn collect_leaf_pointers(v: &Value, at: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                let token = k.replace('~', "~0").replace('/', "~1");
                collect_leaf_pointers(child, &format!("{at}/{token}"), out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_leaf_pointers(child, &format!("{at}/{i}"), out);
            }
        }
        _ if at.is_empty() => out.push("/".to_string()),
        _ => out.push(at.to_string()),
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
    /// No layers: an empty object, still hashed.
    pub fn empty() -> Result<Self> {
        load_layered_yaml_from_strings(&[])
    }
}

/// Read each file in order and merge; later files override earlier ones.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("read config layer {p}")))
        .collect::<Result<Vec<String>>>()?;
    load_layered_yaml_from_strings(&docs.iter().map(String::as_str).collect::<Vec<_>>())
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for (i, raw) in yaml_docs.iter().enumerate() {
        let layer: Value = serde_yaml::from_str::<serde_yaml::Value>(raw)
            .map_err(anyhow::Error::from)
            .and_then(|y| serde_json::to_value(y).map_err(anyhow::Error::from))
            .with_context(|| format!("config layer {i} is not valid yaml"))?;
        merged = deep_merge(merged, layer);
    }

    enforce_no_secret_literals(&merged)?;

    // serde_json's default `Map` is ordered by key, so this is canonical.
    let canonical_json =
        serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        // An empty YAML document parses as null; it overrides nothing.
        (a_other, Value::Null) => a_other,
        (_, b_other) => b_other,
    }
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(|val| val.as_str()) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

// ---------------------------------------------------------------------------
// Typed settings
// ---------------------------------------------------------------------------

/// Typed view of the settings the ledger reads. Absent keys take defaults;
/// present keys of the wrong type are errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerConfig {
    pub overdue_after_days: i64,
    pub currency: String,
    pub audit_path: String,
    pub audit_hash_chain: bool,
    pub db_max_connections: u32,
    pub repair_owners: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            overdue_after_days: 30,
            currency: "EUR".to_string(),
            audit_path: "exports/audit.jsonl".to_string(),
            audit_hash_chain: true,
            db_max_connections: 10,
            repair_owners: true,
        }
    }
}

impl LedgerConfig {
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let d = Self::default();

        let overdue_after_days = match config_json.pointer("/ledger/overdue_after_days") {
            None => d.overdue_after_days,
            Some(v) => match v.as_i64() {
                Some(n) if n >= 0 => n,
                _ => bail!("CONFIG_INVALID /ledger/overdue_after_days: expected a non-negative integer, got {v}"),
            },
        };

        let currency = match config_json.pointer("/ledger/currency") {
            None => d.currency,
            Some(v) => match v.as_str() {
                Some(s) if s.len() == 3 && s.chars().all(|c| c.is_ascii_uppercase()) => {
                    s.to_string()
                }
                _ => bail!("CONFIG_INVALID /ledger/currency: expected an ISO 4217 code like \"EUR\", got {v}"),
            },
        };

        let audit_path = match config_json.pointer("/audit/path") {
            None => d.audit_path,
            Some(v) => match v.as_str() {
                Some(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => bail!("CONFIG_INVALID /audit/path: expected a non-empty string, got {v}"),
            },
        };

        let audit_hash_chain = read_bool(config_json, "/audit/hash_chain", d.audit_hash_chain)?;
        let repair_owners = read_bool(config_json, "/reconcile/repair_owners", d.repair_owners)?;

        let db_max_connections = match config_json.pointer("/db/max_connections") {
            None => d.db_max_connections,
            Some(v) => match v.as_u64().and_then(|n| u32::try_from(n).ok()) {
                Some(n) if n > 0 => n,
                _ => bail!("CONFIG_INVALID /db/max_connections: expected a positive integer, got {v}"),
            },
        };

        Ok(Self {
            overdue_after_days,
            currency,
            audit_path,
            audit_hash_chain,
            db_max_connections,
            repair_owners,
        })
    }
}

fn read_bool(config_json: &Value, pointer: &str, default: bool) -> Result<bool> {
    match config_json.pointer(pointer) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(v) => bail!("CONFIG_INVALID {pointer}: expected true or false, got {v}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumed_pointer_respects_segment_boundary() {
        assert!(covers("/a/b", "/a/b"));
        assert!(covers("/a/b", "/a/b/c"));
        assert!(!covers("/a/b", "/a/bc"));
    }

    #[test]
    fn leaf_pointers_escape_tokens() {
        let mut out = Vec::new();
        collect_leaf_pointers(&serde_json::json!({"a/b": {"c~d": [1]}}), "", &mut out);
        assert_eq!(out, vec!["/a~1b/c~0d/0".to_string()]);
    }

    #[test]
    fn empty_layer_does_not_erase_base() {
        let loaded = load_layered_yaml_from_strings(&["ledger:\n  currency: USD\n", ""]).unwrap();
        assert_eq!(
            loaded.config_json.pointer("/ledger/currency").and_then(|v| v.as_str()),
            Some("USD")
        );
    }

    #[test]
    fn short_values_are_never_secrets() {
        assert!(!looks_like_secret("AKIA"));
        assert!(looks_like_secret("postgres://u:p@host/db"));
    }
}
