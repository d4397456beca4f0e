//! Config hash stability.
//!
//! - Same inputs hash the same.
//! - Key order inside YAML does not matter.
//! - Different values hash differently.
//! - Later layers override earlier ones.

use bdk_config::{load_layered_yaml, load_layered_yaml_from_strings};
use std::io::Write;

const BASE_YAML: &str = r#"
ledger:
  overdue_after_days: 30
  currency: "EUR"
audit:
  path: "exports/audit.jsonl"
  hash_chain: true
db:
  url_env: "BDK_DATABASE_URL"
  max_connections: 10
"#;

const BASE_YAML_REORDERED: &str = r#"
db:
  max_connections: 10
  url_env: "BDK_DATABASE_URL"
audit:
  hash_chain: true
  path: "exports/audit.jsonl"
ledger:
  currency: "EUR"
  overdue_after_days: 30
"#;

const OVERLAY_YAML: &str = r#"
ledger:
  overdue_after_days: 45
db:
  max_connections: 4
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(
        original.config_hash, reordered.config_hash,
        "reordering keys in YAML must not change the hash"
    );
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_overrides_base() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let days = loaded
        .config_json
        .pointer("/ledger/overdue_after_days")
        .and_then(|v| v.as_i64())
        .unwrap();
    assert_eq!(days, 45);
    // untouched sibling survives the merge
    let currency = loaded
        .config_json
        .pointer("/ledger/currency")
        .and_then(|v| v.as_str())
        .unwrap();
    assert_eq!(currency, "EUR");
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn files_hash_like_strings() {
    let mut base = tempfile::NamedTempFile::new().unwrap();
    base.write_all(BASE_YAML.as_bytes()).unwrap();
    let mut overlay = tempfile::NamedTempFile::new().unwrap();
    overlay.write_all(OVERLAY_YAML.as_bytes()).unwrap();

    let from_files = load_layered_yaml(&[
        base.path().to_str().unwrap(),
        overlay.path().to_str().unwrap(),
    ])
    .unwrap();
    let from_strings = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(from_files.config_hash, from_strings.config_hash);
}

#[test]
fn missing_file_names_the_path() {
    let err = load_layered_yaml(&["/definitely/not/here.yaml"]).unwrap_err();
    assert!(format!("{err:#}").contains("/definitely/not/here.yaml"));
}
