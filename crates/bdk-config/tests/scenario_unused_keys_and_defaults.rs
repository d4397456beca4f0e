use bdk_config::{
    load_layered_yaml_from_strings, report_unused_keys, LedgerConfig, UnusedKeyPolicy,
};

fn load(yaml: &str) -> serde_json::Value {
    load_layered_yaml_from_strings(&[yaml])
        .expect("test yaml must parse cleanly")
        .config_json
}

#[test]
fn warn_mode_reports_unused_keys_without_error() {
    let cfg = load(
        r#"
ledger:
  currency: "EUR"
  rounding: "bankers"
ui:
  theme: dark
"#,
    );
    let report = report_unused_keys(&cfg, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(
        report.unused_leaf_pointers,
        vec!["/ledger/rounding".to_string(), "/ui/theme".to_string()]
    );
}

#[test]
fn fail_mode_errors_on_unused_keys() {
    let cfg = load("ui:\n  theme: dark\n");
    let err = report_unused_keys(&cfg, UnusedKeyPolicy::Fail).unwrap_err();
    assert!(err.to_string().contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn fully_consumed_config_is_clean() {
    let cfg = load(
        r#"
ledger:
  overdue_after_days: 14
  currency: "USD"
audit:
  path: "/var/lib/bdk/audit.jsonl"
  hash_chain: false
db:
  url_env: "BDK_DATABASE_URL"
  max_connections: 3
reconcile:
  repair_owners: false
"#,
    );
    assert!(report_unused_keys(&cfg, UnusedKeyPolicy::Fail).unwrap().is_clean());

    let lc = LedgerConfig::from_config_json(&cfg).unwrap();
    assert_eq!(lc.overdue_after_days, 14);
    assert_eq!(lc.currency, "USD");
    assert_eq!(lc.audit_path, "/var/lib/bdk/audit.jsonl");
    assert!(!lc.audit_hash_chain);
    assert_eq!(lc.db_max_connections, 3);
    assert!(!lc.repair_owners);
}

#[test]
fn absent_keys_take_defaults() {
    let lc = LedgerConfig::from_config_json(&load("{}")).unwrap();
    assert_eq!(lc, LedgerConfig::default());
    assert_eq!(lc.overdue_after_days, 30);
    assert_eq!(lc.currency, "EUR");
    assert_eq!(lc.audit_path, "exports/audit.jsonl");
}

#[test]
fn wrong_types_are_rejected() {
    for yaml in [
        "ledger:\n  overdue_after_days: -1\n",
        "ledger:\n  overdue_after_days: soon\n",
        "ledger:\n  currency: euro\n",
        "audit:\n  hash_chain: maybe\n",
        "db:\n  max_connections: 0\n",
    ] {
        let err = LedgerConfig::from_config_json(&load(yaml)).unwrap_err();
        assert!(err.to_string().contains("CONFIG_INVALID"), "{yaml}: {err}");
    }
}
