//! Scenario: config hash stability.
//!
//! # Invariants under test
//!
//! 1. The same layers hash identically on every load.
//! 2. Key order inside a document does not change the hash.
//! 3. A changed value changes the hash.
//! 4. Later layers override earlier ones, and the typed view sees the result.

use tbot_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
connection:
  host: "127.0.0.1"
  port: 7497
  client_id: 0
bots:
  - symbol: "AAPL"
    max_dollar_amount: 10000
    max_risk_dollar_amount: 100
recorder:
  enabled: false
"#;

const BASE_YAML_REORDERED: &str = r#"
recorder:
  enabled: false
bots:
  - max_risk_dollar_amount: 100
    symbol: "AAPL"
    max_dollar_amount: 10000
connection:
  client_id: 0
  port: 7497
  host: "127.0.0.1"
"#;

const OVERLAY_YAML: &str = r#"
connection:
  port: 4002
recorder:
  enabled: true
  dir: "/var/log/tbot"
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
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash, "canonicalization sorts keys");
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[&BASE_YAML.replace("AAPL", "MSFT")]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_wins_and_reaches_the_typed_view() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let app = loaded.app().unwrap();

    assert_eq!(app.connection.port, 4002);
    assert_eq!(app.connection.host, "127.0.0.1", "untouched keys survive");
    assert!(app.recorder.enabled);
    assert_eq!(app.recorder.dir, "/var/log/tbot");
    assert_eq!(app.bots.len(), 1);

    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_ne!(loaded.config_hash, base.config_hash);
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn empty_layers_are_no_ops() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&["", BASE_YAML, ""]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn shipped_sample_layer_loads() {
    let sample = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../config/paper.yaml")
        .display()
        .to_string();
    let loaded = tbot_config::load_layered_yaml(&[sample]).unwrap();
    let app = loaded.app().unwrap();
    assert_eq!(app.bots.len(), 2);
    assert_eq!(app.bots[1].quantity, Some(5));
    assert_eq!(app.paper.fill_price, Some(100.0));
    assert!(tbot_config::report_unused_keys(&loaded.config_json, tbot_config::UnusedKeyPolicy::Fail).is_ok());
}
