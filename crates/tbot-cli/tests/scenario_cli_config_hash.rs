//! Scenario: `tbot config-hash`.
//!
//! # Invariants under test
//!
//! 1. The command prints `config_hash=<64 hex>` then the canonical JSON.
//! 2. The printed hash is identical across runs and across key order.
//! 3. A literal account id in any layer fails the command without echoing it.

use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

fn write(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path.display().to_string()
}

fn hash_line(dir: &Path, paths: &[&str]) -> String {
    let out = Command::cargo_bin("tbot")
        .unwrap()
        .current_dir(dir)
        .arg("config-hash")
        .args(paths)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8(out.stdout)
        .unwrap()
        .lines()
        .next()
        .unwrap()
        .to_string()
}

#[test]
fn prints_hash_and_canonical_json() {
    let dir = tempfile::tempdir().unwrap();
    let base = write(dir.path(), "base.yaml", "connection:\n  port: 7497\nbots:\n  - symbol: \"AAPL\"\n");

    Command::cargo_bin("tbot")
        .unwrap()
        .current_dir(dir.path())
        .args(["config-hash", base.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::is_match("^config_hash=[0-9a-f]{64}\n").unwrap())
        .stdout(predicate::str::contains(
            r#"{"bots":[{"symbol":"AAPL"}],"connection":{"port":7497}}"#,
        ));
}

#[test]
fn hash_is_stable_across_runs_and_key_order() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(dir.path(), "a.yaml", "connection:\n  host: \"h\"\n  port: 1\n");
    let b = write(dir.path(), "b.yaml", "connection:\n  port: 1\n  host: \"h\"\n");

    let first = hash_line(dir.path(), &[a.as_str()]);
    assert_eq!(first, hash_line(dir.path(), &[a.as_str()]));
    assert_eq!(first, hash_line(dir.path(), &[b.as_str()]));

    let overlay = write(dir.path(), "overlay.yaml", "connection:\n  port: 2\n");
    assert_ne!(first, hash_line(dir.path(), &[a.as_str(), overlay.as_str()]));
}

#[test]
fn literal_account_id_fails() {
    let dir = tempfile::tempdir().unwrap();
    let bad = write(dir.path(), "bad.yaml", "connection:\n  account_env: \"U1234567\"\n");

    Command::cargo_bin("tbot")
        .unwrap()
        .current_dir(dir.path())
        .args(["config-hash", bad.as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"))
        .stderr(predicate::str::contains("U1234567").not());
}
