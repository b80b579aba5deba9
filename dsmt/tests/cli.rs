//! End-to-end tests for the dsmt binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn dsmt() -> Command {
    let mut cmd = Command::cargo_bin("dsmt").unwrap();
    cmd.env_remove("DSMT_VERBOSE")
        .env_remove("DSMT_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_scenarios_lists_all() {
    dsmt()
        .arg("scenarios")
        .assert()
        .success()
        .stdout(predicate::str::contains("readers-then-writer"))
        .stdout(predicate::str::contains("forward-read"))
        .stdout(predicate::str::contains("ping-pong"))
        .stdout(predicate::str::contains("contended"));
}

#[test]
fn test_simulate_text_report() {
    let temp_dir = TempDir::new().unwrap();
    dsmt()
        .current_dir(temp_dir.path())
        .args(["simulate", "--scenario", "readers-then-writer", "--hosts", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("counter = 1"))
        .stdout(predicate::str::contains("host 0:"));
}

#[test]
fn test_simulate_json_report() {
    let temp_dir = TempDir::new().unwrap();
    let output = dsmt()
        .current_dir(temp_dir.path())
        .args(["simulate", "-s", "ping-pong", "-n", "3", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["scenario"], "ping-pong");
    assert_eq!(report["value"], 9);
    assert_eq!(report["hosts"].as_array().map(Vec::len), Some(3));
}

#[test]
fn test_simulate_too_few_hosts_fails() {
    let temp_dir = TempDir::new().unwrap();
    dsmt()
        .current_dir(temp_dir.path())
        .args(["simulate", "-s", "forward-read", "-n", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 3 hosts"));
}

#[test]
fn test_init_then_simulate_with_config() {
    let temp_dir = TempDir::new().unwrap();
    dsmt()
        .args(["init", "--path"])
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("dsmt.toml"));

    let config = temp_dir.path().join("dsmt.toml");
    assert!(config.exists());

    dsmt()
        .arg("--config")
        .arg(&config)
        .args(["simulate", "-s", "contended"])
        .assert()
        .success()
        .stdout(predicate::str::contains("counter = 2"));
}

#[test]
fn test_missing_config_fails() {
    dsmt()
        .args(["--config", "/nonexistent/dsmt.toml", "scenarios"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}
