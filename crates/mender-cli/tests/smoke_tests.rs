//! Smoke tests for the mender CLI
//!
//! These tests verify basic CLI functionality works correctly.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin until assert_cmd is updated
#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get a command for the mender binary
fn mender() -> Command {
    let mut cmd = Command::cargo_bin("mender").expect("mender binary should exist");
    cmd.env_remove("MENDER_CONFIG")
        .env_remove("MENDER_MAX_SESSIONS")
        .env_remove("MENDER_TIMEOUT_MS")
        .env_remove("RUST_LOG");
    cmd
}

const FAILURE: &str = r#"{
  "script_id": "login.spec.ts",
  "original_locator": "id=old-login-btn",
  "target_url": "http://localhost/login",
  "failure_kind": "element_not_found"
}"#;

const ELEMENT: &str = r#"{"tag": "button", "attributes": {"id": "old-login-btn", "data-testid": "login"}, "text": "Log in"}"#;

const SCRIPT: &str = "await page.locator(\"id=old-login-btn\").click();\n";

fn fixtures(dom: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("failure.json"), FAILURE).unwrap();
    fs::write(dir.path().join("element.json"), ELEMENT).unwrap();
    fs::write(dir.path().join("dom.json"), dom).unwrap();
    fs::write(dir.path().join("login.spec.ts"), SCRIPT).unwrap();
    dir
}

// ============================================================================
// Basic CLI Tests
// ============================================================================

#[test]
fn test_version_flag() {
    mender()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.4.0"));
}

#[test]
fn test_help_flag() {
    mender()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("locator"))
        .stdout(predicate::str::contains("heal"))
        .stdout(predicate::str::contains("restore"));
}

#[test]
fn test_no_args_shows_help() {
    mender().assert().failure();
}

#[test]
fn test_heal_subcommand_help() {
    mender()
        .args(["heal", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--failure"))
        .stdout(predicate::str::contains("--dom"));
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn test_config_prints_yaml() {
    mender()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max_concurrent_sessions: 3"))
        .stdout(predicate::str::contains("confidence_threshold"));
}

#[test]
fn test_config_applies_overrides() {
    mender()
        .args(["--max-sessions", "7", "config", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"max_concurrent_sessions\": 7"));
}

#[test]
fn test_config_rejects_zero_sessions() {
    mender()
        .args(["--max-sessions", "0", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_concurrent_sessions"));
}

// ============================================================================
// Classify / Candidates
// ============================================================================

#[test]
fn test_classify_locator_failure() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("run.log");
    fs::write(&log, "Error: no such element: Unable to locate element: locator('#submit')").unwrap();
    mender()
        .arg("classify")
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("element_not_found"))
        .stdout(predicate::str::contains("#submit"));
}

#[test]
fn test_classify_other_failure() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("run.log");
    fs::write(&log, "net::ERR_CONNECTION_REFUSED at http://localhost:3000").unwrap();
    mender()
        .arg("classify")
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("not locator-related"));
}

#[test]
fn test_candidates_lists_tiers() {
    let dir = fixtures("[]");
    mender()
        .args(["candidates", "--element"])
        .arg(dir.path().join("element.json"))
        .args(["--exclude", "id=old-login-btn"])
        .assert()
        .success()
        .stdout(predicate::str::contains("testid=login"))
        .stdout(predicate::str::contains("id=old-login-btn").not());
}

#[test]
fn test_candidates_missing_file() {
    mender()
        .args(["candidates", "--element", "/nonexistent/element.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("I/O error"));
}

// ============================================================================
// Heal / Restore
// ============================================================================

#[test]
fn test_heal_rewrites_script_and_restore_reverts() {
    let dir = fixtures(
        r#"[{"tag": "button", "attributes": {"id": "new-login-btn", "data-testid": "login"}, "text": "Log in"}]"#,
    );
    let script = dir.path().join("login.spec.ts");

    let output = mender()
        .args(["heal", "--format", "json", "--failure"])
        .arg(dir.path().join("failure.json"))
        .arg("--element")
        .arg(dir.path().join("element.json"))
        .arg("--dom")
        .arg(dir.path().join("dom.json"))
        .arg("--script")
        .arg(&script)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let result: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(result["success"], true);
    assert!(!fs::read_to_string(&script).unwrap().contains("old-login-btn"));

    let backup = result["backup_path"].as_str().unwrap().to_string();
    mender()
        .args(["restore", &backup])
        .arg(&script)
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&script).unwrap(), SCRIPT);
}

#[test]
fn test_heal_reports_failure() {
    let dir = fixtures(r#"[{"tag": "p", "text": "Welcome back"}]"#);
    mender()
        .args(["heal", "--failure"])
        .arg(dir.path().join("failure.json"))
        .arg("--element")
        .arg(dir.path().join("element.json"))
        .arg("--dom")
        .arg(dir.path().join("dom.json"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAILED"))
        .stderr(predicate::str::contains("no alternative validated"));
}

#[test]
fn test_restore_missing_backup() {
    mender()
        .args(["restore", "/nonexistent/a.bak", "/nonexistent/a.spec.ts"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("backup not found"));
}
