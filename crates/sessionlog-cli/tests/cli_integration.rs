//! CLI Integration Tests
//!
//! These tests verify the CLI commands work correctly end-to-end.
//! They test the "wiring" between the CLI and the core library.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Create a CLI command with a temporary logs directory
fn cli_cmd(logs_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sessionlog").expect("Failed to find sessionlog binary");
    cmd.arg("--logs-dir").arg(logs_dir.path());
    cmd
}

/// The only session directory under the logs root
fn single_session(logs_dir: &Path) -> PathBuf {
    let sessions: Vec<_> = fs::read_dir(logs_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir())
        .collect();
    assert_eq!(sessions.len(), 1, "expected one session in {logs_dir:?}");
    sessions.into_iter().next().unwrap()
}

fn group_file(session: &Path, group: &str) -> PathBuf {
    session.join("Groups").join(group).join("Log.xml")
}

// ============================================================================
// Run Command Tests
// ============================================================================

#[test]
fn test_run_writes_groups() {
    let logs_dir = TempDir::new().unwrap();

    cli_cmd(&logs_dir)
        .args(["run", "--group", "App", "--continuous"])
        .write_stdin("started\nERROR [Net] connection lost\nwarn disk almost full\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Session:"))
        .stdout(predicate::str::contains("Submitted: 3"))
        .stdout(predicate::str::contains("Written: 3"));

    let session = single_session(logs_dir.path());
    assert!(session.join("session.json").is_file());

    let app = fs::read_to_string(group_file(&session, "App")).unwrap();
    assert!(app.starts_with("<?xml"));
    assert!(app.ends_with("</LogFile>"));
    assert!(app.contains("started"));
    assert!(app.contains("disk almost full"));

    let net = fs::read_to_string(group_file(&session, "Net")).unwrap();
    assert!(net.contains("Level=\"Error\""));
    assert!(net.contains("connection lost"));
}

#[test]
fn test_run_burst_flushes_at_shutdown() {
    let logs_dir = TempDir::new().unwrap();

    cli_cmd(&logs_dir)
        .args(["run", "--burst-ms", "60000"])
        .write_stdin("WARNING first\nWARNING second\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Written: 2"));

    let session = single_session(logs_dir.path());
    let content = fs::read_to_string(group_file(&session, "Default")).unwrap();
    let first = content.find("first").unwrap();
    let second = content.find("second").unwrap();
    assert!(first < second);
}

#[test]
fn test_run_min_level_filters() {
    let logs_dir = TempDir::new().unwrap();

    cli_cmd(&logs_dir)
        .args(["run", "--continuous", "--min-level", "error"])
        .write_stdin("info chatter\nERROR broken\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Written: 1"));

    let session = single_session(logs_dir.path());
    let content = fs::read_to_string(group_file(&session, "Default")).unwrap();
    assert!(!content.contains("chatter"));
    assert!(content.contains("broken"));
}

#[test]
fn test_run_rejects_unknown_level() {
    let logs_dir = TempDir::new().unwrap();

    cli_cmd(&logs_dir)
        .args(["run", "--min-level", "loud"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("loud"));
}

#[test]
fn test_run_with_config_file() {
    let logs_dir = TempDir::new().unwrap();
    let config = logs_dir.path().join("config.json");
    fs::write(
        &config,
        r#"{"groups": {"Net": {"continuous_enabled": true, "burst_enabled": false, "min_level": "Debug"}}}"#,
    )
    .unwrap();

    cli_cmd(&logs_dir)
        .arg("run")
        .arg("--config")
        .arg(&config)
        .write_stdin("debug [Net] handshake\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Written: 1"));
}

// ============================================================================
// Read Command Tests
// ============================================================================

#[test]
fn test_read_prints_records() {
    let logs_dir = TempDir::new().unwrap();

    cli_cmd(&logs_dir)
        .args(["run", "--continuous"])
        .write_stdin("ERROR [Net] a < b\nEXCEPTION [Net] crashed\n")
        .assert()
        .success();

    let session = single_session(logs_dir.path());
    cli_cmd(&logs_dir)
        .arg("read")
        .arg(group_file(&session, "Net"))
        .assert()
        .success()
        .stdout(predicate::str::contains("#1"))
        .stdout(predicate::str::contains("[Net] a < b"))
        .stdout(predicate::str::contains("Exception"))
        .stdout(predicate::str::contains("2 records"));
}

#[test]
fn test_read_missing_file_fails() {
    let logs_dir = TempDir::new().unwrap();

    cli_cmd(&logs_dir)
        .args(["read", "does-not-exist.xml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

// ============================================================================
// Collect and Summary Command Tests
// ============================================================================

#[test]
fn test_collect_empty_root() {
    let logs_dir = TempDir::new().unwrap();

    cli_cmd(&logs_dir)
        .arg("collect")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions"));
}

#[test]
fn test_collect_lists_files() {
    let logs_dir = TempDir::new().unwrap();

    cli_cmd(&logs_dir)
        .args(["run", "--continuous"])
        .write_stdin("ERROR [Net] lost\n")
        .assert()
        .success();

    cli_cmd(&logs_dir)
        .args(["collect", "--sessions", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sessions:"))
        .stdout(predicate::str::contains("session.json"))
        .stdout(predicate::str::contains("Log.xml"));
}

#[test]
fn test_summary_of_latest_session() {
    let logs_dir = TempDir::new().unwrap();

    cli_cmd(&logs_dir)
        .args(["run", "--continuous"])
        .write_stdin("ERROR [Net] connection lost\nWARNING [Ui] slow frame\n")
        .assert()
        .success();

    cli_cmd(&logs_dir)
        .arg("summary")
        .assert()
        .success()
        .stdout(predicate::str::contains("# Session Log Summary"))
        .stdout(predicate::str::contains("| Total | 2 |"))
        .stdout(predicate::str::contains("connection lost"))
        .stdout(predicate::str::contains("## Group: `Ui`"));
}

#[test]
fn test_summary_without_sessions_fails() {
    let logs_dir = TempDir::new().unwrap();

    cli_cmd(&logs_dir)
        .arg("summary")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No sessions"));
}
