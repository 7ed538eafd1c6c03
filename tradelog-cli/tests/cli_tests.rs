//! End-to-end tests of the `tradelog` binary against a throwaway cache directory.

use assert_cmd::{Command, cargo::cargo_bin_cmd};
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use std::time::Duration;
use tempfile::TempDir;

/// A command bound to `dir` with a remote nobody listens on.
fn tradelog(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("tradelog");
    cmd.env("TRADELOG_DATA_DIR", dir.path())
        .env("TRADELOG_API_BASE_URL", "http://127.0.0.1:9/api/")
        .env("TRADELOG_STORAGE_BACKEND", "file")
        .env_remove("TRADELOG_QUIESCENCE_DELAY_MS")
        .timeout(Duration::from_secs(20));
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("tradelog");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(contains("messages"))
        .stdout(contains("send"))
        .stdout(contains("dedupe"))
        .stdout(contains("outbox"))
        .stdout(contains("sync"));
}

#[test]
fn test_send_then_list_shows_local_message() {
    let dir = TempDir::new().unwrap();

    tradelog(&dir)
        .args(["send", "s1", "Bought 100 AAPL at 187.20"])
        .assert()
        .success()
        .stdout(contains("local_"));

    tradelog(&dir)
        .args(["messages", "s1"])
        .assert()
        .success()
        .stdout(contains("Bought 100 AAPL at 187.20"))
        .stdout(contains("local"));
}

#[test]
fn test_messages_of_unknown_session() {
    let dir = TempDir::new().unwrap();

    tradelog(&dir)
        .args(["messages", "nobody"])
        .assert()
        .success()
        .stdout(contains("No cached messages for session nobody."));
}

#[test]
fn test_dedupe_removes_repeated_sends() {
    let dir = TempDir::new().unwrap();
    for _ in 0..2 {
        tradelog(&dir)
            .args(["send", "s1", "Stopped out on TSLA"])
            .assert()
            .success();
    }

    tradelog(&dir)
        .args(["dedupe", "s1"])
        .assert()
        .success()
        .stdout(contains("Removed 1 duplicate message(s) from session s1."));
}

#[test]
fn test_unsent_message_waits_in_outbox() {
    let dir = TempDir::new().unwrap();
    tradelog(&dir)
        .args(["send", "s1", "Closing the week flat"])
        .assert()
        .success();

    tradelog(&dir)
        .arg("outbox")
        .assert()
        .success()
        .stdout(contains("pending").and(contains("s1_local_")));

    tradelog(&dir)
        .args(["outbox", "--failed"])
        .assert()
        .success()
        .stdout(contains("Outbox is empty."));
}

#[test]
fn test_clear_drops_session_messages() {
    let dir = TempDir::new().unwrap();
    tradelog(&dir)
        .args(["send", "s1", "Scratch note"])
        .assert()
        .success();

    tradelog(&dir).args(["clear", "s1"]).assert().success();

    tradelog(&dir)
        .args(["messages", "s1"])
        .assert()
        .success()
        .stdout(contains("No cached messages for session s1."));
    tradelog(&dir)
        .arg("outbox")
        .assert()
        .success()
        .stdout(contains("Outbox is empty."));
}

#[test]
fn test_new_session_is_listed() {
    let dir = TempDir::new().unwrap();
    tradelog(&dir)
        .args(["new-session", "Earnings week"])
        .assert()
        .success()
        .stdout(contains("local_"));

    tradelog(&dir)
        .arg("sessions")
        .assert()
        .success()
        .stdout(contains("Earnings week"));
}

#[test]
fn test_merged_view_of_unsynced_session_stays_offline() {
    let dir = TempDir::new().unwrap();
    let output = tradelog(&dir)
        .args(["new-session", "Opening range"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let session_id = String::from_utf8(output.stdout).unwrap().trim().to_string();

    tradelog(&dir)
        .args(["send", &session_id, "Faded the gap on NVDA"])
        .assert()
        .success();

    tradelog(&dir)
        .args(["messages", &session_id, "--merged"])
        .assert()
        .success()
        .stdout(contains("Faded the gap on NVDA").and(contains("local")));
}

#[test]
fn test_invalid_role_is_rejected() {
    let dir = TempDir::new().unwrap();

    tradelog(&dir)
        .args(["send", "s1", "hello", "--role", "robot"])
        .assert()
        .failure()
        .stderr(contains("invalid value 'robot'"));
}

#[test]
fn test_config_writes_file() {
    let dir = TempDir::new().unwrap();

    cargo_bin_cmd!("tradelog")
        .args(["config", "--format", "json", "--output-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(contains("generated successfully"));

    assert!(dir.path().join("tradelog.json").exists());
}

#[test]
fn test_completion_for_bash() {
    cargo_bin_cmd!("tradelog")
        .args(["completion", "--shell", "bash"])
        .assert()
        .success()
        .stdout(contains("tradelog"));
}
