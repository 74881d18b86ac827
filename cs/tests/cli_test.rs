//! End-to-end tests for the `cs` binary

use assert_cmd::Command;
use checkpointstore::{CheckpointKind, CheckpointManager, Config, WorkerState};
use predicates::prelude::*;
use tempfile::tempdir;

fn cs() -> Command {
    let mut cmd = Command::cargo_bin("cs").unwrap();
    // Keep default config discovery away from the developer's machine
    cmd.env("XDG_CONFIG_HOME", std::env::temp_dir().join("cs-cli-test-none"));
    cmd.env("NO_COLOR", "1");
    cmd
}

fn seed(root: &std::path::Path, owner: &str, count: u64) {
    let manager = CheckpointManager::new(owner, &Config::at(root)).unwrap();
    for i in 0..count {
        let state = WorkerState {
            pending_message_count: i,
            ..Default::default()
        };
        manager.create_checkpoint(CheckpointKind::Routine, &state).unwrap();
    }
}

#[test]
fn test_list_empty_store() {
    let temp = tempdir().unwrap();
    cs().arg("--store")
        .arg(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoints found"));
}

#[test]
fn test_list_and_latest() {
    let temp = tempdir().unwrap();
    seed(temp.path(), "worker-a", 2);
    seed(temp.path(), "worker-b", 1);

    cs().arg("--store")
        .arg(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("worker-a").and(predicate::str::contains("worker-b")));

    cs().arg("--store")
        .arg(temp.path())
        .args(["latest", "worker-a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pending_message_count\": 1"));
}

#[test]
fn test_latest_missing_kind() {
    let temp = tempdir().unwrap();
    seed(temp.path(), "worker-a", 1);

    cs().arg("--store")
        .arg(temp.path())
        .args(["latest", "worker-a", "--kind", "recovery"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No recovery checkpoint"));
}

#[test]
fn test_show_rejects_missing_file() {
    let temp = tempdir().unwrap();
    cs().arg("--store")
        .arg(temp.path())
        .args(["show", "/nonexistent/routine-0000000000000001.json"])
        .assert()
        .failure();
}

#[test]
fn test_invalid_kind_rejected() {
    let temp = tempdir().unwrap();
    cs().arg("--store")
        .arg(temp.path())
        .args(["list", "--kind", "weekly"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown checkpoint kind"));
}

#[test]
fn test_prune_reports_per_owner() {
    let temp = tempdir().unwrap();
    seed(temp.path(), "worker-a", 2);

    cs().arg("--store")
        .arg(temp.path())
        .arg("prune")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pruned 0 checkpoint(s) for worker-a"));
}
