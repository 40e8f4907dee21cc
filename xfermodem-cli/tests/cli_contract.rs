//! Integration tests for core CLI contract behavior.

use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("xfermodem")
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("xfermodem"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("xfermodem"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("xfermodem"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::contains("xfermodem"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn list_ports_json_writes_machine_output_to_stdout_only() {
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid json expected");
    assert!(
        parsed.is_array(),
        "list-ports --json should return an array"
    );
}

#[test]
fn send_missing_file_keeps_stdout_clean() {
    let mut cmd = cli_cmd();
    cmd.args(["send", "/tmp/not_exists_for_contract_test.bin"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn non_interactive_send_without_port_fails_fast() {
    let dir = tempdir().expect("tempdir should be created");
    let file = dir
        .path()
        .join("payload.bin");
    fs::write(&file, b"dummy payload").expect("write payload.bin");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--non-interactive")
        .arg("send")
        .arg(&file)
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("port")
        );
}
