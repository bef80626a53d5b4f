//! Binary-level checks of the CLI surface and exit codes

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_exits_zero() {
    Command::cargo_bin("wd")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Autonomous host monitoring"));
}

#[test]
fn version_exits_zero() {
    Command::cargo_bin("wd").unwrap().arg("--version").assert().success();
}

#[test]
fn missing_command_is_usage_error() {
    Command::cargo_bin("wd").unwrap().assert().code(1);
}

#[test]
fn unknown_command_is_usage_error() {
    Command::cargo_bin("wd").unwrap().arg("frobnicate").assert().code(1);
}

#[test]
fn unknown_log_stream_is_usage_error() {
    Command::cargo_bin("wd").unwrap().args(["logs", "bogus"]).assert().code(1);
}
