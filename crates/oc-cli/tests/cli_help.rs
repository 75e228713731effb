use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_dispatcher_and_positions_subcommands() {
    Command::cargo_bin("oc")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dispatcher"))
        .stdout(predicate::str::contains("positions"));
}

#[test]
fn dispatcher_submit_requires_bucket_and_url() {
    Command::cargo_bin("oc")
        .unwrap()
        .args(["dispatcher", "submit"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--bucket"));
}

#[test]
fn unreachable_daemon_reports_an_error_instead_of_panicking() {
    Command::cargo_bin("oc")
        .unwrap()
        .args([
            "--base-url",
            "http://127.0.0.1:1",
            "dispatcher",
            "queue",
        ])
        .assert()
        .failure();
}
