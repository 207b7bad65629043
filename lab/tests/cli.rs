//! Binary-level checks that need no workspace connection.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `lab` running in an empty directory with no credentials anywhere.
fn lab(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("lab").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env_remove("DATABRICKS_HOST")
        .env_remove("DATABRICKS_TOKEN")
        .env_remove("DATABRICKS_PROFILE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_every_command() {
    let home = TempDir::new().unwrap();
    lab(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("setup"))
        .stdout(predicate::str::contains("cleanup"))
        .stdout(predicate::str::contains("users"))
        .stdout(predicate::str::contains("entitlements"));
}

#[test]
fn track_flags_are_exclusive() {
    let home = TempDir::new().unwrap();
    lab(&home)
        .args(["setup", "--cluster-only", "--tables-only"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn malformed_volume_is_rejected_before_connecting() {
    let home = TempDir::new().unwrap();
    lab(&home)
        .args(["setup", "catalog.schema"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid volume argument"))
        .stderr(predicate::str::contains("Failed to connect").not());
}

#[test]
fn missing_credentials_fail_setup() {
    let home = TempDir::new().unwrap();
    lab(&home)
        .arg("setup")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to connect to the workspace"));
}

#[test]
fn bad_number_in_env_file_is_a_config_error() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("lab.env"), "NUM_WORKERS=many\n").unwrap();
    lab(&home)
        .args(["--env-file", "lab.env", "users", "list"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("NUM_WORKERS"));
}
