use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn bin() -> Command {
    let path = assert_cmd::cargo::cargo_bin!("brewbox");
    let mut cmd = Command::new(path);
    cmd.env_remove("BREWBOX_LOG")
        .env_remove("BREWBOX_CONFIG")
        .env_remove("DEBUG");
    cmd
}

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("config.yaml");
    fs::write(&path, body).unwrap();
    path
}

fn test_config(dir: &Path) -> PathBuf {
    write_config(dir, "version: 1\noperator: cli-test-operator\n")
}

#[test]
fn help_lists_subcommands() {
    bin()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("create"))
        .stdout(contains("delete"))
        .stdout(contains("list"))
        .stdout(contains("shell"));
}

#[test]
fn create_rejects_conflicting_names() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    bin()
        .arg("--config")
        .arg(&config)
        .args(["--tty=false", "create", "foo", "--name", "bar"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("cannot be specified together"))
        .stderr(contains("exiting with an error").not());
}

#[test]
fn create_rejects_unknown_template() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    bin()
        .arg("--config")
        .arg(&config)
        .args(["create", "template://foo"])
        .assert()
        .failure()
        .stderr(contains("unknown template"));
}

#[test]
fn create_rejects_slash_in_name_flag() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    bin()
        .arg("--config")
        .arg(&config)
        .args(["create", "--name=a/b"])
        .assert()
        .failure()
        .stderr(contains("must not contain a slash"));
}

#[test]
fn delete_rejects_reserved_prefix() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    for alias in ["delete", "rm"] {
        bin()
            .arg("--config")
            .arg(&config)
            .args([alias, "brewbox_x"])
            .assert()
            .failure()
            .stderr(contains("must not start with"));
    }
}

#[test]
fn list_json_and_quiet_conflict() {
    bin()
        .args(["list", "--json", "--quiet"])
        .assert()
        .failure()
        .stderr(contains("cannot be used with"));
}

#[test]
fn list_prints_nothing_without_instances() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    for flag in ["--quiet", "--json"] {
        bin()
            .arg("--config")
            .arg(&config)
            .args(["ls", flag])
            .assert()
            .success()
            .stdout("");
    }
}

#[test]
fn list_table_has_header() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    bin()
        .arg("--config")
        .arg(&config)
        .arg("list")
        .assert()
        .success()
        .stdout(contains("NAME"))
        .stdout(contains("USER"));
}

#[test]
fn shell_requires_existing_instance() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    bin()
        .arg("--config")
        .arg(&config)
        .args(["shell", "--plain", "nosuch", "true"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("exiting with an error"))
        .stderr(contains("does not exist"))
        .stderr(contains("brewbox create nosuch"));
}

#[test]
fn config_rejects_unknown_fields() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), "version: 1\nbogus: true\n");
    bin()
        .arg("--config")
        .arg(&config)
        .arg("list")
        .assert()
        .failure()
        .stderr(contains("config error"));
}

#[test]
fn config_from_environment_must_exist() {
    let dir = tempdir().unwrap();
    bin()
        .env("BREWBOX_CONFIG", dir.path().join("missing.yaml"))
        .arg("list")
        .assert()
        .failure()
        .stderr(contains("config file not found"));
}

#[test]
fn debug_flag_logs_config_path() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    bin()
        .arg("--config")
        .arg(&config)
        .args(["--debug", "list", "--quiet"])
        .assert()
        .success()
        .stderr(contains("cli-test-operator"));
}
