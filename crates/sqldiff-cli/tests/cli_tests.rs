//! CLI argument handling tests. Anything touching a live database is out of
//! scope here; these cover parse/validation failures and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;

fn sqldiff() -> Command {
    Command::cargo_bin("sqldiff").unwrap()
}

#[test]
fn help_lists_usage_forms() {
    sqldiff()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--key-columns"))
        .stdout(predicate::str::contains("--bisection-factor"))
        .stdout(predicate::str::contains("--conf"));
}

#[test]
fn missing_positionals_exit_with_user_error() {
    sqldiff()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Missing first database URI"));
}

#[test]
fn unknown_algorithm_is_a_user_error() {
    sqldiff()
        .args([
            "postgresql://localhost/a",
            "t1",
            "postgresql://localhost/b",
            "t2",
            "-a",
            "fulldiff",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown algorithm"));
}

#[test]
fn bad_age_is_a_user_error() {
    sqldiff()
        .args([
            "postgresql://localhost/a",
            "t1",
            "postgresql://localhost/b",
            "t2",
            "--min-age",
            "5fortnights",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("time unit"));
}

#[test]
fn invalid_uri_is_a_user_error() {
    sqldiff()
        .args(["not-a-uri", "t1", "also-not-a-uri", "t2"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid connection URI"));
}

#[test]
fn missing_config_file_is_a_user_error() {
    sqldiff()
        .args(["--conf", "/nonexistent/sqldiff.toml"])
        .assert()
        .code(2);
}

#[test]
fn run_flag_requires_conf() {
    sqldiff()
        .args(["--run", "nightly"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--conf"));
}

#[test]
fn config_file_supplies_positionals() {
    let dir = tempfile::tempdir().unwrap();
    let conf = dir.path().join("sqldiff.toml");
    std::fs::write(
        &conf,
        r#"
[run.default]

[run.broken.1]
database = "postgresql://localhost/a"
# table intentionally missing
"#,
    )
    .unwrap();

    sqldiff()
        .args(["--conf", conf.to_str().unwrap(), "--run", "broken"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Missing first table"));
}
