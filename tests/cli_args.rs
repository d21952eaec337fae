use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn at_least_one_url_is_required() {
    Command::cargo_bin("storybookify")
        .expect("binary")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn an_unparseable_url_fails_with_context() {
    Command::cargo_bin("storybookify")
        .expect("binary")
        .arg("not a url")
        .assert()
        .failure()
        .stderr(predicate::str::contains("parse story url"));
}

#[test]
fn help_documents_the_flags() {
    Command::cargo_bin("storybookify")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--single")
                .and(predicate::str::contains("--no-teaser"))
                .and(predicate::str::contains("--no-images"))
                .and(predicate::str::contains("--disk-cache-path")),
        );
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    Command::cargo_bin("storybookify")
        .expect("binary")
        .env("RUST_LOG", "debug")
        .arg("http://127.0.0.1:9/s/unreachable")
        .assert()
        .failure()
        .stderr(predicate::str::contains("parsed cli"));
}
