//! CLI integration tests
//!
//! Tests the pcompose binary using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn pcompose() -> Command {
    Command::cargo_bin("pcompose")
        .expect("Failed to locate pcompose binary - ensure it's built before running tests")
}

#[test]
fn test_cli_help() {
    pcompose()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("pcompose"))
        .stdout(predicate::str::contains("--data-directory"))
        .stdout(predicate::str::contains("--ssh-address"));
}

#[test]
fn test_cli_version() {
    pcompose()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pcompose"));
}

#[test]
fn test_cli_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    pcompose()
        .current_dir(dir.path())
        .args(["--config", "missing.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[cfg(unix)]
mod hook_mode {
    use super::*;
    use std::path::Path;

    /// Link the binary into `<repo>/hooks/<name>` the way the server does
    fn install_hook(repo: &Path, name: &str) -> std::path::PathBuf {
        let hooks = repo.join("hooks");
        std::fs::create_dir_all(&hooks).unwrap();
        let link = hooks.join(name);
        std::os::unix::fs::symlink(assert_cmd::cargo::cargo_bin("pcompose"), &link).unwrap();
        link
    }

    #[test]
    fn test_update_hook_accepts_ref_update() {
        let repo = tempfile::tempdir().unwrap();
        let hook = install_hook(repo.path(), "update");

        Command::new(hook)
            .current_dir(repo.path())
            .env("RUST_LOG", "info")
            .args([
                "refs/heads/main",
                "0000000000000000000000000000000000000000",
                "1111111111111111111111111111111111111111",
            ])
            .assert()
            .success()
            .stderr(predicate::str::contains("refs/heads/main"));
    }

    #[test]
    fn test_pre_receive_without_input_fails() {
        let repo = tempfile::tempdir().unwrap();
        let hook = install_hook(repo.path(), "pre-receive");

        Command::new(hook)
            .current_dir(repo.path())
            .write_stdin("")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Missing ref update"));
    }

    #[test]
    fn test_hook_without_config_uses_defaults() {
        let repo = tempfile::tempdir().unwrap();
        let hook = install_hook(repo.path(), "pre-receive");

        Command::new(hook)
            .current_dir(repo.path())
            .env("RUST_LOG", "warn")
            .write_stdin(
                "0000000000000000000000000000000000000000 1111111111111111111111111111111111111111 refs/heads/main\n",
            )
            .assert()
            .success()
            .stderr(predicate::str::contains("using defaults"));
    }

    #[test]
    fn test_failed_deploy_reports_cause() {
        let repo = tempfile::tempdir().unwrap();
        let hook = install_hook(repo.path(), "post-receive");
        std::fs::write(
            repo.path().join("hooks/hooks.toml"),
            "data_directory = \"/nonexistent/pcompose-data\"\n",
        )
        .unwrap();

        Command::new(hook)
            .current_dir(repo.path())
            .write_stdin(
                "0000000000000000000000000000000000000000 1111111111111111111111111111111111111111 refs/heads/main\n",
            )
            .assert()
            .failure()
            .stderr(predicate::str::contains(
                "I/O error on /nonexistent/pcompose-data: No such file or directory",
            ));
    }
}
