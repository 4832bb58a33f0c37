//! CLI tests for the `lockclash` binary, run against the memory engine.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

#[cfg(test)]
#[allow(deprecated)]
mod tests {
    use std::{fs, path::Path, process::Command};

    use assert_cmd::prelude::*;
    use predicates::prelude::*;
    use tempfile::tempdir;

    /// Command isolated from the caller's config files and environment.
    fn lockclash(dir: &Path) -> Command {
        let mut cmd = Command::cargo_bin("lockclash").unwrap();
        cmd.current_dir(dir)
            .env("HOME", dir)
            .env("XDG_CONFIG_HOME", dir)
            .env("RUST_LOG", "warn");
        for (key, _) in std::env::vars() {
            if key.starts_with("LOCKCLASH_") {
                cmd.env_remove(key);
            }
        }
        cmd
    }

    #[test]
    fn test_memory_run_prints_summary() {
        let dir = tempdir().unwrap();

        lockclash(dir.path())
            .args(["--engine", "memory", "--hold-ms", "200", "--await-secs", "10"])
            .assert()
            .success()
            .stdout(predicate::str::contains("===== SUMMARY ====="))
            .stdout(predicate::str::contains("COMMITTED"))
            .stdout(predicate::str::contains("DEADLOCK"))
            .stdout(predicate::str::contains("committed=1 deadlock=1"))
            .stdout(predicate::str::is_match(r"\[\d{2}:\d{2}:\d{2}\.\d{3}\] session-1 ").unwrap());
    }

    #[test]
    fn test_json_report_is_parseable() {
        let dir = tempdir().unwrap();

        let output = lockclash(dir.path())
            .args([
                "--engine",
                "memory",
                "--hold-ms",
                "200",
                "--await-secs",
                "10",
                "--json",
            ])
            .output()
            .unwrap();
        assert!(output.status.success());

        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["outcomes"].as_array().map(Vec::len), Some(2));
        assert_eq!(report["timed_out"], false);
    }

    #[test]
    fn test_project_config_file_is_used() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("lockclash.toml"),
            "engine = \"memory\"\nhold_ms = 50\nsessions = 1\n",
        )
        .unwrap();

        lockclash(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("session-1: COMMITTED"))
            .stdout(predicate::str::contains("session-2").not());
    }

    #[test]
    fn test_missing_row_reports_error_with_rollback() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("lockclash.toml"),
            "engine = \"memory\"\nid_b = 999\nhold_ms = 50\nsessions = 1\n\n[memory]\nrows = [1, 2]\n",
        )
        .unwrap();

        lockclash(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("session-1: ERROR"))
            .stdout(predicate::str::contains("not found"))
            .stdout(predicate::str::contains("(rollback executed)"));
    }

    #[test]
    fn test_oversized_await_exits_with_config_code() {
        let dir = tempdir().unwrap();

        lockclash(dir.path())
            .args(["--engine", "memory", "--await-secs", "18446744073709551615"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("await_secs"))
            .stderr(predicate::str::contains("panicked").not());
    }

    #[test]
    fn test_same_row_sessions_commit_in_turn() {
        let dir = tempdir().unwrap();

        lockclash(dir.path())
            .args([
                "--engine",
                "memory",
                "--id-a",
                "1",
                "--id-b",
                "1",
                "--hold-ms",
                "100",
                "--await-secs",
                "10",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("committed=2 deadlock=0"));
    }

    #[test]
    fn test_project_config_restores_defaults_over_global() {
        let dir = tempdir().unwrap();
        let global_dir = dir.path().join("lockclash");
        fs::create_dir_all(&global_dir).unwrap();
        fs::write(
            global_dir.join("config.toml"),
            "engine = \"memory\"\nsessions = 1\nid_a = 5\nid_b = 6\nhold_ms = 50\n",
        )
        .unwrap();
        fs::write(dir.path().join("lockclash.toml"), "id_a = 1\nid_b = 2\n").unwrap();

        lockclash(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "session-1: COMMITTED - locked id=1 then id=2",
            ));
    }

    #[test]
    fn test_missing_explicit_config_exits_with_config_code() {
        let dir = tempdir().unwrap();

        lockclash(dir.path())
            .args(["--config", "does-not-exist.toml"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("not found"));
    }

    #[test]
    fn test_malformed_config_exits_with_config_code() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("lockclash.toml"), "hold_ms = \"long\"\n").unwrap();

        lockclash(dir.path())
            .assert()
            .code(1)
            .stderr(predicate::str::contains("parse"));
    }

    #[test]
    fn test_env_override_applies() {
        let dir = tempdir().unwrap();

        lockclash(dir.path())
            .env("LOCKCLASH_ENGINE", "memory")
            .env("LOCKCLASH_SESSIONS", "1")
            .env("LOCKCLASH_HOLD_MS", "20")
            .assert()
            .success()
            .stdout(predicate::str::contains("committed=1"));
    }
}
