//! Smoke tests -- verify the binary runs and the subcommands are wired up.

use assert_cmd::Command;
use predicates::str::contains;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("rtmh-processor").unwrap();
    cmd.env_remove("RTMH_CONFIG").env_remove("DATABASE_PATH");
    cmd
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Streaming window aggregation"));
}

#[test]
fn test_cli_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("rtmh-processor"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["run", "incidents", "snapshots", "config"] {
        cli().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_config_prints_effective_values() {
    cli()
        .arg("config")
        .env("MIN_SAMPLES", "25")
        .assert()
        .success()
        .stdout(contains("window_size_ms = 60000"))
        .stdout(contains("min_samples = 25"));
}

#[test]
fn test_config_rejects_unparseable_env() {
    cli()
        .arg("config")
        .env("WINDOW_SIZE_MS", "a minute")
        .assert()
        .failure();
}

#[test]
fn test_run_file_then_list_incidents_and_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("rtmh.db");
    let input = dir.path().join("input.ndjson");

    let mut lines = String::new();
    for _ in 0..12 {
        lines.push_str(r#"{"topic":"rtmh.logs","value":{"level":"error","message":"boom"}}"#);
        lines.push('\n');
    }
    lines.push_str("this line is not json\n");
    lines.push_str(r#"{"topic":"rtmh.metrics","value":{"cpu":0.5}}"#);
    lines.push('\n');
    std::fs::write(&input, lines).unwrap();

    let db = db.to_str().unwrap();
    cli()
        .args(["--db", db, "run", "--input"])
        .arg(&input)
        .assert()
        .success();

    cli()
        .args(["--db", db, "incidents"])
        .assert()
        .success()
        .stdout(contains("High Error Rate Detected"))
        .stdout(contains("high"));

    cli()
        .args(["--db", db, "snapshots", "--window-key", "metrics_cpu"])
        .assert()
        .success()
        .stdout(contains("metrics_cpu"))
        .stdout(contains("average"));
}

#[test]
fn test_empty_database_lists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("empty.db");
    let db = db.to_str().unwrap();

    cli()
        .args(["--db", db, "incidents"])
        .assert()
        .success()
        .stdout(contains("No incidents found."));
}

#[cfg(unix)]
#[test]
fn test_interrupt_exits_while_stdin_stays_open() {
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("rtmh.db");
    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin("rtmh-processor"))
        .args(["--db", db.to_str().unwrap(), "run"])
        .env_remove("RTMH_CONFIG")
        .env_remove("DATABASE_PATH")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    // Held open for the whole test: the reader never sees EOF.
    let _stdin = child.stdin.take().unwrap();

    std::thread::sleep(Duration::from_secs(1));
    let sent = std::process::Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(sent.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if child.try_wait().unwrap().is_some() {
            break;
        }
        if Instant::now() > deadline {
            child.kill().unwrap();
            panic!("process still running 10s after SIGINT");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
