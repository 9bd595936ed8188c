//! Latchkey CLI Integration Tests
//!
//! Run the built `latchkey` binary. Tests that need a live Redis server are
//! marked `#[ignore]`; run them with LATCHKEY_TEST_REDIS_URL set and
//! `cargo test -p latchkey-cli --test cli_test -- --ignored`.

use std::process::{Command, Output};

use latchkey_common::{EXIT_LOCK_NOT_ACQUIRED, EXIT_STORE_UNAVAILABLE};

fn latchkey(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_latchkey"))
        .args(args)
        .env_remove("RUST_LOG")
        .env("LATCHKEY_REDIS__CONNECT_TIMEOUT", "1s")
        .output()
        .expect("failed to run latchkey binary")
}

fn test_redis_url() -> String {
    std::env::var("LATCHKEY_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string())
}

#[test]
fn test_help_lists_subcommands() {
    let output = latchkey(&["--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ping"));
    assert!(stdout.contains("status"));
    assert!(stdout.contains("exec"));
}

#[test]
fn test_unreachable_store_exit_code() {
    // Nothing listens on port 1
    let output = latchkey(&[
        "--redis-url",
        "redis://127.0.0.1:1/0",
        "--log-level",
        "off",
        "ping",
    ]);

    assert_eq!(output.status.code(), Some(EXIT_STORE_UNAVAILABLE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("lock store unavailable"));
}

#[test]
fn test_invalid_duration_flag_fails() {
    let output = latchkey(&[
        "--redis-url",
        "redis://127.0.0.1:1/0",
        "exec",
        "job",
        "--ttl",
        "soon",
        "--",
        "true",
    ]);
    assert!(!output.status.success());
}

#[test]
#[ignore]
fn test_exec_runs_command_under_lock() {
    let url = test_redis_url();
    let output = latchkey(&[
        "--redis-url",
        &url,
        "--key-prefix",
        "latchkey-cli-test:",
        "exec",
        "exec-job",
        "--ttl",
        "5s",
        "--",
        "sh",
        "-c",
        "echo inside; exit 4",
    ]);

    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stdout).contains("inside"));
}

#[test]
#[ignore]
fn test_exec_busy_lock_exit_code() {
    let url = test_redis_url();
    let args = [
        "--redis-url",
        url.as_str(),
        "--key-prefix",
        "latchkey-cli-test:",
        "exec",
        "busy-job",
        "--ttl",
        "10s",
        "--",
        "sh",
        "-c",
    ];

    // Outer run holds the lock while the inner run tries it without waiting
    let inner = format!(
        "{} --redis-url {} --key-prefix latchkey-cli-test: exec busy-job -- true",
        env!("CARGO_BIN_EXE_latchkey"),
        url
    );
    let mut outer = args.to_vec();
    outer.push(&inner);
    let output = latchkey(&outer);

    assert_eq!(output.status.code(), Some(EXIT_LOCK_NOT_ACQUIRED));
}

#[test]
#[ignore]
fn test_status_json() {
    let url = test_redis_url();
    let output = latchkey(&[
        "--redis-url",
        &url,
        "--key-prefix",
        "latchkey-cli-test:",
        "status",
        "status-job",
        "--json",
    ]);

    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["name"], "status-job");
    assert_eq!(status["key"], "latchkey-cli-test:status-job");
    assert_eq!(status["locked"], false);
}
