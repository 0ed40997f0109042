//! CLI smoke tests: verify the commands that work without an API key.
//!
//! These tests run the compiled binary against a throwaway home directory
//! and store snapshot. No network access required.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Helper: run medchat with given args and return (exit_code, stdout, stderr).
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let bin = env!("CARGO_BIN_EXE_medchat");
    let output = Command::new(bin)
        .args(args)
        .current_dir(home)
        .env("HOME", home)
        .env("RUST_LOG", "off")
        .env("MEDCHAT_STORAGE_PATH", home.join("store.json"))
        .env_remove("MEDCHAT_BACKEND_API_KEY")
        .output()
        .expect("failed to execute medchat binary");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

fn home() -> TempDir {
    tempfile::tempdir().unwrap()
}

// ============================================================================
// Help
// ============================================================================

#[test]
fn cli_help_flag() {
    let home = home();
    let (code, stdout, _stderr) = run_cli(home.path(), &["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("summarize"));
    assert!(stdout.contains("close-sessions"));
}

#[test]
fn cli_no_args_is_usage_error() {
    let home = home();
    let (code, _stdout, stderr) = run_cli(home.path(), &[]);
    assert_eq!(code, 2);
    assert!(stderr.contains("Usage:"));
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn cli_config_check_defaults() {
    let home = home();
    let (code, stdout, _stderr) = run_cli(home.path(), &["config", "check"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("No config file found"));
    assert!(stdout.contains("backend.api_key is not set"));
    assert!(stdout.contains("Configuration looks good!"));
}

#[test]
fn cli_config_check_reports_invalid_limits() {
    let home = home();
    let path = home.path().join("bad.json");
    std::fs::write(&path, r#"{"agent": {"max_steps": 0}}"#).unwrap();

    let (code, stdout, _stderr) =
        run_cli(home.path(), &["--config", path.to_str().unwrap(), "config", "check"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("[ERROR]"));
    assert!(stdout.contains("max_steps"));
}

// ============================================================================
// Chat
// ============================================================================

#[test]
fn cli_chat_without_key_gets_fixed_reply() {
    let home = home();
    let (code, stdout, _stderr) = run_cli(home.path(), &["chat", "--user", "3", "-m", "سلام"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("API Key"));
}

// ============================================================================
// Store maintenance
// ============================================================================

#[test]
fn cli_wallet_credit_persists() {
    let home = home();
    let (code, stdout, _stderr) =
        run_cli(home.path(), &["wallet", "--user", "5", "--credit", "500000"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Balance: 500000"));

    let (code, stdout, _stderr) = run_cli(home.path(), &["wallet", "--user", "5"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Balance: 500000"));
}

#[test]
fn cli_wallet_rejects_negative_credit() {
    let home = home();
    let (code, _stdout, stderr) =
        run_cli(home.path(), &["wallet", "--user", "5", "--credit=-10"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("--credit must be positive"));
}

#[test]
fn cli_close_sessions_dry_run_on_empty_store() {
    let home = home();
    let (code, stdout, _stderr) = run_cli(home.path(), &["close-sessions", "--dry-run"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("No idle conversations"));
}

#[test]
fn cli_summarize_requires_target() {
    let home = home();
    let (code, _stdout, stderr) = run_cli(home.path(), &["summarize"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("--user, --conversation or --all"));
}

#[test]
fn cli_summarize_all_on_empty_store() {
    let home = home();
    let (code, stdout, _stderr) = run_cli(home.path(), &["summarize", "--all", "--limit", "3"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Rebuilt 0 summaries"));
}

#[test]
fn cli_cleanup_summaries_on_empty_store() {
    let home = home();
    let (code, stdout, _stderr) = run_cli(home.path(), &["cleanup-summaries"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Removed 0 duplicate summaries"));
}
