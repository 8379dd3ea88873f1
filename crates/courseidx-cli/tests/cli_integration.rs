use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to create a content tree and a config pointing at it.
fn create_test_config(temp_dir: &TempDir) -> String {
    let content = temp_dir.path().join("content");
    fs::create_dir_all(content.join("rust-101/module-1")).unwrap();
    fs::write(content.join("rust-101/index.md"), "# Rust 101").unwrap();
    fs::write(content.join("rust-101/module-1/lesson-1.md"), "# Ownership").unwrap();

    let config_content = format!(
        r#"name: cli-test
content:
  root: {}
store:
  kind: memory
"#,
        content.display()
    );

    let config_path = temp_dir.path().join("courseidx.yaml");
    fs::write(&config_path, &config_content).unwrap();

    config_path.to_str().unwrap().to_string()
}

fn courseidx(config_path: &str, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_courseidx"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_cli_validate() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_config(&temp_dir);

    let output = courseidx(&config_path, &["validate"]);
    assert!(
        output.status.success(),
        "validate failed: {:?}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout(&output).contains("Configuration is valid."));
}

#[test]
fn test_cli_reindex_then_stats() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_config(&temp_dir);

    let output = courseidx(&config_path, &["reindex", "rust-101"]);
    assert!(
        output.status.success(),
        "reindex failed: {:?}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout(&output).contains("Queued reindex of rust-101"));

    // A second request replaces the first
    let output = courseidx(&config_path, &["reindex", "rust-101"]);
    assert!(stdout(&output).contains("replaces"));

    let output = courseidx(&config_path, &["stats", "--json"]);
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["waiting"], 1);
    assert_eq!(stats["paused"], false);

    assert!(temp_dir.path().join("content/.courseidx/queue.db").exists());
}

#[test]
fn test_cli_pause_and_resume() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_config(&temp_dir);

    let output = courseidx(&config_path, &["pause"]);
    assert!(output.status.success());

    let output = courseidx(&config_path, &["stats"]);
    assert!(stdout(&output).contains("Queue is paused."));

    courseidx(&config_path, &["resume"]);
    let output = courseidx(&config_path, &["stats"]);
    assert!(!stdout(&output).contains("Queue is paused."));
}

#[test]
fn test_cli_dead_letters_empty_and_missing_replay() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_config(&temp_dir);

    let output = courseidx(&config_path, &["dead-letters"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No dead letters."));

    let output = courseidx(&config_path, &["replay", "7"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Dead letter 7 not found"));
}

#[test]
fn test_cli_progress_unknown_job() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = create_test_config(&temp_dir);

    let output = courseidx(&config_path, &["progress", "no-such-job"]);
    assert!(!output.status.success());
}
