// crates/scd-pipeline-cli/tests/cli_commands.rs
// ============================================================================
// Module: CLI Command Tests
// Description: Integration tests for the `scd-pipeline` binary.
// Purpose: Validate step chaining, JSON reports, and exit codes end to end.
// Dependencies: scd-pipeline-cli binary, serde_json, tempfile
// ============================================================================

//! ## Overview
//! Runs the binary against a `SQLite`-backed config in a temp directory so
//! state persists across invocations the way it does under a scheduler.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use serde_json::Value;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn scd_pipeline_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_scd-pipeline"))
}

fn write_fixture(dir: &Path, rows: usize) -> PathBuf {
    let mut data = String::new();
    for index in 0 .. rows {
        let state = if index % 2 == 0 { "CA" } else { "TX" };
        writeln!(data, r#"{{"ID": "A-{index}", "Severity": {}, "State": "{state}"}}"#, index % 4)
            .unwrap();
    }
    fs::write(dir.join("accidents.jsonl"), data).unwrap();
    let config = format!(
        r#"
[store]
type = "sqlite"
path = "{db}"

[[streams]]
id = "accidents"
default_chunk_size = 4

[streams.source]
path = "{source}"

[streams.schema]
natural_key = ["ID"]
fields = [
    {{ name = "ID", kind = "text", required = true }},
    {{ name = "Severity", kind = "integer" }},
    {{ name = "State", kind = "text" }},
]

[splits]
train = 0.5
validation = 0.25
test = 0.25
seed = 7
stratify_by = "State"

[audit]
sink = "none"
"#,
        db = dir.join("pipeline.db").display(),
        source = dir.join("accidents.jsonl").display(),
    );
    let path = dir.join("scd-pipeline.toml");
    fs::write(&path, config).unwrap();
    path
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(scd_pipeline_bin())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("run scd-pipeline")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout json")
}

fn stderr_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stderr).expect("stderr json")
}

fn setup(rows: usize) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path(), rows);
    (dir, config)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn config_validate_accepts_the_fixture() {
    let (_dir, config) = setup(2);
    let output = run(&config, &["config", "validate"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "Config valid.");
}

#[test]
fn config_example_prints_toml() {
    let output = Command::new(scd_pipeline_bin()).args(["config", "example"]).output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("[[streams]]"));
    assert!(text.contains("[splits]"));
}

#[test]
fn missing_config_fails_with_message() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&dir.path().join("absent.toml"), &["status"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load config"));
}

#[test]
fn ingest_advances_one_chunk_per_invocation() {
    let (_dir, config) = setup(10);

    let first = stdout_json(&run(&config, &["ingest", "--stream", "accidents"]));
    assert_eq!(first["progress"]["consumed"], 4);
    assert_eq!(first["new"], 4);

    let second = stdout_json(&run(&config, &["ingest", "--stream", "accidents"]));
    assert_eq!(second["progress"]["consumed"], 8);
    assert_ne!(first["batch_id"], second["batch_id"]);

    let third =
        stdout_json(&run(&config, &["ingest", "--stream", "accidents", "--chunk-size", "5"]));
    assert_eq!(third["progress"]["consumed"], 10);
    assert_eq!(third["progress"]["percent_complete"], 100.0);

    let status = stdout_json(&run(&config, &["status", "--stream", "accidents"]));
    assert_eq!(status["consumed"], 10);
    assert_eq!(status["available"], 10);

    let all = stdout_json(&run(&config, &["status"]));
    assert_eq!(all.as_array().unwrap().len(), 1);
}

#[test]
fn unknown_stream_reports_failure_on_stderr() {
    let (_dir, config) = setup(2);
    let output = run(&config, &["ingest", "--stream", "weather"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let report = stderr_json(&output);
    assert_eq!(report["step"], "ingest");
    assert_eq!(report["kind"], "configuration");
    assert_eq!(report["retry_safe"], false);
    assert_eq!(report["stream_id"], "weather");
}

#[test]
fn historize_rejects_unknown_batch() {
    let (_dir, config) = setup(2);
    let output = run(&config, &["historize", "--stream", "accidents", "--batch-id", "missing"]);
    assert_eq!(output.status.code(), Some(1));
    let report = stderr_json(&output);
    assert_eq!(report["step"], "historize");
    assert_eq!(report["kind"], "configuration");
}

#[test]
fn historize_replays_a_landed_batch_without_new_changes() {
    let (_dir, config) = setup(4);
    let ingest = stdout_json(&run(&config, &["ingest", "--stream", "accidents", "--mode", "full"]));
    let batch_id = ingest["batch_id"].as_str().unwrap().to_string();
    let replay = stdout_json(&run(
        &config,
        &["historize", "--stream", "accidents", "--batch-id", &batch_id],
    ));
    assert_eq!(replay["batch_id"], batch_id.as_str());
    assert_eq!(replay["new"], 0);
    assert_eq!(replay["changed"], 0);
    assert_eq!(replay["unchanged"], 4);
}

#[test]
fn assign_splits_labels_every_current_version_once() {
    let (_dir, config) = setup(8);
    stdout_json(&run(&config, &["ingest", "--stream", "accidents", "--mode", "full"]));

    let report = stdout_json(&run(&config, &["assign-splits", "--stream", "accidents"]));
    assert_eq!(report["eligible"], 8);
    assert_eq!(report["assigned"], 8);
    assert_eq!(report["seed"], 7);

    let again = stdout_json(&run(&config, &["assign-splits", "--stream", "accidents"]));
    assert_eq!(again["assigned"], 0);

    let mut total = 0;
    for split in ["train", "validation", "test"] {
        let records =
            stdout_json(&run(&config, &["records", "--stream", "accidents", "--split", split]));
        let records = records.as_array().unwrap();
        assert!(records.iter().all(|record| record["split"] == split));
        total += records.len();
    }
    assert_eq!(total, 8);
}

#[test]
fn history_reads_versions_by_natural_key() {
    let (_dir, config) = setup(3);
    stdout_json(&run(
        &config,
        &["ingest", "--stream", "accidents", "--mode", "full", "--as-of-unix-ms", "1000"],
    ));

    let history = stdout_json(&run(
        &config,
        &["history", "--stream", "accidents", "--key", r#"{"ID": "A-1"}"#],
    ));
    assert_eq!(history.as_array().unwrap().len(), 1);

    let before = stdout_json(&run(
        &config,
        &["history", "--stream", "accidents", "--key", r#"{"ID": "A-1"}"#, "--at-unix-ms", "10"],
    ));
    assert!(before.is_null());

    let during = stdout_json(&run(
        &config,
        &["history", "--stream", "accidents", "--key", r#"{"ID": "A-1"}"#, "--at-unix-ms", "1500"],
    ));
    assert!(during.is_object());
}

#[test]
fn history_rejects_non_object_keys() {
    let (_dir, config) = setup(1);
    let output = run(&config, &["history", "--stream", "accidents", "--key", r#"["A-1"]"#]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("JSON object"));
}

#[test]
fn negative_as_of_is_rejected() {
    let (_dir, config) = setup(1);
    let output = run(&config, &["ingest", "--stream", "accidents", "--as-of-unix-ms=-5"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--as-of-unix-ms"));
}

#[test]
fn serve_rejects_non_loopback_bind_without_opt_in() {
    let (dir, config) = setup(1);
    let mut text = fs::read_to_string(&config).unwrap();
    text.push_str(
        r#"
[server]
bind = "0.0.0.0:8080"

[server.auth]
mode = "api_key"
api_keys = ["cli-test-key-0123456789"]
"#,
    );
    let path = dir.path().join("exposed.toml");
    fs::write(&path, text).unwrap();

    let output = Command::new(scd_pipeline_bin())
        .arg("--config")
        .arg(&path)
        .arg("serve")
        .env_remove("SCD_PIPELINE_ALLOW_NON_LOOPBACK")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("non-loopback"));
}
