//! Validation tests for scd-pipeline-config.
// crates/scd-pipeline-config/tests/validation.rs
// =============================================================================
// Module: Config Validation Tests
// Description: Validate store, stream, split, server, and audit constraints.
// Purpose: Ensure invalid configuration fails closed before any run starts.
// =============================================================================

use std::path::PathBuf;

use scd_pipeline_config::AuditSinkType;
use scd_pipeline_config::MAX_API_KEYS;
use scd_pipeline_config::ServerAuthMode;
use scd_pipeline_config::StoreType;

mod common;

use common::TestResult;
use common::assert_invalid;

fn minimal() -> Result<scd_pipeline_config::ScdPipelineConfig, String> {
    common::minimal_config().map_err(|err| err.to_string())
}

#[test]
fn memory_store_rejects_path() -> TestResult {
    let mut config = minimal()?;
    config.store.path = Some(PathBuf::from("pipeline.db"));
    assert_invalid(config.validate(), "memory store must not set path")
}

#[test]
fn sqlite_store_requires_path() -> TestResult {
    let mut config = minimal()?;
    config.store.store_type = StoreType::Sqlite;
    assert_invalid(config.validate(), "sqlite store requires path")
}

#[test]
fn sqlite_store_bounds_read_pool() -> TestResult {
    let mut config = minimal()?;
    config.store.store_type = StoreType::Sqlite;
    config.store.path = Some(PathBuf::from("pipeline.db"));
    config.store.read_pool_size = 0;
    assert_invalid(config.validate(), "read_pool_size must be between 1 and 16")?;
    config.store.read_pool_size = 17;
    assert_invalid(config.validate(), "read_pool_size must be between 1 and 16")
}

#[test]
fn zero_lease_ttl_is_rejected() -> TestResult {
    let mut config = minimal()?;
    config.store.lease_ttl_ms = 0;
    assert_invalid(config.validate(), "lease_ttl_ms must be greater than zero")
}

#[test]
fn streams_are_required_and_unique() -> TestResult {
    let mut config = minimal()?;
    let stream = config.streams[0].clone();
    config.streams.push(stream);
    assert_invalid(config.validate(), "duplicate stream id: accidents")?;
    config.streams.clear();
    assert_invalid(config.validate(), "at least one stream must be configured")
}

#[test]
fn stream_entries_are_checked() -> TestResult {
    let mut config = minimal()?;
    config.streams[0].default_chunk_size = Some(0);
    assert_invalid(config.validate(), "default_chunk_size must be greater than zero")?;

    let mut config = minimal()?;
    config.streams[0].id = "bad/id".to_string();
    assert_invalid(config.validate(), "may only contain")?;

    let mut config = minimal()?;
    config.streams[0].source.path = " ".to_string();
    assert_invalid(config.validate(), "streams.accidents.source.path must be non-empty")?;

    let mut config = minimal()?;
    config.streams[0].schema.natural_key = vec!["state".to_string()];
    assert_invalid(config.validate(), "natural_key field must be required: state")
}

#[test]
fn split_ratios_must_sum_to_one() -> TestResult {
    let mut config = minimal()?;
    config.splits.train = 0.7;
    assert_invalid(config.validate(), "ratios must sum to 1.0")?;
    config.splits.train = f64::NAN;
    assert_invalid(config.validate(), "must be finite")
}

#[test]
fn stratify_by_must_be_declared() -> TestResult {
    let mut config = minimal()?;
    config.splits.stratify_by = Some("state".to_string());
    config.validate().map_err(|err| err.to_string())?;
    config.splits.stratify_by = Some("county".to_string());
    assert_invalid(config.validate(), "field county is not declared by stream accidents")
}

#[test]
fn non_loopback_bind_requires_api_keys() -> TestResult {
    let mut config = minimal()?;
    config.server.bind = "0.0.0.0:8080".to_string();
    assert_invalid(config.validate(), "non-loopback bind disallowed")?;
    config.server.auth.mode = ServerAuthMode::ApiKey;
    assert_invalid(config.validate(), "api_key auth requires at least one key")?;
    config.server.auth.api_keys = vec!["0123456789abcdef0123".to_string()];
    config.validate().map_err(|err| err.to_string())
}

#[test]
fn api_keys_are_bounded() -> TestResult {
    let mut config = minimal()?;
    config.server.auth.mode = ServerAuthMode::ApiKey;
    config.server.auth.api_keys = vec!["short".to_string()];
    assert_invalid(config.validate(), "api keys must be at least 16 characters")?;
    config.server.auth.api_keys = vec!["k".repeat(32); MAX_API_KEYS + 1];
    assert_invalid(config.validate(), "too many api keys")?;
    config.server.auth.mode = ServerAuthMode::LocalOnly;
    config.server.auth.api_keys = vec!["k".repeat(32)];
    assert_invalid(config.validate(), "local_only auth must not configure api keys")
}

#[test]
fn bind_and_body_limits_are_checked() -> TestResult {
    let mut config = minimal()?;
    config.server.bind = "localhost".to_string();
    assert_invalid(config.validate(), "invalid bind address")?;
    let mut config = minimal()?;
    config.server.max_body_bytes = 0;
    assert_invalid(config.validate(), "max_body_bytes must be greater than zero")
}

#[test]
fn audit_path_matches_sink() -> TestResult {
    let mut config = minimal()?;
    config.audit.sink = AuditSinkType::File;
    assert_invalid(config.validate(), "file audit sink requires path")?;
    config.audit.path = Some("audit.jsonl".to_string());
    config.validate().map_err(|err| err.to_string())?;
    config.audit.sink = AuditSinkType::None;
    assert_invalid(config.validate(), "audit.path is only valid for the file sink")
}
