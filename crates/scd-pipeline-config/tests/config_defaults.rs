//! Default and loading tests for scd-pipeline-config.
// crates/scd-pipeline-config/tests/config_defaults.rs
// =============================================================================
// Module: Config Default Tests
// Description: Validate defaults, loading limits, and core conversions.
// Purpose: Ensure a minimal config yields the documented pipeline behavior.
// =============================================================================

use std::io::Write;

use scd_pipeline_config::AuditSinkType;
use scd_pipeline_config::ConfigError;
use scd_pipeline_config::MAX_CONFIG_FILE_SIZE;
use scd_pipeline_config::ScdPipelineConfig;
use scd_pipeline_config::ServerAuthMode;
use scd_pipeline_config::StoreType;
use scd_pipeline_config::config_toml_example;

mod common;

use common::TestResult;

#[test]
fn minimal_config_applies_defaults() -> TestResult {
    let config = ScdPipelineConfig::from_toml_str(common::MINIMAL_TOML)
        .map_err(|err| err.to_string())?;
    if config.store.store_type != StoreType::Memory {
        return Err("store should default to memory".to_string());
    }
    if config.store.lease_ttl_ms != 300_000 || config.pipeline_settings().lease_ttl_ms != 300_000 {
        return Err("lease ttl should default to five minutes".to_string());
    }
    let ratios = config.splits.ratios();
    if (ratios.train, ratios.validation, ratios.test) != (0.6, 0.2, 0.2) || config.splits.seed != 42
    {
        return Err("split defaults should be 0.6/0.2/0.2 with seed 42".to_string());
    }
    let local_only = config.server.auth.mode == ServerAuthMode::LocalOnly;
    if config.server.bind != "127.0.0.1:8080" || !local_only {
        return Err("server should default to local-only loopback".to_string());
    }
    if config.audit.sink != AuditSinkType::Stderr {
        return Err("audit should default to stderr".to_string());
    }
    if config.store.sqlite_config().is_some() {
        return Err("memory store must not produce sqlite settings".to_string());
    }
    Ok(())
}

#[test]
fn stream_definitions_carry_schema_and_chunk_size() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.streams[0].default_chunk_size = Some(4_000);
    config.validate().map_err(|err| err.to_string())?;
    let definitions = config.stream_definitions();
    let [definition] = definitions.as_slice() else {
        return Err(format!("expected one definition, got {}", definitions.len()));
    };
    if definition.stream_id.as_str() != "accidents" || definition.default_chunk_size != Some(4_000)
    {
        return Err("definition should mirror the stream entry".to_string());
    }
    if definition.schema.natural_key != vec!["id".to_string()] {
        return Err("definition should carry the schema".to_string());
    }
    Ok(())
}

#[test]
fn example_config_is_valid() -> TestResult {
    let config =
        ScdPipelineConfig::from_toml_str(&config_toml_example()).map_err(|err| err.to_string())?;
    let sqlite = config.store.sqlite_config().ok_or("example should use sqlite")?;
    if sqlite.read_pool_size != 2 {
        return Err("example read pool should be 2".to_string());
    }
    if config.stream("us_accidents").is_none() {
        return Err("example should declare us_accidents".to_string());
    }
    Ok(())
}

#[test]
fn load_reads_explicit_path() -> TestResult {
    let mut file = tempfile::NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(common::MINIMAL_TOML.as_bytes()).map_err(|err| err.to_string())?;
    let config = ScdPipelineConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    if config.streams.len() != 1 {
        return Err("expected one stream".to_string());
    }
    Ok(())
}

#[test]
fn load_rejects_oversized_and_non_utf8_files() -> TestResult {
    let mut large = tempfile::NamedTempFile::new().map_err(|err| err.to_string())?;
    large.write_all(&vec![b'#'; MAX_CONFIG_FILE_SIZE + 1]).map_err(|err| err.to_string())?;
    common::assert_invalid(
        ScdPipelineConfig::load(Some(large.path())).map(|_| ()),
        "config file exceeds size limit",
    )?;

    let mut binary = tempfile::NamedTempFile::new().map_err(|err| err.to_string())?;
    binary.write_all(&[0xff, 0xfe, 0x00]).map_err(|err| err.to_string())?;
    common::assert_invalid(
        ScdPipelineConfig::load(Some(binary.path())).map(|_| ()),
        "config file must be utf-8",
    )
}

#[test]
fn missing_file_is_an_io_error() -> TestResult {
    let dir = tempfile::TempDir::new().map_err(|err| err.to_string())?;
    match ScdPipelineConfig::load(Some(&dir.path().join("absent.toml"))) {
        Err(ConfigError::Io(_)) => Ok(()),
        Err(other) => Err(format!("unexpected error: {other}")),
        Ok(_) => Err("expected io error".to_string()),
    }
}

#[test]
fn unknown_keys_fail_to_parse() -> TestResult {
    let toml = format!("{}\n[store]\nflavor = \"fast\"\n", common::MINIMAL_TOML);
    match ScdPipelineConfig::from_toml_str(&toml) {
        Err(ConfigError::Parse(_)) => Ok(()),
        Err(other) => Err(format!("unexpected error: {other}")),
        Ok(_) => Err("expected parse error".to_string()),
    }
}
