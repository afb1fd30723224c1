// crates/scd-pipeline-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared helpers for config validation tests.
// Purpose: Reduce duplication across integration tests for scd-pipeline-config.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use scd_pipeline_config::ConfigError;
use scd_pipeline_config::ScdPipelineConfig;

/// Smallest valid configuration: one stream, everything else defaulted.
pub const MINIMAL_TOML: &str = r#"
[[streams]]
id = "accidents"

[streams.source]
path = "accidents.jsonl"

[streams.schema]
natural_key = ["id"]
fields = [
    { name = "id", kind = "text", required = true },
    { name = "severity", kind = "integer" },
    { name = "state", kind = "text" },
]
"#;

/// Result type used by config tests.
pub type TestResult = Result<(), String>;

/// Parses a TOML string into a `ScdPipelineConfig` without validating it.
pub fn config_from_toml(toml_str: &str) -> Result<ScdPipelineConfig, toml::de::Error> {
    toml::from_str(toml_str)
}

/// Returns the minimal config with all defaults applied.
pub fn minimal_config() -> Result<ScdPipelineConfig, toml::de::Error> {
    config_from_toml(MINIMAL_TOML)
}

/// Asserts that validation failed with a message containing `needle`.
pub fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}
