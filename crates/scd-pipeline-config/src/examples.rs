// crates/scd-pipeline-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payloads.
// Purpose: Deterministic examples for docs and tooling.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example `scd-pipeline.toml`. The output is deterministic and is
//! validated by the crate's tests, so it always parses.

/// Returns a canonical example `scd-pipeline.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[store]
type = "sqlite"
path = "scd-pipeline.db"
journal_mode = "wal"
sync_mode = "full"
busy_timeout_ms = 5000
read_pool_size = 2
lease_ttl_ms = 300000

[[streams]]
id = "us_accidents"
default_chunk_size = 4000

[streams.source]
path = "data/us_accidents.jsonl"

[streams.schema]
version = 1
natural_key = ["ID"]
unknown_fields = "reject"
fields = [
    { name = "ID", kind = "text", required = true },
    { name = "Severity", kind = "integer" },
    { name = "State", kind = "text" },
    { name = "Start_Time", kind = "text" },
    { name = "Distance(mi)", kind = "float" },
    { name = "Traffic_Signal", kind = "boolean" },
]

[splits]
train = 0.6
validation = 0.2
test = 0.2
seed = 42
stratify_by = "State"

[server]
bind = "127.0.0.1:8080"
max_body_bytes = 1048576

[server.auth]
mode = "local_only"

[audit]
sink = "stderr"
"#,
    )
}
