// crates/scd-pipeline-server/tests/http_server.rs
// ============================================================================
// Module: HTTP Server Integration Tests
// Description: Serves a SQLite-backed pipeline over a real loopback socket.
// Purpose: Validate config wiring, routing, and API key auth end to end.
// ============================================================================

//! ## Overview
//! Builds a durable pipeline from TOML, commits a chunk and split labels,
//! then serves it with [`PipelineServer`] and issues raw HTTP/1.1 requests.

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
    reason = "Test-only assertions and helpers are permitted."
)]

use std::fmt::Write as _;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use scd_pipeline_config::ScdPipelineConfig;
use scd_pipeline_core::IngestRequest;
use scd_pipeline_core::IngestionMode;
use scd_pipeline_core::ProgressReport;
use scd_pipeline_core::SplitLabel;
use scd_pipeline_core::SplitRequest;
use scd_pipeline_core::StreamId;
use scd_pipeline_core::Timestamp;
use scd_pipeline_server::PipelineServer;
use scd_pipeline_server::RecordsResponse;
use scd_pipeline_server::build_pipeline;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;

const KEY: &str = "integration-key-0123456789";

fn write_config(dir: &Path) -> ScdPipelineConfig {
    let mut data = String::new();
    for index in 0 .. 8 {
        let state = if index % 2 == 0 { "CA" } else { "TX" };
        writeln!(data, r#"{{"id": "{index:03}", "severity": {}, "state": "{state}"}}"#, index % 4)
            .unwrap();
    }
    let source = dir.join("accidents.jsonl");
    fs::write(&source, data).unwrap();
    let toml = format!(
        r#"
[store]
type = "sqlite"
path = "{db}"

[[streams]]
id = "accidents"

[streams.source]
path = "{source}"

[streams.schema]
natural_key = ["id"]
fields = [
    {{ name = "id", kind = "text", required = true }},
    {{ name = "severity", kind = "integer" }},
    {{ name = "state", kind = "text" }},
]

[splits]
stratify_by = "state"

[server]
bind = "127.0.0.1:0"

[server.auth]
mode = "api_key"
api_keys = ["{KEY}"]

[audit]
sink = "none"
"#,
        db = dir.join("pipeline.db").display(),
        source = source.display(),
    );
    let path = dir.join("scd-pipeline.toml");
    fs::write(&path, toml).unwrap();
    ScdPipelineConfig::load(Some(&path)).unwrap()
}

fn seed(config: &ScdPipelineConfig) {
    let pipeline = build_pipeline(config).unwrap();
    pipeline
        .ingest_chunk(&IngestRequest {
            stream_id: StreamId::new("accidents"),
            mode: IngestionMode::Chunked,
            chunk_size: Some(6),
            as_of: Timestamp::from_unix_millis(1_000),
            holder: "seed".to_string(),
        })
        .unwrap();
    pipeline
        .assign_splits(&SplitRequest {
            stream_id: StreamId::new("accidents"),
            ratios: config.splits.ratios(),
            seed: config.splits.seed,
            stratify_by: config.splits.stratify_by.clone(),
            as_of: Timestamp::from_unix_millis(2_000),
            holder: "seed".to_string(),
        })
        .unwrap();
}

async fn get(addr: SocketAddr, path: &str, key: Option<&str>) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    if let Some(key) = key {
        write!(request, "x-api-key: {key}\r\n").unwrap();
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();
    let status = text.split(' ').nth(1).unwrap().parse().unwrap();
    let body = text.split_once("\r\n\r\n").map(|(_, body)| body.to_string()).unwrap_or_default();
    (status, body)
}

#[tokio::test(flavor = "multi_thread")]
async fn sqlite_pipeline_is_served_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    seed(&config);

    let server = PipelineServer::from_config(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(server.serve_on(listener));

    let (status, _) = get(addr, "/v1/streams/accidents/progress", None).await;
    assert_eq!(status, 401);

    let (status, body) = get(addr, "/v1/streams/accidents/progress", Some(KEY)).await;
    assert_eq!(status, 200);
    let progress: ProgressReport = serde_json::from_str(&body).unwrap();
    assert_eq!(progress.consumed, 6);
    assert_eq!(progress.available, Some(8));

    let mut labeled = 0;
    for label in SplitLabel::ALL {
        let path = format!("/v1/streams/accidents/records?split={}", label.as_str());
        let (status, body) = get(addr, &path, Some(KEY)).await;
        assert_eq!(status, 200);
        let records: RecordsResponse = serde_json::from_str(&body).unwrap();
        assert!(records.records.iter().all(|record| record.split == Some(label)));
        labeled += records.count;
    }
    assert_eq!(labeled, 6);

    let (status, _) = get(addr, "/v1/streams/weather/progress", Some(KEY)).await;
    assert_eq!(status, 404);

    handle.abort();
}

#[test]
fn invalid_server_config_is_rejected_before_binding() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_config(dir.path());
    config.server.bind = "0.0.0.0:8080".to_string();
    config.server.auth.api_keys.clear();
    assert!(PipelineServer::from_config(config).is_err());
}
