// crates/scd-pipeline-core/tests/proptest_invariants.rs
// ============================================================================
// Module: Pipeline Property-Based Tests
// Description: Property tests for split allocation and cursor planning.
// Purpose: Check balance, reproducibility, permanence, and monotonicity.
// ============================================================================

//! Property-based tests for split and cursor invariants.

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
    clippy::cast_precision_loss,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use scd_pipeline_core::InMemoryPipelineStore;
use scd_pipeline_core::IngestRequest;
use scd_pipeline_core::IngestionCursor;
use scd_pipeline_core::IngestionMode;
use scd_pipeline_core::NaturalKey;
use scd_pipeline_core::NoopAuditSink;
use scd_pipeline_core::Pipeline;
use scd_pipeline_core::PipelineSettings;
use scd_pipeline_core::RecordSchema;
use scd_pipeline_core::SplitCandidate;
use scd_pipeline_core::SplitLabel;
use scd_pipeline_core::SplitRatios;
use scd_pipeline_core::SplitRequest;
use scd_pipeline_core::StreamDefinition;
use scd_pipeline_core::StreamId;
use scd_pipeline_core::Timestamp;
use scd_pipeline_core::VecRecordSource;
use scd_pipeline_core::VersionId;
use scd_pipeline_core::core::split::allocate_counts;
use scd_pipeline_core::core::split::plan_splits;
use scd_pipeline_core::plan_window;
use serde_json::json;

fn ratios_strategy() -> impl Strategy<Value = SplitRatios> {
    (0_u32 .. 100, 0_u32 .. 100).prop_map(|(first, second)| {
        let train = f64::from(first.min(100)) / 100.0;
        let validation = f64::from(second.min(100 - first.min(100))) / 100.0;
        SplitRatios::new(train, validation, 1.0 - train - validation)
    })
}

fn candidates(count: usize, strata: usize) -> Vec<SplitCandidate> {
    (0 .. count)
        .map(|index| SplitCandidate {
            version_id: VersionId::new(format!("v{index}")),
            natural_key: NaturalKey::new(format!("[\"{index:05}\"]")),
            stratum: format!("\"s{}\"", index % strata.max(1)),
        })
        .collect()
}

fn pipeline(count: usize) -> Pipeline<InMemoryPipelineStore> {
    let schema: RecordSchema = serde_json::from_value(json!({
        "natural_key": ["id"],
        "fields": [
            {"name": "id", "kind": "integer", "required": true},
            {"name": "state", "kind": "text"}
        ]
    }))
    .unwrap();
    let rows = (0 .. count).map(|index| json!({"id": index, "state": index % 3})).collect();
    Pipeline::new(
        InMemoryPipelineStore::new(),
        vec![StreamDefinition {
            stream_id: StreamId::new("s"),
            schema,
            source: Arc::new(VecRecordSource::new(rows)),
            default_chunk_size: None,
        }],
        Arc::new(NoopAuditSink),
        PipelineSettings::default(),
    )
    .unwrap()
}

fn labels(pipeline: &Pipeline<InMemoryPipelineStore>) -> BTreeMap<NaturalKey, SplitLabel> {
    SplitLabel::ALL
        .iter()
        .flat_map(|label| pipeline.records_by_split(&StreamId::new("s"), *label).unwrap())
        .map(|version| (version.natural_key, version.split.unwrap()))
        .collect()
}

proptest! {
    #[test]
    fn allocation_is_within_one_of_each_quota(members in 0_usize .. 2_000, ratios in ratios_strategy()) {
        let counts = allocate_counts(members, &ratios);
        prop_assert_eq!(counts.iter().sum::<usize>(), members);
        for (count, ratio) in counts.iter().zip([ratios.train, ratios.validation, ratios.test]) {
            let quota = members as f64 * ratio;
            prop_assert!((*count as f64 - quota).abs() < 1.0 + 1e-6);
        }
    }

    #[test]
    fn planning_ignores_candidate_order(
        count in 1_usize .. 300,
        strata in 1_usize .. 5,
        seed in any::<u64>(),
        rotate in 0_usize .. 300,
    ) {
        let ratios = SplitRatios::new(0.6, 0.2, 0.2);
        let ordered = candidates(count, strata);
        let mut rotated = ordered.clone();
        rotated.rotate_left(rotate % count);
        let mut first = plan_splits(ordered, &ratios, seed).unwrap().assignments;
        let mut second = plan_splits(rotated, &ratios, seed).unwrap().assignments;
        first.sort_by(|left, right| left.version_id.cmp(&right.version_id));
        second.sort_by(|left, right| left.version_id.cmp(&right.version_id));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn chunked_cursor_is_monotonic_and_bounded(
        steps in prop::collection::vec((1_u64 .. 50, 0_u64 .. 20), 1 .. 20),
    ) {
        let mut cursor = IngestionCursor::new(StreamId::new("s"));
        let mut total = 0_u64;
        for (index, (chunk, growth)) in (0_i64 ..).zip(steps) {
            total += growth;
            let plan = plan_window(
                &cursor,
                total,
                IngestionMode::Chunked,
                Some(chunk),
                Timestamp::from_unix_millis(index),
            )
            .unwrap();
            prop_assert!(plan.cursor.consumed >= cursor.consumed);
            prop_assert!(plan.cursor.consumed <= total);
            prop_assert_eq!(plan.window.offset, cursor.consumed);
            cursor = plan.cursor;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn labels_survive_later_runs(first_chunk in 1_u64 .. 120, seed in any::<u64>(), later_seed in any::<u64>()) {
        let pipeline = pipeline(120);
        let stream_id = StreamId::new("s");
        let request = |chunk: u64, at: i64| IngestRequest {
            stream_id: stream_id.clone(),
            mode: IngestionMode::Chunked,
            chunk_size: Some(chunk),
            as_of: Timestamp::from_unix_millis(at),
            holder: "prop".to_string(),
        };
        let split = |seed: u64, at: i64| SplitRequest {
            stream_id: stream_id.clone(),
            ratios: SplitRatios::new(0.6, 0.2, 0.2),
            seed,
            stratify_by: Some("state".to_string()),
            as_of: Timestamp::from_unix_millis(at),
            holder: "prop".to_string(),
        };
        pipeline.ingest_chunk(&request(first_chunk, 1)).unwrap();
        pipeline.assign_splits(&split(seed, 2)).unwrap();
        let before = labels(&pipeline);
        pipeline.ingest_chunk(&request(120, 3)).unwrap();
        pipeline.assign_splits(&split(later_seed, 4)).unwrap();
        let after = labels(&pipeline);
        prop_assert_eq!(after.len(), 120);
        for (key, label) in before {
            prop_assert_eq!(after.get(&key), Some(&label));
        }
    }

    #[test]
    fn fresh_copies_with_the_same_seed_agree(seed in any::<u64>()) {
        let run = || {
            let pipeline = pipeline(90);
            pipeline
                .ingest_chunk(&IngestRequest {
                    stream_id: StreamId::new("s"),
                    mode: IngestionMode::Full,
                    chunk_size: None,
                    as_of: Timestamp::from_unix_millis(1),
                    holder: "prop".to_string(),
                })
                .unwrap();
            pipeline
                .assign_splits(&SplitRequest {
                    stream_id: StreamId::new("s"),
                    ratios: SplitRatios::new(0.7, 0.15, 0.15),
                    seed,
                    stratify_by: Some("state".to_string()),
                    as_of: Timestamp::from_unix_millis(2),
                    holder: "prop".to_string(),
                })
                .unwrap();
            labels(&pipeline)
        };
        prop_assert_eq!(run(), run());
    }
}
