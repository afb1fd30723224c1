// crates/scd-pipeline-core/tests/memory_store.rs
// ============================================================================
// Module: In-Memory Store Tests
// Description: Guard and atomicity checks for the in-memory pipeline store.
// Purpose: Ensure failed commits leave the previous state untouched.
// ============================================================================

//! ## Overview
//! Exercises the close guard, the split overwrite guard, and lease handling
//! of [`InMemoryPipelineStore`], including commits from a writer whose lease
//! was taken over.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use scd_pipeline_core::BatchId;
use scd_pipeline_core::ChunkCommit;
use scd_pipeline_core::HistorizedRecord;
use scd_pipeline_core::InMemoryPipelineStore;
use scd_pipeline_core::IngestionCursor;
use scd_pipeline_core::Lease;
use scd_pipeline_core::NaturalKey;
use scd_pipeline_core::PipelineStore;
use scd_pipeline_core::SplitAssignment;
use scd_pipeline_core::SplitLabel;
use scd_pipeline_core::StoreError;
use scd_pipeline_core::StreamId;
use scd_pipeline_core::Timestamp;
use scd_pipeline_core::Transition;
use scd_pipeline_core::VersionId;

fn version(id: &str, key: &str, from: i64) -> HistorizedRecord {
    HistorizedRecord {
        version_id: VersionId::new(id),
        stream_id: StreamId::new("s"),
        natural_key: NaturalKey::new(key),
        attributes: std::collections::BTreeMap::new(),
        extras: None,
        attributes_hash: String::new(),
        effective_from: Timestamp::from_unix_millis(from),
        effective_to: None,
        is_current: true,
        split: None,
        batch_id: BatchId::new("b"),
        source_offset: 0,
    }
}

fn cursor(consumed: u64) -> IngestionCursor {
    let mut cursor = IngestionCursor::new(StreamId::new("s"));
    cursor.consumed = consumed;
    cursor.available = Some(consumed);
    cursor
}

fn writer(store: &InMemoryPipelineStore, stream: &StreamId) -> Lease {
    store.acquire_lease(stream, "writer", Timestamp::from_unix_millis(0), 60_000).unwrap()
}

#[test]
fn close_guard_mismatch_commits_nothing() {
    let store = InMemoryPipelineStore::new();
    let stream = StreamId::new("s");
    let lease = writer(&store, &stream);
    store
        .commit_chunk(&lease, &ChunkCommit {
            cursor: Some(cursor(1)),
            raw: Vec::new(),
            transitions: vec![Transition::Opened {
                opened: version("v1", "k1", 1),
            }],
        })
        .unwrap();

    let mut stale = version("missing", "k1", 1);
    stale.effective_to = Some(Timestamp::from_unix_millis(2));
    stale.is_current = false;
    let err = store
        .commit_chunk(&lease, &ChunkCommit {
            cursor: Some(cursor(2)),
            raw: Vec::new(),
            transitions: vec![
                Transition::Opened {
                    opened: version("v2", "k2", 2),
                },
                Transition::Superseded {
                    closed: stale,
                    opened: version("v3", "k1", 2),
                },
            ],
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(store.load_cursor(&stream).unwrap().unwrap().consumed, 1);
    assert!(store.history(&stream, &NaturalKey::new("k2")).unwrap().is_empty());
}

#[test]
fn opening_a_second_current_version_is_rejected() {
    let store = InMemoryPipelineStore::new();
    let stream = StreamId::new("s");
    let lease = writer(&store, &stream);
    let first = ChunkCommit {
        cursor: None,
        raw: Vec::new(),
        transitions: vec![Transition::Opened {
            opened: version("v1", "k1", 1),
        }],
    };
    store.commit_chunk(&lease, &first).unwrap();
    let second = ChunkCommit {
        cursor: None,
        raw: Vec::new(),
        transitions: vec![Transition::Opened {
            opened: version("v2", "k1", 2),
        }],
    };
    assert!(matches!(store.commit_chunk(&lease, &second), Err(StoreError::Conflict(_))));
}

#[test]
fn split_labels_are_never_overwritten() {
    let store = InMemoryPipelineStore::new();
    let stream = StreamId::new("s");
    let lease = writer(&store, &stream);
    store
        .commit_chunk(&lease, &ChunkCommit {
            cursor: None,
            raw: Vec::new(),
            transitions: vec![
                Transition::Opened {
                    opened: version("v1", "k1", 1),
                },
                Transition::Opened {
                    opened: version("v2", "k2", 1),
                },
            ],
        })
        .unwrap();
    let assign = |id: &str, key: &str, split| SplitAssignment {
        version_id: VersionId::new(id),
        natural_key: NaturalKey::new(key),
        split,
    };
    store.commit_splits(&lease, &[assign("v1", "k1", SplitLabel::Test)]).unwrap();

    let err = store
        .commit_splits(&lease, &[
            assign("v2", "k2", SplitLabel::Train),
            assign("v1", "k1", SplitLabel::Train),
        ])
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(store.eligible_for_split(&stream).unwrap().len(), 1);
    assert_eq!(store.records_by_split(&stream, SplitLabel::Test).unwrap().len(), 1);
}

#[test]
fn leases_block_until_expiry_and_release_only_for_their_owner() {
    let store = InMemoryPipelineStore::new();
    let stream = StreamId::new("s");
    let lease = store.acquire_lease(&stream, "a", Timestamp::from_unix_millis(0), 100).unwrap();
    let held =
        store.acquire_lease(&stream, "b", Timestamp::from_unix_millis(50), 100).unwrap_err();
    assert!(matches!(held, StoreError::LeaseHeld { ref holder, .. } if holder == "a"));

    let taken = store.acquire_lease(&stream, "b", Timestamp::from_unix_millis(100), 100).unwrap();
    store.release_lease(&lease).unwrap();
    assert!(store.acquire_lease(&stream, "c", Timestamp::from_unix_millis(150), 100).is_err());
    store.release_lease(&taken).unwrap();
    assert!(store.acquire_lease(&stream, "c", Timestamp::from_unix_millis(150), 100).is_ok());
}

#[test]
fn commit_from_a_taken_over_lease_writes_nothing() {
    let store = InMemoryPipelineStore::new();
    let stream = StreamId::new("s");
    let stale = store.acquire_lease(&stream, "a", Timestamp::from_unix_millis(0), 100).unwrap();
    let current = store.acquire_lease(&stream, "b", Timestamp::from_unix_millis(100), 100).unwrap();

    let commit = ChunkCommit {
        cursor: Some(cursor(1)),
        raw: Vec::new(),
        transitions: vec![Transition::Opened {
            opened: version("v1", "k1", 1),
        }],
    };
    let err = store.commit_chunk(&stale, &commit).unwrap_err();
    assert!(matches!(err, StoreError::Conflict(ref message) if message.contains("no longer held")));
    assert!(store.load_cursor(&stream).unwrap().is_none());
    assert!(store.history(&stream, &NaturalKey::new("k1")).unwrap().is_empty());

    store.commit_chunk(&current, &commit).unwrap();
    let assignment = SplitAssignment {
        version_id: VersionId::new("v1"),
        natural_key: NaturalKey::new("k1"),
        split: SplitLabel::Train,
    };
    let err = store.commit_splits(&stale, &[assignment]).unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(store.eligible_for_split(&stream).unwrap().len(), 1);
}

#[test]
fn released_lease_cannot_commit() {
    let store = InMemoryPipelineStore::new();
    let stream = StreamId::new("s");
    let lease = writer(&store, &stream);
    store.release_lease(&lease).unwrap();
    let err = store.commit_chunk(&lease, &ChunkCommit::default()).unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}
