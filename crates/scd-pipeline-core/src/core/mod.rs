// crates/scd-pipeline-core/src/core/mod.rs
// ============================================================================
// Module: Pipeline Core Types
// Description: Canonical record, cursor, schema, and split structures.
// Purpose: Provide stable, serializable types shared by stores and hosts.
// Dependencies: serde, serde_json, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Core types define stream schemas, landed and historized records, cursor
//! state, version transitions, and split plans. They are the canonical source
//! of truth for every derived surface (SQLite rows, HTTP payloads, CLI output).

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod cursor;
pub mod hashing;
pub mod identifiers;
pub mod records;
pub mod schema;
pub mod split;
pub mod time;
pub mod versioning;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cursor::ConsumptionWindow;
pub use cursor::CursorError;
pub use cursor::IngestionCursor;
pub use cursor::IngestionMode;
pub use cursor::ProgressReport;
pub use cursor::WindowPlan;
pub use cursor::plan_window;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use identifiers::BatchId;
pub use identifiers::NaturalKey;
pub use identifiers::StreamId;
pub use identifiers::VersionId;
pub use records::HistorizedRecord;
pub use records::RawRow;
pub use records::SourceRecord;
pub use records::SplitLabel;
pub use records::ValidationIssue;
pub use schema::Attributes;
pub use schema::FieldKind;
pub use schema::FieldSpec;
pub use schema::FieldValue;
pub use schema::NormalizedRecord;
pub use schema::RecordSchema;
pub use schema::SchemaError;
pub use schema::UnknownFieldPolicy;
pub use split::SplitAssignment;
pub use split::SplitCandidate;
pub use split::SplitError;
pub use split::SplitPlan;
pub use split::SplitRatios;
pub use split::StratumSummary;
pub use time::Timestamp;
pub use versioning::ChangeKind;
pub use versioning::Transition;
