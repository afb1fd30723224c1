// crates/scd-pipeline-core/src/core/records.rs
// ============================================================================
// Module: Pipeline Records
// Description: Raw landing rows, historized versions, and split labels.
// Purpose: Provide the persisted record shapes shared by stores and runtime.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! [`SourceRecord`] rows are landed append-only and never mutated.
//! [`HistorizedRecord`] rows are versions of one entity; a version is only
//! ever closed (effective-to set, current flag cleared), never deleted, and
//! its split label is written at most once.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::BatchId;
use crate::core::identifiers::NaturalKey;
use crate::core::identifiers::StreamId;
use crate::core::identifiers::VersionId;
use crate::core::schema::Attributes;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Split Labels
// ============================================================================

/// Evaluation partition assigned to a current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitLabel {
    /// Training partition.
    Train,
    /// Validation partition.
    Validation,
    /// Test partition.
    Test,
}

impl SplitLabel {
    /// All labels in allocation order.
    pub const ALL: [Self; 3] = [Self::Train, Self::Validation, Self::Test];

    /// Returns the stable label string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        }
    }

    /// Parses a label string.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "train" => Some(Self::Train),
            "validation" => Some(Self::Validation),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Raw Rows
// ============================================================================

/// One row read from a record source window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRow {
    /// Row decoded into a field map.
    Parsed {
        /// Zero-based position in the source.
        offset: u64,
        /// Raw field map.
        fields: Map<String, Value>,
    },
    /// Row that could not be decoded into a field map.
    Malformed {
        /// Zero-based position in the source.
        offset: u64,
        /// Decode failure reason.
        reason: String,
    },
}

impl RawRow {
    /// Returns the source offset of the row.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        match self {
            Self::Parsed {
                offset, ..
            }
            | Self::Malformed {
                offset, ..
            } => *offset,
        }
    }
}

/// Landed raw source record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Stream the record was read from.
    pub stream_id: StreamId,
    /// Ingestion batch that landed the record.
    pub batch_id: BatchId,
    /// Zero-based position in the source.
    pub source_offset: u64,
    /// Natural key derived from the key fields.
    pub natural_key: NaturalKey,
    /// Raw field map as read from the source.
    pub fields: Map<String, Value>,
    /// Ingestion timestamp.
    pub ingested_at: Timestamp,
}

// ============================================================================
// SECTION: Historized Versions
// ============================================================================

/// One version of one logical entity.
///
/// # Invariants
/// - At most one version per natural key is current with an open effective-to.
/// - A successor's effective-from equals its predecessor's effective-to.
/// - A non-null split label is never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorizedRecord {
    /// Surrogate version identifier.
    pub version_id: VersionId,
    /// Stream the entity belongs to.
    pub stream_id: StreamId,
    /// Natural key shared by every version of the entity.
    pub natural_key: NaturalKey,
    /// Normalized tracked attributes.
    pub attributes: Attributes,
    /// Opaque undeclared fields (pass-through policy only).
    pub extras: Option<Map<String, Value>>,
    /// SHA-256 fingerprint of the canonical tracked attributes.
    pub attributes_hash: String,
    /// Start of validity (inclusive).
    pub effective_from: Timestamp,
    /// End of validity (exclusive); `None` while open-ended.
    pub effective_to: Option<Timestamp>,
    /// Whether this is the entity's current version.
    pub is_current: bool,
    /// Evaluation partition, null until assigned.
    pub split: Option<SplitLabel>,
    /// Batch that produced the version.
    pub batch_id: BatchId,
    /// Source offset that produced the version.
    pub source_offset: u64,
}

impl HistorizedRecord {
    /// Returns true when the version is current and open-ended.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.is_current && self.effective_to.is_none()
    }

    /// Returns true when the version was valid at `at`.
    #[must_use]
    pub fn covers(&self, at: Timestamp) -> bool {
        self.effective_from <= at && self.effective_to.is_none_or(|end| at < end)
    }
}

// ============================================================================
// SECTION: Validation Issues
// ============================================================================

/// Per-record validation failure collected into a chunk report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Source offset of the offending row.
    pub offset: u64,
    /// Natural key when it could be derived.
    pub natural_key: Option<NaturalKey>,
    /// Offending field when the failure is field-scoped.
    pub field: Option<String>,
    /// Failure reason.
    pub reason: String,
}
