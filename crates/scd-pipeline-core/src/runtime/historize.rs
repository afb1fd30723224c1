// crates/scd-pipeline-core/src/runtime/historize.rs
// ============================================================================
// Module: Historization Engine
// Description: SCD Type-2 transition builder.
// Purpose: Turn a classified record into an open or close-and-open transition.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! [`apply`] never writes; it returns the [`Transition`] the store must apply
//! atomically. NEW opens a first version, UNCHANGED yields nothing, CHANGED
//! closes the current version at `as_of` and opens its successor from the
//! same instant with a null split label.
//!
//! ## Invariants
//! - A successor's effective-from equals the closed version's effective-to.
//! - The closed version keeps its split label; the successor starts unlabeled.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::BatchId;
use crate::core::ChangeKind;
use crate::core::DEFAULT_HASH_ALGORITHM;
use crate::core::HistorizedRecord;
use crate::core::NormalizedRecord;
use crate::core::StreamId;
use crate::core::Timestamp;
use crate::core::Transition;
use crate::core::VersionId;
use crate::core::hashing::derive_identifier;
use crate::core::hashing::hash_canonical_json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hex length of derived version identifiers.
const VERSION_ID_LENGTH: usize = 32;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Where a normalized record came from.
#[derive(Debug, Clone, Copy)]
pub struct Provenance<'a> {
    /// Stream the record belongs to.
    pub stream_id: &'a StreamId,
    /// Batch that landed the record.
    pub batch_id: &'a BatchId,
    /// Source offset of the record.
    pub source_offset: u64,
}

/// Historization errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistorizeError {
    /// Classification does not agree with the current version.
    #[error("historization mismatch for {natural_key}: {reason}")]
    Mismatch {
        /// Natural key of the entity.
        natural_key: String,
        /// Mismatch description.
        reason: String,
    },
    /// Identifier or fingerprint could not be computed.
    #[error("historization hashing failed: {0}")]
    Hashing(String),
}

// ============================================================================
// SECTION: Transition Builder
// ============================================================================

/// Builds the transition for a classified record.
///
/// # Errors
///
/// Returns [`HistorizeError::Mismatch`] when the classification is
/// inconsistent with `current` (CHANGED without a current row, a closed
/// current row, a key mismatch, or `as_of` earlier than the current version)
/// and [`HistorizeError::Hashing`] when hashing fails.
pub fn apply(
    record: &NormalizedRecord,
    provenance: Provenance<'_>,
    kind: ChangeKind,
    current: Option<&HistorizedRecord>,
    as_of: Timestamp,
) -> Result<Option<Transition>, HistorizeError> {
    let mismatch = |reason: &str| HistorizeError::Mismatch {
        natural_key: record.natural_key.to_string(),
        reason: reason.to_string(),
    };
    if let Some(current) = current {
        if current.natural_key != record.natural_key {
            return Err(mismatch("current version belongs to another natural key"));
        }
        if !current.is_open() {
            return Err(mismatch("current version is already closed"));
        }
    }
    match (kind, current) {
        (ChangeKind::New, None) => Ok(Some(Transition::Opened {
            opened: open_version(record, provenance, as_of)?,
        })),
        (ChangeKind::New, Some(_)) => Err(mismatch("classified new but a current version exists")),
        (ChangeKind::Unchanged, Some(_)) => Ok(None),
        (ChangeKind::Unchanged | ChangeKind::Changed, None) => {
            Err(mismatch("classified as existing but no current version exists"))
        }
        (ChangeKind::Changed, Some(current)) => {
            if as_of < current.effective_from {
                return Err(mismatch("change is older than the current version"));
            }
            let mut closed = current.clone();
            closed.effective_to = Some(as_of);
            closed.is_current = false;
            Ok(Some(Transition::Superseded {
                closed,
                opened: open_version(record, provenance, as_of)?,
            }))
        }
    }
}

/// Returns the SHA-256 fingerprint of the canonical tracked attributes.
///
/// # Errors
///
/// Returns [`HistorizeError::Hashing`] when canonicalization fails.
pub fn attributes_fingerprint(record: &NormalizedRecord) -> Result<String, HistorizeError> {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, &record.attributes)
        .map(|digest| digest.value)
        .map_err(|err| HistorizeError::Hashing(err.to_string()))
}

/// Builds a new open, current, unlabeled version.
fn open_version(
    record: &NormalizedRecord,
    provenance: Provenance<'_>,
    as_of: Timestamp,
) -> Result<HistorizedRecord, HistorizeError> {
    let version_id = derive_identifier(
        &(
            provenance.stream_id.as_str(),
            record.natural_key.as_str(),
            provenance.batch_id.as_str(),
            provenance.source_offset,
            as_of.as_unix_millis(),
        ),
        VERSION_ID_LENGTH,
    )
    .map_err(|err| HistorizeError::Hashing(err.to_string()))?;
    Ok(HistorizedRecord {
        version_id: VersionId::new(version_id),
        stream_id: provenance.stream_id.clone(),
        natural_key: record.natural_key.clone(),
        attributes: record.attributes.clone(),
        extras: record.extras.clone(),
        attributes_hash: attributes_fingerprint(record)?,
        effective_from: as_of,
        effective_to: None,
        is_current: true,
        split: None,
        batch_id: provenance.batch_id.clone(),
        source_offset: provenance.source_offset,
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test-only assertions.")]

    use super::*;
    use crate::core::FieldValue;
    use crate::core::NaturalKey;
    use crate::core::SplitLabel;

    fn record(severity: &str) -> NormalizedRecord {
        NormalizedRecord {
            natural_key: NaturalKey::new(r#"["K"]"#),
            attributes: [("severity".to_string(), FieldValue::Text(severity.to_string()))]
                .into_iter()
                .collect(),
            extras: None,
        }
    }

    fn provenance<'a>(stream: &'a StreamId, batch: &'a BatchId, offset: u64) -> Provenance<'a> {
        Provenance {
            stream_id: stream,
            batch_id: batch,
            source_offset: offset,
        }
    }

    #[test]
    fn changed_closes_current_at_successor_start() {
        let stream = StreamId::new("accidents");
        let batch = BatchId::new("b1");
        let t1 = Timestamp::from_unix_millis(1_000);
        let t2 = Timestamp::from_unix_millis(2_000);
        let first =
            apply(&record("minor"), provenance(&stream, &batch, 0), ChangeKind::New, None, t1)
                .unwrap()
                .unwrap();
        let mut current = first.opened().clone();
        current.split = Some(SplitLabel::Test);
        let second = apply(
            &record("severe"),
            provenance(&stream, &BatchId::new("b2"), 0),
            ChangeKind::Changed,
            Some(&current),
            t2,
        )
        .unwrap()
        .unwrap();
        let closed = second.closed().unwrap();
        assert_eq!(closed.effective_to, Some(t2));
        assert!(!closed.is_current);
        assert_eq!(closed.split, Some(SplitLabel::Test));
        assert_eq!(second.opened().effective_from, t2);
        assert_eq!(second.opened().split, None);
        assert_ne!(second.opened().version_id, current.version_id);
    }

    #[test]
    fn unchanged_yields_no_transition() {
        let stream = StreamId::new("s");
        let batch = BatchId::new("b");
        let opened = apply(
            &record("minor"),
            provenance(&stream, &batch, 0),
            ChangeKind::New,
            None,
            Timestamp::from_unix_millis(1),
        )
        .unwrap()
        .unwrap();
        let result = apply(
            &record("minor"),
            provenance(&stream, &batch, 0),
            ChangeKind::Unchanged,
            Some(opened.opened()),
            Timestamp::from_unix_millis(2),
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn changed_without_current_is_a_mismatch() {
        let stream = StreamId::new("s");
        let batch = BatchId::new("b");
        let err = apply(
            &record("minor"),
            provenance(&stream, &batch, 0),
            ChangeKind::Changed,
            None,
            Timestamp::from_unix_millis(1),
        )
        .unwrap_err();
        assert!(matches!(err, HistorizeError::Mismatch { .. }));
    }

    #[test]
    fn closed_current_row_is_a_mismatch() {
        let stream = StreamId::new("s");
        let batch = BatchId::new("b");
        let opened = apply(
            &record("minor"),
            provenance(&stream, &batch, 0),
            ChangeKind::New,
            None,
            Timestamp::from_unix_millis(1),
        )
        .unwrap()
        .unwrap();
        let mut stale = opened.opened().clone();
        stale.effective_to = Some(Timestamp::from_unix_millis(5));
        let err = apply(
            &record("severe"),
            provenance(&stream, &batch, 1),
            ChangeKind::Changed,
            Some(&stale),
            Timestamp::from_unix_millis(6),
        )
        .unwrap_err();
        assert!(matches!(err, HistorizeError::Mismatch { .. }));
    }
}
