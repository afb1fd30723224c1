// crates/scd-pipeline-core/src/runtime/change.rs
// ============================================================================
// Module: Change Detector
// Description: Classifies normalized records against the current version.
// Purpose: Decide NEW / UNCHANGED / CHANGED from tracked attributes only.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Classification compares tracked schema attributes after normalization.
//! A missing attribute and an explicit null are the same value. Bookkeeping
//! columns (version id, validity, split label, provenance, extras) never
//! participate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::Attributes;
use crate::core::ChangeKind;
use crate::core::FieldValue;
use crate::core::HistorizedRecord;
use crate::core::NormalizedRecord;

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Classifies a normalized record against the entity's current version.
#[must_use]
pub fn classify(record: &NormalizedRecord, current: Option<&HistorizedRecord>) -> ChangeKind {
    match current {
        None => ChangeKind::New,
        Some(current) if attributes_match(&record.attributes, &current.attributes) => {
            ChangeKind::Unchanged
        }
        Some(_) => ChangeKind::Changed,
    }
}

/// Returns true when two attribute maps are equal, treating absent as null.
#[must_use]
pub fn attributes_match(left: &Attributes, right: &Attributes) -> bool {
    left.keys()
        .chain(right.keys())
        .all(|name| values_match(left.get(name), right.get(name)))
}

/// Compares two optional attribute values.
fn values_match(left: Option<&FieldValue>, right: Option<&FieldValue>) -> bool {
    let null = FieldValue::Null;
    left.unwrap_or(&null) == right.unwrap_or(&null)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn attributes(entries: &[(&str, FieldValue)]) -> Attributes {
        entries.iter().map(|(name, value)| ((*name).to_string(), value.clone())).collect()
    }

    #[test]
    fn missing_attribute_equals_null() {
        let left = attributes(&[("severity", FieldValue::Null)]);
        let right = attributes(&[]);
        assert!(attributes_match(&left, &right));
        assert!(attributes_match(&right, &left));
    }

    #[test]
    fn case_is_significant() {
        let left = attributes(&[("severity", FieldValue::Text("Minor".to_string()))]);
        let right = attributes(&[("severity", FieldValue::Text("minor".to_string()))]);
        assert!(!attributes_match(&left, &right));
    }

    #[test]
    fn zero_signs_compare_equal() {
        let left = attributes(&[("lat", FieldValue::Float(0.0))]);
        let right = attributes(&[("lat", FieldValue::Float(-0.0))]);
        assert!(attributes_match(&left, &right));
    }
}
