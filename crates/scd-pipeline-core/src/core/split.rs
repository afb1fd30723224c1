// crates/scd-pipeline-core/src/core/split.rs
// ============================================================================
// Module: Split Planning
// Description: Deterministic stratified train/validation/test allocation.
// Purpose: Plan permanent split labels for current, unassigned versions.
// Dependencies: serde, thiserror, crate::core::hashing
// ============================================================================

//! ## Overview
//! Split planning is a pure function of the seed, the eligible natural keys,
//! and their stratum values. Within each stratum members are ordered by
//! `sha256(seed, natural_key)` (ties by natural key), per-partition counts
//! come from the largest-remainder method (ties broken train, validation,
//! test), and the ordered members are handed out in that order.
//!
//! A stratum with fewer members than requested non-zero partitions cannot
//! place one member in each and is assigned entirely to train.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::canonical_json_string;
use crate::core::hashing::derive_identifier;
use crate::core::identifiers::NaturalKey;
use crate::core::identifiers::VersionId;
use crate::core::records::SplitLabel;
use crate::core::schema::FieldValue;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Allowed deviation of the ratio sum from 1.0.
pub const RATIO_TOLERANCE: f64 = 1e-6;
/// Fixed-point scale used to allocate counts with integer arithmetic.
const RATIO_SCALE: f64 = 1_000_000_000.0;
/// Hex length of the ordering digest (full SHA-256).
const ORDER_KEY_LENGTH: usize = 64;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Target partition ratios.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    /// Training ratio.
    pub train: f64,
    /// Validation ratio.
    pub validation: f64,
    /// Test ratio.
    pub test: f64,
}

impl SplitRatios {
    /// Creates a ratio triple.
    #[must_use]
    pub const fn new(train: f64, validation: f64, test: f64) -> Self {
        Self {
            train,
            validation,
            test,
        }
    }

    /// Validates that ratios are finite, within `[0, 1]`, and sum to 1.0.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::InvalidRatios`] when any check fails.
    pub fn validate(&self) -> Result<(), SplitError> {
        for (label, ratio) in SplitLabel::ALL.iter().zip(self.as_array()) {
            if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
                return Err(SplitError::InvalidRatios(format!(
                    "{} ratio must be finite and within [0, 1], got {ratio}",
                    label.as_str()
                )));
            }
        }
        let sum: f64 = self.as_array().iter().sum();
        if (sum - 1.0).abs() > RATIO_TOLERANCE {
            return Err(SplitError::InvalidRatios(format!("ratios must sum to 1.0, got {sum}")));
        }
        Ok(())
    }

    /// Returns the number of partitions with a non-zero ratio.
    #[must_use]
    pub fn requested_partitions(&self) -> usize {
        self.as_array().iter().filter(|ratio| **ratio > 0.0).count()
    }

    /// Returns the ratios in allocation order.
    const fn as_array(&self) -> [f64; 3] {
        [self.train, self.validation, self.test]
    }
}

/// Eligible current version offered to the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitCandidate {
    /// Version to label.
    pub version_id: VersionId,
    /// Natural key of the entity.
    pub natural_key: NaturalKey,
    /// Canonical stratum label (see [`stratum_label`]).
    pub stratum: String,
}

/// Planned label for one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitAssignment {
    /// Version to label.
    pub version_id: VersionId,
    /// Natural key of the entity.
    pub natural_key: NaturalKey,
    /// Assigned partition.
    pub split: SplitLabel,
}

/// Realized counts for one stratum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumSummary {
    /// Canonical stratum label.
    pub stratum: String,
    /// Eligible members in the stratum.
    pub members: usize,
    /// Members labeled train.
    pub train: usize,
    /// Members labeled validation.
    pub validation: usize,
    /// Members labeled test.
    pub test: usize,
    /// Whether the stratum was too small and defaulted to train.
    pub fallback: bool,
}

/// Output of split planning.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitPlan {
    /// Planned labels, grouped by stratum in stratum order.
    pub assignments: Vec<SplitAssignment>,
    /// Per-stratum realized counts.
    pub strata: Vec<StratumSummary>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Split planning errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    /// Ratios failed validation.
    #[error("invalid split ratios: {0}")]
    InvalidRatios(String),
    /// Ordering or stratum key could not be hashed.
    #[error("split key hashing failed: {0}")]
    Hashing(String),
}

// ============================================================================
// SECTION: Planning
// ============================================================================

/// Returns the canonical stratum label for a stratification value.
///
/// Null values form their own stratum.
///
/// # Errors
///
/// Returns [`SplitError::Hashing`] when canonicalization fails.
pub fn stratum_label(value: &FieldValue) -> Result<String, SplitError> {
    canonical_json_string(value).map_err(|err| SplitError::Hashing(err.to_string()))
}

/// Allocates `members` across train/validation/test by largest remainder.
///
/// Counts always sum to `members`.
#[must_use]
pub fn allocate_counts(members: usize, ratios: &SplitRatios) -> [usize; 3] {
    let units = ratios.as_array().map(scale_ratio);
    let total_units: u128 = units.iter().sum();
    if total_units == 0 {
        return [members, 0, 0];
    }
    let members_wide = members as u128;
    let mut counts = [0_usize; 3];
    let mut remainders = [0_u128; 3];
    let mut assigned = 0_usize;
    for (index, unit) in units.iter().enumerate() {
        let product = members_wide * unit;
        let floor = usize::try_from(product / total_units).unwrap_or(members);
        counts[index] = floor;
        remainders[index] = product % total_units;
        assigned += floor;
    }
    let mut order = [0_usize, 1, 2];
    order.sort_by(|left, right| remainders[*right].cmp(&remainders[*left]).then(left.cmp(right)));
    for index in order.into_iter().take(members.saturating_sub(assigned)) {
        counts[index] += 1;
    }
    counts
}

/// Plans split labels for the eligible candidates.
///
/// # Errors
///
/// Returns [`SplitError`] when ratios are invalid or ordering keys cannot be
/// computed.
pub fn plan_splits(
    candidates: Vec<SplitCandidate>,
    ratios: &SplitRatios,
    seed: u64,
) -> Result<SplitPlan, SplitError> {
    ratios.validate()?;
    let seed_label = seed.to_string();
    let mut strata: BTreeMap<String, Vec<(String, SplitCandidate)>> = BTreeMap::new();
    for candidate in candidates {
        let order_key = derive_identifier(
            &(seed_label.as_str(), candidate.natural_key.as_str()),
            ORDER_KEY_LENGTH,
        )
        .map_err(|err| SplitError::Hashing(err.to_string()))?;
        strata.entry(candidate.stratum.clone()).or_default().push((order_key, candidate));
    }
    let requested = ratios.requested_partitions();
    let mut plan = SplitPlan::default();
    for (stratum, mut members) in strata {
        members.sort_by(|left, right| {
            left.0.cmp(&right.0).then_with(|| left.1.natural_key.cmp(&right.1.natural_key))
        });
        let fallback = members.len() < requested;
        let counts = if fallback {
            [members.len(), 0, 0]
        } else {
            allocate_counts(members.len(), ratios)
        };
        let mut labels = SplitLabel::ALL
            .iter()
            .zip(counts)
            .flat_map(|(label, count)| std::iter::repeat_n(*label, count));
        for (_, candidate) in &members {
            let split = labels.next().unwrap_or(SplitLabel::Train);
            plan.assignments.push(SplitAssignment {
                version_id: candidate.version_id.clone(),
                natural_key: candidate.natural_key.clone(),
                split,
            });
        }
        plan.strata.push(StratumSummary {
            stratum,
            members: members.len(),
            train: counts[0],
            validation: counts[1],
            test: counts[2],
            fallback,
        });
    }
    Ok(plan)
}

/// Converts a validated ratio into fixed-point units.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Ratios are validated finite values within [0, 1]."
)]
fn scale_ratio(ratio: f64) -> u128 {
    (ratio.clamp(0.0, 1.0) * RATIO_SCALE).round() as u128
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test-only assertions.")]

    use super::*;

    #[test]
    fn largest_remainder_matches_exact_quotas() {
        assert_eq!(allocate_counts(500, &SplitRatios::new(0.6, 0.2, 0.2)), [300, 100, 100]);
    }

    #[test]
    fn largest_remainder_breaks_ties_in_label_order() {
        assert_eq!(allocate_counts(1, &SplitRatios::new(1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0)), [
            1, 0, 0
        ]);
        assert_eq!(allocate_counts(7, &SplitRatios::new(0.6, 0.2, 0.2)), [4, 2, 1]);
    }

    #[test]
    fn ratios_off_by_more_than_tolerance_are_rejected() {
        assert!(SplitRatios::new(0.6, 0.2, 0.21).validate().is_err());
        assert!(SplitRatios::new(0.6, 0.2, 0.2).validate().is_ok());
        assert!(SplitRatios::new(f64::NAN, 0.5, 0.5).validate().is_err());
        assert!(SplitRatios::new(1.2, -0.1, -0.1).validate().is_err());
    }

    #[test]
    fn small_stratum_defaults_to_train() {
        let candidates = vec![
            SplitCandidate {
                version_id: VersionId::new("v1"),
                natural_key: NaturalKey::new(r#"["1"]"#),
                stratum: "\"rare\"".to_string(),
            },
            SplitCandidate {
                version_id: VersionId::new("v2"),
                natural_key: NaturalKey::new(r#"["2"]"#),
                stratum: "\"rare\"".to_string(),
            },
        ];
        let plan = plan_splits(candidates, &SplitRatios::new(0.6, 0.2, 0.2), 42).unwrap();
        assert!(plan.strata[0].fallback);
        assert!(plan.assignments.iter().all(|assignment| assignment.split == SplitLabel::Train));
    }

    #[test]
    fn null_values_form_their_own_stratum() {
        assert_eq!(stratum_label(&FieldValue::Null).unwrap(), "null");
        assert_eq!(stratum_label(&FieldValue::Text("a".to_string())).unwrap(), "\"a\"");
    }
}
