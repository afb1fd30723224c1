// crates/scd-pipeline-core/src/core/versioning.rs
// ============================================================================
// Module: Version Transitions
// Description: Change classifications and atomic SCD2 transitions.
// Purpose: Model close-old/open-new as a single tagged state change.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`Transition`] is the unit a store applies atomically: either a brand
//! new version is opened, or the current version is closed and its successor
//! opened in the same step. Stores never see a close without its open.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::VersionId;
use crate::core::records::HistorizedRecord;

// ============================================================================
// SECTION: Change Classification
// ============================================================================

/// Classification of a normalized record against the current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// No current version exists.
    New,
    /// All tracked attributes are equal.
    Unchanged,
    /// At least one tracked attribute differs.
    Changed,
}

// ============================================================================
// SECTION: Transitions
// ============================================================================

/// Atomic historization step for one natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// A first version was opened.
    Opened {
        /// Newly opened current version.
        opened: HistorizedRecord,
    },
    /// The current version was closed and a successor opened.
    Superseded {
        /// Closed version with effective-to set and current flag cleared.
        closed: HistorizedRecord,
        /// Newly opened current version.
        opened: HistorizedRecord,
    },
}

impl Transition {
    /// Returns the opened version.
    #[must_use]
    pub const fn opened(&self) -> &HistorizedRecord {
        match self {
            Self::Opened {
                opened,
            }
            | Self::Superseded {
                opened, ..
            } => opened,
        }
    }

    /// Returns the closed version, if any.
    #[must_use]
    pub const fn closed(&self) -> Option<&HistorizedRecord> {
        match self {
            Self::Opened {
                ..
            } => None,
            Self::Superseded {
                closed, ..
            } => Some(closed),
        }
    }

    /// Returns the identifier of the version that was closed, if any.
    #[must_use]
    pub fn closed_version_id(&self) -> Option<&VersionId> {
        self.closed().map(|closed| &closed.version_id)
    }

    /// Returns every row written or modified, closed row first.
    #[must_use]
    pub fn rows(&self) -> Vec<&HistorizedRecord> {
        match self {
            Self::Opened {
                opened,
            } => vec![opened],
            Self::Superseded {
                closed,
                opened,
            } => vec![closed, opened],
        }
    }
}
