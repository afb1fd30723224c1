// crates/scd-pipeline-core/src/core/time.rs
// ============================================================================
// Module: Pipeline Time Model
// Description: Canonical timestamp representation for versions and cursors.
// Purpose: Keep historization replayable by never reading wall-clock time.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every operation that stamps records (effective-from, effective-to, cursor
//! updates) receives an explicit `as_of` from its caller. The only clock the
//! core reads is the lease clock in `runtime::lease`, which decides writer
//! lease expiry independently of `as_of`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Unix epoch milliseconds supplied by the caller.
///
/// # Invariants
/// - No validation is performed; monotonicity is a caller responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(value: i64) -> Self {
        Self(value)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the timestamp advanced by `millis`, saturating on overflow.
    #[must_use]
    pub const fn saturating_add_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
