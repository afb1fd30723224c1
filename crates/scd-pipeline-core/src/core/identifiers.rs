// crates/scd-pipeline-core/src/core/identifiers.rs
// ============================================================================
// Module: Pipeline Identifiers
// Description: Opaque identifiers for streams, batches, versions, and entities.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque strings that serialize transparently. Batch and
//! version identifiers are derived deterministically by the runtime so a
//! retried chunk reproduces the same ids; natural keys are canonical JSON
//! arrays built by [`crate::core::RecordSchema::natural_key_of`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Identifier of a configured source stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Creates a new stream identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Identifier of one ingestion invocation for a stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Creates a new batch identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Surrogate identifier of one historized version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    /// Creates a new version identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for VersionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for VersionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Natural key shared by every version of one logical entity.
///
/// # Invariants
/// - Built from the schema's key fields in schema order.
/// - Encoded as a canonical JSON array so composite keys are unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(String);

impl NaturalKey {
    /// Wraps an already-canonical natural key string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for NaturalKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NaturalKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
