// crates/scd-pipeline-core/src/runtime/error.rs
// ============================================================================
// Module: Pipeline Errors
// Description: Step-level error taxonomy and serializable failure reports.
// Purpose: Tell orchestrators whether a failed step is safe to retry.
// Dependencies: serde, thiserror, crate::interfaces
// ============================================================================

//! ## Overview
//! Every pipeline step fails with a [`PipelineError`]. Its [`ErrorKind`]
//! drives the retry decision: only transient I/O is retry-safe; configuration
//! errors are rejected before any write; consistency errors roll the step back
//! and need an operator. Per-record validation failures never surface here;
//! they are collected into step reports instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Source or store unreachable or busy; retrying the step is safe.
    TransientIo,
    /// Invalid request or settings; rejected before any write.
    Configuration,
    /// Stored state violates an invariant or another writer interfered.
    Consistency,
    /// A single record failed validation and was skipped.
    Validation,
}

impl ErrorKind {
    /// Returns the stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransientIo => "transient_io",
            Self::Configuration => "configuration",
            Self::Consistency => "consistency",
            Self::Validation => "validation",
        }
    }
}

/// Pipeline step that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    /// Chunk ingestion.
    Ingest,
    /// Replay of a landed batch.
    Historize,
    /// Split assignment.
    AssignSplits,
    /// Progress query.
    Progress,
    /// History or split read query.
    Query,
}

/// Serializable failure summary for orchestrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Failed step.
    pub step: PipelineStep,
    /// Stream identifier when known.
    pub stream_id: Option<String>,
    /// Natural key when the failure is entity-scoped.
    pub natural_key: Option<String>,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Whether re-running the whole step is safe.
    pub retry_safe: bool,
    /// Human-readable message.
    pub message: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Pipeline step errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Stream identifier is not configured.
    #[error("unknown stream: {0}")]
    UnknownStream(String),
    /// Request or pipeline settings are invalid.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Stream identifier when known.
        stream_id: Option<String>,
        /// Failure description.
        message: String,
    },
    /// Another writer holds the stream lease.
    #[error("run in progress for stream {stream_id}: held by {holder}")]
    RunInProgress {
        /// Stream identifier.
        stream_id: String,
        /// Current lease holder.
        holder: String,
    },
    /// More than one current version exists for a natural key.
    #[error("stream {stream_id} has {} current versions for {natural_key}", version_ids.len())]
    DuplicateCurrent {
        /// Stream identifier.
        stream_id: String,
        /// Offending natural key.
        natural_key: String,
        /// Identifiers of every current version found.
        version_ids: Vec<String>,
    },
    /// Stored state contradicts the step's expectations.
    #[error("consistency failure on stream {stream_id}: {message}")]
    Consistency {
        /// Stream identifier.
        stream_id: String,
        /// Natural key when entity-scoped.
        natural_key: Option<String>,
        /// Failure description.
        message: String,
    },
    /// Landed batch does not exist.
    #[error("batch {batch_id} not found for stream {stream_id}")]
    BatchNotFound {
        /// Stream identifier.
        stream_id: String,
        /// Requested batch identifier.
        batch_id: String,
    },
    /// Record source failed.
    #[error("record source failed for stream {stream_id}: {message}")]
    Source {
        /// Stream identifier.
        stream_id: String,
        /// Failure description.
        message: String,
        /// Whether the failure is transient I/O.
        transient: bool,
    },
    /// Pipeline store failed.
    #[error("pipeline store failed for stream {stream_id}: {source}")]
    Store {
        /// Stream identifier.
        stream_id: String,
        /// Underlying store error.
        source: StoreError,
    },
}

impl PipelineError {
    /// Returns the failure classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownStream(_)
            | Self::Configuration {
                ..
            }
            | Self::BatchNotFound {
                ..
            } => ErrorKind::Configuration,
            Self::RunInProgress {
                ..
            }
            | Self::DuplicateCurrent {
                ..
            }
            | Self::Consistency {
                ..
            } => ErrorKind::Consistency,
            Self::Source {
                transient, ..
            } => {
                if *transient {
                    ErrorKind::TransientIo
                } else {
                    ErrorKind::Consistency
                }
            }
            Self::Store {
                source, ..
            } => {
                if source.is_transient() {
                    ErrorKind::TransientIo
                } else {
                    ErrorKind::Consistency
                }
            }
        }
    }

    /// Returns true when re-running the whole step is safe.
    #[must_use]
    pub const fn retry_safe(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientIo)
    }

    /// Returns the stream identifier when known.
    #[must_use]
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            Self::UnknownStream(stream_id) => Some(stream_id),
            Self::Configuration {
                stream_id, ..
            } => stream_id.as_deref(),
            Self::RunInProgress {
                stream_id, ..
            }
            | Self::DuplicateCurrent {
                stream_id, ..
            }
            | Self::Consistency {
                stream_id, ..
            }
            | Self::BatchNotFound {
                stream_id, ..
            }
            | Self::Source {
                stream_id, ..
            }
            | Self::Store {
                stream_id, ..
            } => Some(stream_id),
        }
    }

    /// Returns the natural key when the failure is entity-scoped.
    #[must_use]
    pub fn natural_key(&self) -> Option<&str> {
        match self {
            Self::DuplicateCurrent {
                natural_key, ..
            } => Some(natural_key),
            Self::Consistency {
                natural_key, ..
            } => natural_key.as_deref(),
            _ => None,
        }
    }

    /// Builds the serializable failure report for `step`.
    #[must_use]
    pub fn report(&self, step: PipelineStep) -> FailureReport {
        FailureReport {
            step,
            stream_id: self.stream_id().map(ToString::to_string),
            natural_key: self.natural_key().map(ToString::to_string),
            kind: self.kind(),
            retry_safe: self.retry_safe(),
            message: self.to_string(),
        }
    }

    /// Wraps a store error, promoting lease and guard conflicts.
    #[must_use]
    pub fn from_store(stream_id: &str, err: StoreError) -> Self {
        match err {
            StoreError::LeaseHeld {
                holder, ..
            } => Self::RunInProgress {
                stream_id: stream_id.to_string(),
                holder,
            },
            source => Self::Store {
                stream_id: stream_id.to_string(),
                source,
            },
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_io_is_retry_safe() {
        let transient = PipelineError::from_store("s", StoreError::Io("busy".to_string()));
        assert_eq!(transient.kind(), ErrorKind::TransientIo);
        assert!(transient.retry_safe());

        let conflict = PipelineError::from_store("s", StoreError::Conflict("closed".to_string()));
        assert_eq!(conflict.kind(), ErrorKind::Consistency);
        assert!(!conflict.retry_safe());
    }

    #[test]
    fn lease_conflicts_become_run_in_progress() {
        let err = PipelineError::from_store(
            "accidents",
            StoreError::LeaseHeld {
                stream_id: "accidents".to_string(),
                holder: "worker-1".to_string(),
                expires_at: crate::core::Timestamp::from_unix_millis(10),
            },
        );
        let report = err.report(PipelineStep::Ingest);
        assert_eq!(report.kind, ErrorKind::Consistency);
        assert_eq!(report.stream_id.as_deref(), Some("accidents"));
        assert!(report.message.contains("worker-1"));
    }
}
