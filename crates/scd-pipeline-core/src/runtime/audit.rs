// crates/scd-pipeline-core/src/runtime/audit.rs
// ============================================================================
// Module: Pipeline Audit Logging
// Description: Structured audit events for pipeline steps.
// Purpose: Emit JSON-line step records without hard logging dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every pipeline step reports through a [`PipelineAuditSink`]. Events carry
//! identifiers, counts, and the step's `as_of` timestamp; record payloads are
//! never logged. Deployments choose stderr, an append-only file, or nothing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::core::BatchId;
use crate::core::IngestionMode;
use crate::core::StratumSummary;
use crate::core::StreamId;
use crate::core::Timestamp;
use crate::core::ValidationIssue;
use crate::runtime::engine::ChunkReport;
use crate::runtime::engine::ReplayReport;
use crate::runtime::engine::SplitReport;
use crate::runtime::error::ErrorKind;
use crate::runtime::error::FailureReport;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Chunk ingestion or batch replay audit event.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Stream identifier.
    pub stream_id: String,
    /// Batch identifier.
    pub batch_id: String,
    /// Ingestion mode (ingestion only).
    pub mode: Option<IngestionMode>,
    /// Window offset (ingestion only).
    pub offset: Option<u64>,
    /// Window size (ingestion only).
    pub count: Option<u64>,
    /// New versions opened.
    pub new: usize,
    /// Versions superseded.
    pub changed: usize,
    /// Records equal to their current version.
    pub unchanged: usize,
    /// Records skipped by validation.
    pub skipped: usize,
}

impl ChunkAuditEvent {
    /// Builds the `chunk_ingested` event.
    #[must_use]
    pub fn ingested(report: &ChunkReport, as_of: Timestamp) -> Self {
        Self {
            event: "chunk_ingested",
            timestamp_ms: as_of.as_unix_millis(),
            stream_id: report.stream_id.to_string(),
            batch_id: report.batch_id.to_string(),
            mode: Some(report.mode),
            offset: Some(report.window.offset),
            count: Some(report.window.count),
            new: report.counts.new,
            changed: report.counts.changed,
            unchanged: report.counts.unchanged,
            skipped: report.issues.len(),
        }
    }

    /// Builds the `batch_historized` event.
    #[must_use]
    pub fn historized(report: &ReplayReport, as_of: Timestamp) -> Self {
        Self {
            event: "batch_historized",
            timestamp_ms: as_of.as_unix_millis(),
            stream_id: report.stream_id.to_string(),
            batch_id: report.batch_id.to_string(),
            mode: None,
            offset: None,
            count: None,
            new: report.counts.new,
            changed: report.counts.changed,
            unchanged: report.counts.unchanged,
            skipped: report.issues.len(),
        }
    }
}

/// Skipped record audit event.
#[derive(Debug, Clone, Serialize)]
pub struct RecordSkippedEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Stream identifier.
    pub stream_id: String,
    /// Batch identifier.
    pub batch_id: String,
    /// Source offset of the skipped row.
    pub offset: u64,
    /// Natural key when derivable.
    pub natural_key: Option<String>,
    /// Offending field when field-scoped.
    pub field: Option<String>,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Failure reason.
    pub reason: String,
}

impl RecordSkippedEvent {
    /// Builds the `record_skipped` event.
    #[must_use]
    pub fn new(
        stream_id: &StreamId,
        batch_id: &BatchId,
        issue: &ValidationIssue,
        as_of: Timestamp,
    ) -> Self {
        Self {
            event: "record_skipped",
            timestamp_ms: as_of.as_unix_millis(),
            stream_id: stream_id.to_string(),
            batch_id: batch_id.to_string(),
            offset: issue.offset,
            natural_key: issue.natural_key.as_ref().map(ToString::to_string),
            field: issue.field.clone(),
            kind: ErrorKind::Validation,
            reason: issue.reason.clone(),
        }
    }
}

/// Undersized stratum audit event.
#[derive(Debug, Clone, Serialize)]
pub struct StratumFallbackEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Stream identifier.
    pub stream_id: String,
    /// Canonical stratum label.
    pub stratum: String,
    /// Eligible members in the stratum.
    pub members: usize,
    /// Partitions with a non-zero ratio.
    pub requested_partitions: usize,
}

impl StratumFallbackEvent {
    /// Builds the `stratum_fallback` event.
    #[must_use]
    pub fn new(
        stream_id: &StreamId,
        stratum: &StratumSummary,
        requested_partitions: usize,
        as_of: Timestamp,
    ) -> Self {
        Self {
            event: "stratum_fallback",
            timestamp_ms: as_of.as_unix_millis(),
            stream_id: stream_id.to_string(),
            stratum: stratum.stratum.clone(),
            members: stratum.members,
            requested_partitions,
        }
    }
}

/// Split assignment audit event.
#[derive(Debug, Clone, Serialize)]
pub struct SplitAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Stream identifier.
    pub stream_id: String,
    /// Ordering seed.
    pub seed: u64,
    /// Eligible versions found.
    pub eligible: usize,
    /// Labels written.
    pub assigned: usize,
    /// Number of strata.
    pub strata: usize,
}

impl SplitAuditEvent {
    /// Builds the `splits_assigned` event.
    #[must_use]
    pub fn new(report: &SplitReport, as_of: Timestamp) -> Self {
        Self {
            event: "splits_assigned",
            timestamp_ms: as_of.as_unix_millis(),
            stream_id: report.stream_id.to_string(),
            seed: report.seed,
            eligible: report.eligible,
            assigned: report.assigned,
            strata: report.strata.len(),
        }
    }
}

/// Failed step audit event.
#[derive(Debug, Clone, Serialize)]
pub struct StepFailedEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Failure summary.
    #[serde(flatten)]
    pub report: FailureReport,
}

impl StepFailedEvent {
    /// Builds the `step_failed` event.
    #[must_use]
    pub const fn new(report: FailureReport, as_of: Timestamp) -> Self {
        Self {
            event: "step_failed",
            timestamp_ms: as_of.as_unix_millis(),
            report,
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for pipeline step events.
pub trait PipelineAuditSink: Send + Sync {
    /// Records a chunk ingestion or batch replay.
    fn record_chunk(&self, _event: &ChunkAuditEvent) {}

    /// Records a skipped record.
    fn record_skipped(&self, _event: &RecordSkippedEvent) {}

    /// Records an undersized stratum.
    fn record_fallback(&self, _event: &StratumFallbackEvent) {}

    /// Records a split assignment.
    fn record_splits(&self, _event: &SplitAuditEvent) {}

    /// Records a failed step.
    fn record_failure(&self, _event: &StepFailedEvent) {}
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl StderrAuditSink {
    /// Writes one event as a JSON line.
    fn emit(event: &impl Serialize) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

impl PipelineAuditSink for StderrAuditSink {
    fn record_chunk(&self, event: &ChunkAuditEvent) {
        Self::emit(event);
    }

    fn record_skipped(&self, event: &RecordSkippedEvent) {
        Self::emit(event);
    }

    fn record_fallback(&self, event: &StratumFallbackEvent) {
        Self::emit(event);
    }

    fn record_splits(&self, event: &SplitAuditEvent) {
        Self::emit(event);
    }

    fn record_failure(&self, event: &StepFailedEvent) {
        Self::emit(event);
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one event as a JSON line.
    fn emit(&self, event: &impl Serialize) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

impl PipelineAuditSink for FileAuditSink {
    fn record_chunk(&self, event: &ChunkAuditEvent) {
        self.emit(event);
    }

    fn record_skipped(&self, event: &RecordSkippedEvent) {
        self.emit(event);
    }

    fn record_fallback(&self, event: &StratumFallbackEvent) {
        self.emit(event);
    }

    fn record_splits(&self, event: &SplitAuditEvent) {
        self.emit(event);
    }

    fn record_failure(&self, event: &StepFailedEvent) {
        self.emit(event);
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl PipelineAuditSink for NoopAuditSink {}
