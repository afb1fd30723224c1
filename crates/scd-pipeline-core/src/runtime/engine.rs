// crates/scd-pipeline-core/src/runtime/engine.rs
// ============================================================================
// Module: Pipeline Engine
// Description: Orchestrates ingestion, historization, and split assignment.
// Purpose: Expose each pipeline step as an idempotent, lease-guarded call.
// Dependencies: crate::{core, interfaces}, serde
// ============================================================================

//! ## Overview
//! [`Pipeline`] binds a [`PipelineStore`], the configured streams (schema and
//! record source), and an audit sink. Each writing step acquires the stream's
//! writer lease, computes every write in memory, and hands the store a single
//! all-or-nothing commit. The lease is released on every exit path.
//!
//! Per-record validation failures are collected into step reports and never
//! fail a step. Rows whose natural key cannot be derived are not landed; rows
//! that fail normalization are landed raw but not historized.
//!
//! Record times come from the caller-supplied `as_of`. Only the writer lease
//! reads the wall clock, through the pipeline's [`LeaseClock`], so a
//! backfilled `as_of` can neither expire nor extend another writer's lease.
//! Commits present the held lease, and the store rejects them when the lease
//! was taken over in the meantime.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::core::BatchId;
use crate::core::ChangeKind;
use crate::core::ConsumptionWindow;
use crate::core::CursorError;
use crate::core::FieldValue;
use crate::core::HistorizedRecord;
use crate::core::IngestionCursor;
use crate::core::IngestionMode;
use crate::core::NaturalKey;
use crate::core::ProgressReport;
use crate::core::RawRow;
use crate::core::RecordSchema;
use crate::core::SchemaError;
use crate::core::SourceRecord;
use crate::core::SplitLabel;
use crate::core::SplitRatios;
use crate::core::StratumSummary;
use crate::core::StreamId;
use crate::core::Timestamp;
use crate::core::Transition;
use crate::core::ValidationIssue;
use crate::core::hashing::derive_identifier;
use crate::core::plan_window;
use crate::core::split::SplitCandidate;
use crate::core::split::plan_splits;
use crate::core::split::stratum_label;
use crate::interfaces::ChunkCommit;
use crate::interfaces::PipelineStore;
use crate::interfaces::RecordSource;
use crate::interfaces::SourceError;
use crate::interfaces::StoreError;
use crate::runtime::audit::ChunkAuditEvent;
use crate::runtime::audit::PipelineAuditSink;
use crate::runtime::audit::RecordSkippedEvent;
use crate::runtime::audit::SplitAuditEvent;
use crate::runtime::audit::StepFailedEvent;
use crate::runtime::audit::StratumFallbackEvent;
use crate::runtime::change::classify;
use crate::runtime::error::PipelineError;
use crate::runtime::error::PipelineStep;
use crate::runtime::historize;
use crate::runtime::historize::Provenance;
use crate::runtime::lease::LeaseClock;
use crate::runtime::lease::LeaseGuard;
use crate::runtime::lease::SystemLeaseClock;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default writer lease lifetime (milliseconds).
pub const DEFAULT_LEASE_TTL_MS: u64 = 5 * 60 * 1000;
/// Hex length of derived batch identifiers.
const BATCH_ID_LENGTH: usize = 16;
/// Stratum label used when no stratification field is requested.
const UNSTRATIFIED: &str = "all";

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configured stream: schema plus the source it is read from.
#[derive(Clone)]
pub struct StreamDefinition {
    /// Stream identifier.
    pub stream_id: StreamId,
    /// Record schema.
    pub schema: RecordSchema,
    /// Ordered record source.
    pub source: Arc<dyn RecordSource + Send + Sync>,
    /// Chunk size used when a chunked request omits one.
    pub default_chunk_size: Option<u64>,
}

/// Pipeline-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Writer lease lifetime (milliseconds).
    pub lease_ttl_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            lease_ttl_ms: DEFAULT_LEASE_TTL_MS,
        }
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Request to ingest the next window of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Stream identifier.
    pub stream_id: StreamId,
    /// Ingestion mode.
    pub mode: IngestionMode,
    /// Chunk size override for chunked mode.
    pub chunk_size: Option<u64>,
    /// Invocation time used for validity and bookkeeping.
    pub as_of: Timestamp,
    /// Lease holder label.
    pub holder: String,
}

/// Request to re-run cleaning over an already landed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRequest {
    /// Stream identifier.
    pub stream_id: StreamId,
    /// Landed batch to replay.
    pub batch_id: BatchId,
    /// Invocation time used for validity.
    pub as_of: Timestamp,
    /// Lease holder label.
    pub holder: String,
}

/// Request to label current, unassigned versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRequest {
    /// Stream identifier.
    pub stream_id: StreamId,
    /// Target ratios.
    pub ratios: SplitRatios,
    /// Ordering seed.
    pub seed: u64,
    /// Schema field to stratify by; unstratified when absent.
    pub stratify_by: Option<String>,
    /// Invocation time used for lease bookkeeping.
    pub as_of: Timestamp,
    /// Lease holder label.
    pub holder: String,
}

// ============================================================================
// SECTION: Reports
// ============================================================================

/// Per-classification counts for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeCounts {
    /// Records that opened a first version.
    pub new: usize,
    /// Records that superseded the current version.
    pub changed: usize,
    /// Records equal to the current version.
    pub unchanged: usize,
}

impl ChangeCounts {
    /// Counts one classification.
    const fn record(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::New => self.new += 1,
            ChangeKind::Changed => self.changed += 1,
            ChangeKind::Unchanged => self.unchanged += 1,
        }
    }
}

/// Result of one ingestion step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkReport {
    /// Stream identifier.
    pub stream_id: StreamId,
    /// Batch identifier of the landed window.
    pub batch_id: BatchId,
    /// Ingestion mode.
    pub mode: IngestionMode,
    /// Consumed window; empty once the source is exhausted.
    pub window: ConsumptionWindow,
    /// Classification counts.
    #[serde(flatten)]
    pub counts: ChangeCounts,
    /// Raw rows landed.
    pub landed: usize,
    /// Records skipped by validation.
    pub issues: Vec<ValidationIssue>,
    /// Progress after the commit.
    pub progress: ProgressReport,
}

/// Result of replaying a landed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Stream identifier.
    pub stream_id: StreamId,
    /// Replayed batch.
    pub batch_id: BatchId,
    /// Classification counts.
    #[serde(flatten)]
    pub counts: ChangeCounts,
    /// Records skipped by validation.
    pub issues: Vec<ValidationIssue>,
}

/// Result of split assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitReport {
    /// Stream identifier.
    pub stream_id: StreamId,
    /// Ordering seed.
    pub seed: u64,
    /// Eligible versions found.
    pub eligible: usize,
    /// Labels written.
    pub assigned: usize,
    /// Per-stratum realized counts.
    pub strata: Vec<StratumSummary>,
}

/// Transitions and counts computed for a set of landed rows.
struct HistorizeOutcome {
    /// Transitions in source order.
    transitions: Vec<Transition>,
    /// Classification counts.
    counts: ChangeCounts,
    /// Records that failed normalization.
    issues: Vec<ValidationIssue>,
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Pipeline orchestrator over a store and configured streams.
pub struct Pipeline<S> {
    /// Persistent store.
    store: S,
    /// Streams keyed by identifier.
    streams: BTreeMap<StreamId, StreamDefinition>,
    /// Audit sink.
    audit: Arc<dyn PipelineAuditSink>,
    /// Pipeline settings.
    settings: PipelineSettings,
    /// Wall clock for writer leases.
    clock: Arc<dyn LeaseClock>,
}

impl<S: PipelineStore> Pipeline<S> {
    /// Creates a pipeline after validating every stream definition.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] when a schema is invalid, a
    /// stream id repeats, a default chunk size is zero, or the lease TTL is
    /// zero.
    pub fn new(
        store: S,
        streams: Vec<StreamDefinition>,
        audit: Arc<dyn PipelineAuditSink>,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        if settings.lease_ttl_ms == 0 {
            return Err(configuration(None, "lease_ttl_ms must be greater than zero"));
        }
        let mut registry = BTreeMap::new();
        for definition in streams {
            let stream_id = definition.stream_id.to_string();
            if stream_id.trim().is_empty() {
                return Err(configuration(None, "stream id must be non-empty"));
            }
            definition.schema.validate().map_err(|err| {
                configuration(Some(&stream_id), &format!("invalid schema: {err}"))
            })?;
            if definition.default_chunk_size == Some(0) {
                return Err(configuration(
                    Some(&stream_id),
                    "default_chunk_size must be greater than zero",
                ));
            }
            if registry.insert(definition.stream_id.clone(), definition).is_some() {
                return Err(configuration(Some(&stream_id), "duplicate stream id"));
            }
        }
        Ok(Self {
            store,
            streams: registry,
            audit,
            settings,
            clock: Arc::new(SystemLeaseClock),
        })
    }

    /// Replaces the wall clock used for writer leases.
    #[must_use]
    pub fn with_lease_clock(mut self, clock: Arc<dyn LeaseClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns a configured stream.
    #[must_use]
    pub fn stream(&self, stream_id: &StreamId) -> Option<&StreamDefinition> {
        self.streams.get(stream_id)
    }

    /// Returns every configured stream identifier in order.
    pub fn stream_ids(&self) -> impl Iterator<Item = &StreamId> {
        self.streams.keys()
    }

    /// Ingests the next window of a stream.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the step fails; nothing is committed.
    pub fn ingest_chunk(&self, request: &IngestRequest) -> Result<ChunkReport, PipelineError> {
        let result = self.ingest_inner(request);
        self.observe(PipelineStep::Ingest, request.as_of, result)
    }

    /// Re-runs cleaning over an already landed batch.
    ///
    /// Replaying data identical to the current versions yields no writes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the step fails; nothing is committed.
    pub fn historize_batch(&self, request: &ReplayRequest) -> Result<ReplayReport, PipelineError> {
        let result = self.replay_inner(request);
        self.observe(PipelineStep::Historize, request.as_of, result)
    }

    /// Assigns permanent split labels to current, unassigned versions.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] for invalid ratios or an
    /// undeclared stratification field, and other [`PipelineError`] variants
    /// when the commit fails; nothing is committed on failure.
    pub fn assign_splits(&self, request: &SplitRequest) -> Result<SplitReport, PipelineError> {
        let result = self.split_inner(request);
        self.observe(PipelineStep::AssignSplits, request.as_of, result)
    }

    /// Returns the committed progress of a stream without taking the lease.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the stream is unknown or the store fails.
    pub fn progress(&self, stream_id: &StreamId) -> Result<ProgressReport, PipelineError> {
        let definition = self.definition(stream_id)?;
        let cursor = self
            .store
            .load_cursor(&definition.stream_id)
            .map_err(|err| PipelineError::from_store(stream_id.as_str(), err))?
            .unwrap_or_else(|| IngestionCursor::new(definition.stream_id.clone()));
        Ok(cursor.progress())
    }

    /// Returns every version of one entity ordered by effective-from.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the stream is unknown or the store fails.
    pub fn history(
        &self,
        stream_id: &StreamId,
        natural_key: &NaturalKey,
    ) -> Result<Vec<HistorizedRecord>, PipelineError> {
        self.definition(stream_id)?;
        self.store
            .history(stream_id, natural_key)
            .map_err(|err| PipelineError::from_store(stream_id.as_str(), err))
    }

    /// Returns the version of an entity that was valid at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the stream is unknown or the store fails.
    pub fn version_as_of(
        &self,
        stream_id: &StreamId,
        natural_key: &NaturalKey,
        at: Timestamp,
    ) -> Result<Option<HistorizedRecord>, PipelineError> {
        Ok(self.history(stream_id, natural_key)?.into_iter().find(|version| version.covers(at)))
    }

    /// Returns current versions carrying a split label.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the stream is unknown or the store fails.
    pub fn records_by_split(
        &self,
        stream_id: &StreamId,
        split: SplitLabel,
    ) -> Result<Vec<HistorizedRecord>, PipelineError> {
        self.definition(stream_id)?;
        self.store
            .records_by_split(stream_id, split)
            .map_err(|err| PipelineError::from_store(stream_id.as_str(), err))
    }

    // ------------------------------------------------------------------------
    // Step bodies
    // ------------------------------------------------------------------------

    /// Ingests one window under the stream lease.
    fn ingest_inner(&self, request: &IngestRequest) -> Result<ChunkReport, PipelineError> {
        let definition = self.definition(&request.stream_id)?;
        let stream_id = &definition.stream_id;
        let store_err = |err: StoreError| PipelineError::from_store(stream_id.as_str(), err);
        let lease = LeaseGuard::acquire(
            &self.store,
            stream_id,
            &request.holder,
            self.clock.now(),
            self.settings.lease_ttl_ms,
        )
        .map_err(store_err)?;

        let cursor = self
            .store
            .load_cursor(stream_id)
            .map_err(store_err)?
            .unwrap_or_else(|| IngestionCursor::new(stream_id.clone()));
        let total = definition.source.total().map_err(|err| source_error(stream_id, err))?;
        let chunk_size = request.chunk_size.or(definition.default_chunk_size);
        let plan = plan_window(&cursor, total, request.mode, chunk_size, request.as_of)
            .map_err(|err| cursor_error(stream_id, err))?;
        let batch_id = batch_id_for(stream_id, request.mode, plan.window, request.as_of)?;

        let rows = if plan.window.is_empty() {
            Vec::new()
        } else {
            definition.source.read_window(plan.window).map_err(|err| source_error(stream_id, err))?
        };
        if u64::try_from(rows.len()).ok() != Some(plan.window.count) {
            return Err(PipelineError::Source {
                stream_id: stream_id.to_string(),
                message: format!(
                    "source returned {} rows for a window of {}",
                    rows.len(),
                    plan.window.count
                ),
                transient: false,
            });
        }

        let mut issues = Vec::new();
        let mut raw = Vec::with_capacity(rows.len());
        for row in rows {
            match row {
                RawRow::Malformed {
                    offset,
                    reason,
                } => issues.push(ValidationIssue {
                    offset,
                    natural_key: None,
                    field: None,
                    reason,
                }),
                RawRow::Parsed {
                    offset,
                    fields,
                } => match definition.schema.natural_key_of(&fields) {
                    Ok(natural_key) => raw.push(SourceRecord {
                        stream_id: stream_id.clone(),
                        batch_id: batch_id.clone(),
                        source_offset: offset,
                        natural_key,
                        fields,
                        ingested_at: request.as_of,
                    }),
                    Err(err) => issues.push(schema_issue(offset, None, &err)),
                },
            }
        }

        let outcome = self.historize_rows(definition, &raw, request.as_of)?;
        issues.extend(outcome.issues);
        issues.sort_by_key(|issue| issue.offset);
        let landed = raw.len();
        let commit = ChunkCommit {
            cursor: Some(plan.cursor.clone()),
            raw,
            transitions: outcome.transitions,
        };
        self.store.commit_chunk(lease.lease(), &commit).map_err(store_err)?;
        drop(lease);

        let report = ChunkReport {
            stream_id: stream_id.clone(),
            batch_id,
            mode: request.mode,
            window: plan.window,
            counts: outcome.counts,
            landed,
            issues,
            progress: plan.cursor.progress(),
        };
        self.audit.record_chunk(&ChunkAuditEvent::ingested(&report, request.as_of));
        self.record_issues(stream_id, &report.batch_id, &report.issues, request.as_of);
        Ok(report)
    }

    /// Replays one landed batch under the stream lease.
    fn replay_inner(&self, request: &ReplayRequest) -> Result<ReplayReport, PipelineError> {
        let definition = self.definition(&request.stream_id)?;
        let stream_id = &definition.stream_id;
        let store_err = |err: StoreError| PipelineError::from_store(stream_id.as_str(), err);
        let lease = LeaseGuard::acquire(
            &self.store,
            stream_id,
            &request.holder,
            self.clock.now(),
            self.settings.lease_ttl_ms,
        )
        .map_err(store_err)?;

        let raw = self.store.raw_batch(stream_id, &request.batch_id).map_err(store_err)?;
        if raw.is_empty() {
            return Err(PipelineError::BatchNotFound {
                stream_id: stream_id.to_string(),
                batch_id: request.batch_id.to_string(),
            });
        }
        let outcome = self.historize_rows(definition, &raw, request.as_of)?;
        if !outcome.transitions.is_empty() {
            let commit = ChunkCommit {
                cursor: None,
                raw: Vec::new(),
                transitions: outcome.transitions,
            };
            self.store.commit_chunk(lease.lease(), &commit).map_err(store_err)?;
        }
        drop(lease);

        let report = ReplayReport {
            stream_id: stream_id.clone(),
            batch_id: request.batch_id.clone(),
            counts: outcome.counts,
            issues: outcome.issues,
        };
        self.audit.record_chunk(&ChunkAuditEvent::historized(&report, request.as_of));
        self.record_issues(stream_id, &report.batch_id, &report.issues, request.as_of);
        Ok(report)
    }

    /// Plans and commits split labels under the stream lease.
    fn split_inner(&self, request: &SplitRequest) -> Result<SplitReport, PipelineError> {
        let definition = self.definition(&request.stream_id)?;
        let stream_id = &definition.stream_id;
        let store_err = |err: StoreError| PipelineError::from_store(stream_id.as_str(), err);
        request
            .ratios
            .validate()
            .map_err(|err| configuration(Some(stream_id.as_str()), &err.to_string()))?;
        if let Some(field) = &request.stratify_by
            && definition.schema.field(field).is_none()
        {
            return Err(configuration(
                Some(stream_id.as_str()),
                &format!("stratify_by field is not declared in the schema: {field}"),
            ));
        }
        let lease = LeaseGuard::acquire(
            &self.store,
            stream_id,
            &request.holder,
            self.clock.now(),
            self.settings.lease_ttl_ms,
        )
        .map_err(store_err)?;

        let eligible = self.store.eligible_for_split(stream_id).map_err(store_err)?;
        let mut candidates = Vec::with_capacity(eligible.len());
        for version in &eligible {
            let stratum = match &request.stratify_by {
                Some(field) => {
                    stratum_label(version.attributes.get(field).unwrap_or(&FieldValue::Null))
                        .map_err(|err| configuration(Some(stream_id.as_str()), &err.to_string()))?
                }
                None => UNSTRATIFIED.to_string(),
            };
            candidates.push(SplitCandidate {
                version_id: version.version_id.clone(),
                natural_key: version.natural_key.clone(),
                stratum,
            });
        }
        let plan = plan_splits(candidates, &request.ratios, request.seed)
            .map_err(|err| configuration(Some(stream_id.as_str()), &err.to_string()))?;
        let assigned = if plan.assignments.is_empty() {
            0
        } else {
            self.store.commit_splits(lease.lease(), &plan.assignments).map_err(store_err)?
        };
        drop(lease);

        let report = SplitReport {
            stream_id: stream_id.clone(),
            seed: request.seed,
            eligible: eligible.len(),
            assigned,
            strata: plan.strata,
        };
        let requested = request.ratios.requested_partitions();
        for stratum in report.strata.iter().filter(|stratum| stratum.fallback) {
            self.audit.record_fallback(&StratumFallbackEvent::new(
                stream_id,
                stratum,
                requested,
                request.as_of,
            ));
        }
        self.audit.record_splits(&SplitAuditEvent::new(&report, request.as_of));
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------------

    /// Resolves a configured stream.
    fn definition(&self, stream_id: &StreamId) -> Result<&StreamDefinition, PipelineError> {
        self.streams
            .get(stream_id)
            .ok_or_else(|| PipelineError::UnknownStream(stream_id.to_string()))
    }

    /// Normalizes, classifies, and historizes landed rows in source order.
    fn historize_rows(
        &self,
        definition: &StreamDefinition,
        raw: &[SourceRecord],
        as_of: Timestamp,
    ) -> Result<HistorizeOutcome, PipelineError> {
        let stream_id = &definition.stream_id;
        let mut issues = Vec::new();
        let mut normalized = Vec::with_capacity(raw.len());
        for record in raw {
            match definition.schema.normalize(&record.fields) {
                Ok(value) => normalized.push((record, value)),
                Err(err) => issues.push(schema_issue(
                    record.source_offset,
                    Some(record.natural_key.clone()),
                    &err,
                )),
            }
        }

        let keys: Vec<NaturalKey> = normalized
            .iter()
            .map(|(_, value)| value.natural_key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut working = self.load_current(stream_id, &keys)?;

        let mut counts = ChangeCounts::default();
        let mut transitions = Vec::new();
        for (record, value) in normalized {
            let current = working.get(&value.natural_key);
            let kind = classify(&value, current);
            let provenance = Provenance {
                stream_id,
                batch_id: &record.batch_id,
                source_offset: record.source_offset,
            };
            let transition = historize::apply(&value, provenance, kind, current, as_of).map_err(
                |err| PipelineError::Consistency {
                    stream_id: stream_id.to_string(),
                    natural_key: Some(value.natural_key.to_string()),
                    message: err.to_string(),
                },
            )?;
            counts.record(kind);
            if let Some(transition) = transition {
                working.insert(value.natural_key.clone(), transition.opened().clone());
                transitions.push(transition);
            }
        }
        Ok(HistorizeOutcome {
            transitions,
            counts,
            issues,
        })
    }

    /// Loads current versions keyed by natural key, rejecting duplicates.
    fn load_current(
        &self,
        stream_id: &StreamId,
        keys: &[NaturalKey],
    ) -> Result<BTreeMap<NaturalKey, HistorizedRecord>, PipelineError> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let rows = self
            .store
            .current_versions(stream_id, keys)
            .map_err(|err| PipelineError::from_store(stream_id.as_str(), err))?;
        let mut grouped: BTreeMap<NaturalKey, Vec<HistorizedRecord>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.natural_key.clone()).or_default().push(row);
        }
        let mut current = BTreeMap::new();
        for (natural_key, mut versions) in grouped {
            if versions.len() > 1 {
                let mut version_ids: Vec<String> =
                    versions.iter().map(|version| version.version_id.to_string()).collect();
                version_ids.sort();
                return Err(PipelineError::DuplicateCurrent {
                    stream_id: stream_id.to_string(),
                    natural_key: natural_key.to_string(),
                    version_ids,
                });
            }
            if let Some(version) = versions.pop() {
                current.insert(natural_key, version);
            }
        }
        Ok(current)
    }

    /// Emits one skip event per validation issue.
    fn record_issues(
        &self,
        stream_id: &StreamId,
        batch_id: &BatchId,
        issues: &[ValidationIssue],
        as_of: Timestamp,
    ) {
        for issue in issues {
            self.audit.record_skipped(&RecordSkippedEvent::new(stream_id, batch_id, issue, as_of));
        }
    }

    /// Emits a failure event for failed steps and passes the result through.
    fn observe<T>(
        &self,
        step: PipelineStep,
        as_of: Timestamp,
        result: Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        if let Err(err) = &result {
            self.audit.record_failure(&StepFailedEvent::new(err.report(step), as_of));
        }
        result
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a configuration error.
fn configuration(stream_id: Option<&str>, message: &str) -> PipelineError {
    PipelineError::Configuration {
        stream_id: stream_id.map(ToString::to_string),
        message: message.to_string(),
    }
}

/// Maps a source error onto the pipeline taxonomy.
fn source_error(stream_id: &StreamId, err: SourceError) -> PipelineError {
    PipelineError::Source {
        stream_id: stream_id.to_string(),
        transient: matches!(err, SourceError::Io(_)),
        message: err.to_string(),
    }
}

/// Maps a window planning error onto the pipeline taxonomy.
fn cursor_error(stream_id: &StreamId, err: CursorError) -> PipelineError {
    match err {
        CursorError::InvalidChunkSize {
            ..
        } => configuration(Some(stream_id.as_str()), &err.to_string()),
        CursorError::SourceShrank {
            ..
        } => PipelineError::Consistency {
            stream_id: stream_id.to_string(),
            natural_key: None,
            message: err.to_string(),
        },
    }
}

/// Converts a schema failure into a validation issue.
fn schema_issue(
    offset: u64,
    natural_key: Option<NaturalKey>,
    err: &SchemaError,
) -> ValidationIssue {
    ValidationIssue {
        offset,
        natural_key,
        field: err.field().map(ToString::to_string),
        reason: err.to_string(),
    }
}

/// Derives the batch identifier of one invocation.
fn batch_id_for(
    stream_id: &StreamId,
    mode: IngestionMode,
    window: ConsumptionWindow,
    as_of: Timestamp,
) -> Result<BatchId, PipelineError> {
    derive_identifier(
        &(stream_id.as_str(), mode.as_str(), window.offset, window.count, as_of.as_unix_millis()),
        BATCH_ID_LENGTH,
    )
    .map(BatchId::new)
    .map_err(|err| PipelineError::Consistency {
        stream_id: stream_id.to_string(),
        natural_key: None,
        message: err.to_string(),
    })
}
