// crates/scd-pipeline-core/src/runtime/mod.rs
// ============================================================================
// Module: Pipeline Runtime
// Description: Change detection, historization, orchestration, and stores.
// Purpose: Execute pipeline steps against record sources and stores.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules implement the change detector, the SCD2 transition
//! builder, the lease-guarded pipeline orchestrator, audit sinks, built-in
//! record sources, and the in-memory store. Every host (CLI, HTTP server)
//! calls into the same [`Pipeline`] to preserve identical semantics.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit;
pub mod change;
pub mod engine;
pub mod error;
pub mod historize;
pub mod lease;
pub mod source;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::ChunkAuditEvent;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::PipelineAuditSink;
pub use audit::RecordSkippedEvent;
pub use audit::SplitAuditEvent;
pub use audit::StderrAuditSink;
pub use audit::StepFailedEvent;
pub use audit::StratumFallbackEvent;
pub use change::classify;
pub use engine::ChangeCounts;
pub use engine::ChunkReport;
pub use engine::DEFAULT_LEASE_TTL_MS;
pub use engine::IngestRequest;
pub use engine::Pipeline;
pub use engine::PipelineSettings;
pub use engine::ReplayReport;
pub use engine::ReplayRequest;
pub use engine::SplitReport;
pub use engine::SplitRequest;
pub use engine::StreamDefinition;
pub use error::ErrorKind;
pub use error::FailureReport;
pub use error::PipelineError;
pub use error::PipelineStep;
pub use historize::HistorizeError;
pub use historize::Provenance;
pub use lease::LeaseClock;
pub use lease::LeaseGuard;
pub use lease::SystemLeaseClock;
pub use source::JsonLinesSource;
pub use source::VecRecordSource;
pub use store::InMemoryPipelineStore;
pub use store::SharedPipelineStore;
