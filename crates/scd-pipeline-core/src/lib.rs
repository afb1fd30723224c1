// crates/scd-pipeline-core/src/lib.rs
// ============================================================================
// Module: SCD Pipeline Core Library
// Description: Public API surface for the SCD pipeline core.
// Purpose: Expose core types, interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! SCD pipeline core provides resumable chunked ingestion, SCD Type-2
//! historization, and deterministic stratified split assignment over a
//! growing external dataset. It is backend-agnostic: storage and record
//! sources plug in through explicit interfaces, and callers supply time.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::ChunkCommit;
pub use interfaces::Lease;
pub use interfaces::PipelineStore;
pub use interfaces::RecordSource;
pub use interfaces::SourceError;
pub use interfaces::StoreError;
pub use runtime::ChangeCounts;
pub use runtime::ChunkReport;
pub use runtime::ErrorKind;
pub use runtime::FailureReport;
pub use runtime::FileAuditSink;
pub use runtime::InMemoryPipelineStore;
pub use runtime::IngestRequest;
pub use runtime::JsonLinesSource;
pub use runtime::LeaseClock;
pub use runtime::NoopAuditSink;
pub use runtime::Pipeline;
pub use runtime::PipelineAuditSink;
pub use runtime::PipelineError;
pub use runtime::PipelineSettings;
pub use runtime::PipelineStep;
pub use runtime::ReplayReport;
pub use runtime::ReplayRequest;
pub use runtime::SharedPipelineStore;
pub use runtime::SplitReport;
pub use runtime::SplitRequest;
pub use runtime::StderrAuditSink;
pub use runtime::StreamDefinition;
pub use runtime::SystemLeaseClock;
pub use runtime::VecRecordSource;
