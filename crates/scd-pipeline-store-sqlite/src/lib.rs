// crates/scd-pipeline-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Pipeline Store
// Description: Durable PipelineStore backend using SQLite WAL.
// Purpose: Provide production-grade persistence for the SCD pipeline.
// Dependencies: scd-pipeline-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`PipelineStore`] implementation that
//! persists landed raw rows, per-stream ingestion cursors, historized
//! versions, split labels, and writer leases. Each chunk commits in a single
//! transaction; reads go through a small pool of read connections so status
//! and training queries never wait on an in-flight run.
//!
//! [`PipelineStore`]: scd_pipeline_core::PipelineStore

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_READ_POOL_SIZE;
pub use store::SqlitePipelineStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
