// crates/scd-pipeline-server/src/bootstrap.rs
// ============================================================================
// Module: Pipeline Bootstrap
// Description: Builds stores, audit sinks, and pipelines from configuration.
// Purpose: Share one wiring path between the HTTP server and the CLI.
// Dependencies: scd-pipeline-config, scd-pipeline-core, scd-pipeline-store-sqlite
// ============================================================================

//! ## Overview
//! Turns a validated [`ScdPipelineConfig`] into a ready [`Pipeline`] over a
//! [`SharedPipelineStore`]. The `SQLite` backend is opened (and its schema
//! initialized) here; the in-memory backend starts empty.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;

use scd_pipeline_config::AuditConfig;
use scd_pipeline_config::AuditSinkType;
use scd_pipeline_config::ScdPipelineConfig;
use scd_pipeline_config::StoreConfig;
use scd_pipeline_config::StoreType;
use scd_pipeline_core::FileAuditSink;
use scd_pipeline_core::InMemoryPipelineStore;
use scd_pipeline_core::NoopAuditSink;
use scd_pipeline_core::Pipeline;
use scd_pipeline_core::PipelineAuditSink;
use scd_pipeline_core::PipelineError;
use scd_pipeline_core::SharedPipelineStore;
use scd_pipeline_core::StderrAuditSink;
use scd_pipeline_store_sqlite::SqlitePipelineStore;
use thiserror::Error;

use crate::audit::FileRequestAuditSink;
use crate::audit::NoopRequestAuditSink;
use crate::audit::RequestAuditSink;
use crate::audit::StderrRequestAuditSink;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while wiring a pipeline from configuration.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Store could not be opened.
    #[error("store init failed: {0}")]
    Store(String),
    /// Audit sink could not be opened.
    #[error("audit init failed: {0}")]
    Audit(String),
    /// Pipeline rejected the configured streams or settings.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

// ============================================================================
// SECTION: Builders
// ============================================================================

/// Builds the configured pipeline store.
///
/// # Errors
///
/// Returns [`BootstrapError::Store`] when the `SQLite` store cannot be opened.
pub fn build_store(config: &StoreConfig) -> Result<SharedPipelineStore, BootstrapError> {
    match config.store_type {
        StoreType::Memory => Ok(SharedPipelineStore::from_store(InMemoryPipelineStore::new())),
        StoreType::Sqlite => {
            let sqlite = config
                .sqlite_config()
                .ok_or_else(|| BootstrapError::Store("sqlite store requires path".to_string()))?;
            let store = SqlitePipelineStore::new(sqlite)
                .map_err(|err| BootstrapError::Store(err.to_string()))?;
            Ok(SharedPipelineStore::from_store(store))
        }
    }
}

/// Builds the pipeline step audit sink.
///
/// # Errors
///
/// Returns [`BootstrapError::Audit`] when the audit file cannot be opened.
pub fn build_audit_sink(
    config: &AuditConfig,
) -> Result<Arc<dyn PipelineAuditSink>, BootstrapError> {
    match config.sink {
        AuditSinkType::Stderr => Ok(Arc::new(StderrAuditSink)),
        AuditSinkType::None => Ok(Arc::new(NoopAuditSink)),
        AuditSinkType::File => {
            let path = audit_path(config)?;
            let sink =
                FileAuditSink::new(path).map_err(|err| BootstrapError::Audit(err.to_string()))?;
            Ok(Arc::new(sink))
        }
    }
}

/// Builds the request audit sink used by the HTTP server.
///
/// # Errors
///
/// Returns [`BootstrapError::Audit`] when the audit file cannot be opened.
pub fn build_request_audit_sink(
    config: &AuditConfig,
) -> Result<Arc<dyn RequestAuditSink>, BootstrapError> {
    match config.sink {
        AuditSinkType::Stderr => Ok(Arc::new(StderrRequestAuditSink)),
        AuditSinkType::None => Ok(Arc::new(NoopRequestAuditSink)),
        AuditSinkType::File => {
            let path = audit_path(config)?;
            let sink = FileRequestAuditSink::new(path)
                .map_err(|err| BootstrapError::Audit(err.to_string()))?;
            Ok(Arc::new(sink))
        }
    }
}

/// Builds a pipeline over the configured store, streams, and audit sink.
///
/// # Errors
///
/// Returns [`BootstrapError`] when the store or audit sink cannot be opened or
/// the pipeline rejects its configuration.
pub fn build_pipeline(
    config: &ScdPipelineConfig,
) -> Result<Pipeline<SharedPipelineStore>, BootstrapError> {
    let store = build_store(&config.store)?;
    let audit = build_audit_sink(&config.audit)?;
    let pipeline =
        Pipeline::new(store, config.stream_definitions(), audit, config.pipeline_settings())?;
    Ok(pipeline)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the file sink path.
fn audit_path(config: &AuditConfig) -> Result<&Path, BootstrapError> {
    config
        .path
        .as_deref()
        .map(Path::new)
        .ok_or_else(|| BootstrapError::Audit("file audit sink requires path".to_string()))
}
