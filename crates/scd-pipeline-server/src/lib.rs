// crates/scd-pipeline-server/src/lib.rs
// ============================================================================
// Module: SCD Pipeline Server
// Description: Read-only HTTP surface and shared pipeline wiring.
// Purpose: Serve ingestion progress and split-labeled records to monitors.
// Dependencies: scd-pipeline-core, scd-pipeline-config, axum, tokio
// ============================================================================

//! ## Overview
//! SCD pipeline server exposes committed pipeline state over HTTP for
//! monitors and training consumers. It never takes a writer lease: every
//! request is answered from the store's read path. The [`bootstrap`] module
//! is also used by the CLI to build pipelines from configuration.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod auth;
pub mod bootstrap;
pub mod server;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::FileRequestAuditSink;
pub use audit::NoopRequestAuditSink;
pub use audit::RequestAuditEvent;
pub use audit::RequestAuditSink;
pub use audit::StderrRequestAuditSink;
pub use auth::ApiKeyAuthz;
pub use auth::AuthError;
pub use auth::RequestContext;
pub use bootstrap::BootstrapError;
pub use bootstrap::build_pipeline;
pub use bootstrap::build_store;
pub use server::PipelineServer;
pub use server::RecordsResponse;
pub use server::ServerError;
