// crates/scd-pipeline-config/src/lib.rs
// ============================================================================
// Module: SCD Pipeline Config Library
// Description: Canonical config model, validation, and example generation.
// Purpose: Single source of truth for scd-pipeline.toml semantics.
// Dependencies: scd-pipeline-core, scd-pipeline-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `scd-pipeline-config` defines the canonical configuration model for the
//! SCD pipeline. It provides strict, fail-closed validation, conversion into
//! core pipeline types, and a deterministic example configuration.
//!
//! Config inputs are untrusted: size, path, and count limits are enforced
//! before any value reaches the pipeline.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
