// crates/scd-pipeline-cli/src/lib.rs
// ============================================================================
// Module: SCD Pipeline CLI Library
// Description: Shared helpers for the `scd-pipeline` binary.
// Purpose: Expose the message catalog and serve policy to the binary and tests.
// Dependencies: scd-pipeline-config
// ============================================================================

//! ## Overview
//! Library half of the CLI crate. The binary in `main.rs` owns argument
//! parsing and dispatch; this crate holds the pieces that are unit-tested in
//! isolation.

pub mod i18n;
pub mod serve_policy;
