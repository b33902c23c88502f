//! Configuration loading and management.
//!
//! This module loads the project configuration from the `.cytoflow/`
//! directory: global settings and the workflow documents to run in batch.

pub mod error;
pub mod loader;
pub mod models;

/// Tracing target for configuration loading.
pub const TRACING_TARGET: &str = "cf_core::config";
