//! # cf-protocol
//!
//! Protocol definitions and data models shared by the cytoflow workflow
//! engine and its front ends.
//!
//! This crate defines the data structures used for:
//! - Change events that drive re-estimation, re-application and re-plotting
//! - Workflow item status and diagnostics
//! - Communication between a front end and the workflow worker
//! - Project configuration (`.cytoflow/config.toml`)
//!
//! ## Modules
//!
//! - [`change_models`]: `Changed` kinds and their payloads
//! - [`status_models`]: Item status, diagnostics and summaries
//! - [`config_models`]: Global configuration from config.toml
//! - [`ipc`]: Commands and Events for worker communication
//!
//! ## Design Principles
//!
//! - Minimal dependencies: Only serde, ts-rs, and uuid
//! - TypeScript generation: All types derive `TS` for client compatibility
//! - Independent compilation: No dependencies on other cytoflow crates

pub mod change_models;
pub mod config_models;
pub mod ipc;
pub mod status_models;

// Re-export all public types for convenience
pub use change_models::*;
pub use config_models::*;
pub use ipc::*;
pub use status_models::*;
