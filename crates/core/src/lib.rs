//! # cf-core
//!
//! Workflow engine, operations, views and versioned serialization for
//! cytoflow.
//!
//! This crate provides:
//! - An in-memory experiment table with typed conditions and statistics
//! - Gating, statistics and clustering operations
//! - Backend-free views that describe plots as data
//! - A workflow that keeps every step's result consistent as parameters change
//! - Versioned YAML persistence and notebook export
//! - A worker that serves a workflow over protocol commands
//!
//! ## Modules
//!
//! - [`experiment`]: Events, conditions, subsets and statistics
//! - [`operations`]: Operations and their selection views
//! - [`views`]: Plotting views and the figure model
//! - [`workflow`]: Items, scheduling and persistence
//! - [`serialization`]: Tagged, versioned YAML registry
//! - [`notebook`]: Jupyter notebook export
//! - [`config`]: Configuration loading from `.cytoflow/`
//! - [`state`]: Workflow worker

pub mod config;
pub mod error;
pub mod experiment;
pub mod notebook;
pub mod operations;
pub mod serialization;
pub mod state;
pub mod views;
pub mod workflow;

pub use error::{OpError, ParamError, ViewError, WorkflowError};
pub use workflow::{Workflow, WorkflowItem};
