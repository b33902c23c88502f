//! Remote execution of a workflow.
//!
//! This module provides the WorkflowManager, which owns a workflow on a
//! worker thread and drives it with protocol commands.

pub mod manager;

pub use manager::{event_channel, WorkflowManager};
