//! Common test utilities and helpers for integration tests.
//!
//! This module provides shared functionality across the integration tests:
//! - Fixtures (tube files, ready-made workflows)
//! - Custom assertions on items and events

pub mod assertions;
pub mod fixtures;

#[allow(unused_imports)]
pub use assertions::*;
pub use fixtures::*;
