//! Workflow item status models.
//!
//! These are the shapes the core reports to front ends: the lifecycle
//! status of each item, the diagnostics captured at the item boundary,
//! and a compact per-item summary used for snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;
use uuid::Uuid;

/// Lifecycle status of a workflow item.
///
/// Normal progression: Waiting -> (Estimating) -> Applying -> Valid
///
/// - Invalid: the last estimate/apply failed or the upstream result is missing
/// - Loading: transient state while a saved workflow is deserialized
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Invalid,
    Waiting,
    Estimating,
    Applying,
    Valid,
    Loading,
}

impl ItemStatus {
    /// Whether an estimate or apply is currently running.
    pub fn is_busy(self) -> bool {
        matches!(self, ItemStatus::Estimating | ItemStatus::Applying)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Invalid => "invalid",
            ItemStatus::Waiting => "waiting",
            ItemStatus::Estimating => "estimating",
            ItemStatus::Applying => "applying",
            ItemStatus::Valid => "valid",
            ItemStatus::Loading => "loading",
        };
        f.write_str(s)
    }
}

/// Which phase of an item produced a diagnostic.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKind {
    OpError,
    OpWarning,
    EstimateError,
    EstimateWarning,
    ViewError,
    ViewWarning,
}

/// A human-readable message plus the parameter that caused it, if known.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct Diagnostic {
    pub message: String,

    /// Name of the offending operation or view field.
    pub field: Option<String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, field: Option<String>) -> Self {
        Self {
            message: message.into(),
            field,
        }
    }
}

/// Compact, serializable summary of a workflow item.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ItemSummary {
    #[ts(type = "string")]
    pub id: Uuid,

    /// Position of the item in the workflow.
    pub index: usize,

    /// Registry tag of the item's operation.
    pub operation: String,

    /// The operation's `name` parameter, when it has one.
    pub name: Option<String>,

    pub status: ItemStatus,

    /// Number of events in the cached result, if any.
    pub events: Option<usize>,

    pub channels: Vec<String>,

    /// Condition name to condition type (`bool`, `float`, `int`, `category`).
    pub conditions: BTreeMap<String, String>,

    pub statistics: Vec<(String, String)>,

    pub current_view: Option<String>,

    pub diagnostics: BTreeMap<String, Diagnostic>,
}
