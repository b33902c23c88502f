//! Change event models.
//!
//! A change event is an immutable `(kind, payload)` pair raised whenever an
//! operation parameter, a view parameter or an item's result changes. The
//! workflow uses the kind to decide whether an item must be re-estimated,
//! re-applied or re-plotted.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The closed set of reasons something in a workflow changed.
///
/// | Kind | Raised when |
/// |---|---|
/// | `Apply` | an apply-relevant operation parameter changed |
/// | `Estimate` | an estimate-relevant operation parameter changed |
/// | `EstimateResult` | `estimate()` produced new cached model state |
/// | `PrevResult` | the upstream item's result changed |
/// | `Result` | this item's own result changed |
/// | `View` | a view parameter changed |
/// | `OpStatus` / `ViewStatus` | a status-only field changed (never triggers work) |
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Changed {
    Apply,
    Estimate,
    EstimateResult,
    PrevResult,
    Result,
    View,
    OpStatus,
    ViewStatus,
}

impl Changed {
    /// Whether an event of this kind may cause an item to recompute.
    pub fn is_actionable(self) -> bool {
        !matches!(self, Changed::OpStatus | Changed::ViewStatus)
    }
}

impl std::fmt::Display for Changed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Changed::Apply => "APPLY",
            Changed::Estimate => "ESTIMATE",
            Changed::EstimateResult => "ESTIMATE_RESULT",
            Changed::PrevResult => "PREV_RESULT",
            Changed::Result => "RESULT",
            Changed::View => "VIEW",
            Changed::OpStatus => "OP_STATUS",
            Changed::ViewStatus => "VIEW_STATUS",
        };
        f.write_str(s)
    }
}

/// What a change event refers to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangePayload {
    /// The event concerns the item (or operation) as a whole.
    Item,

    /// A named operation field changed.
    OperationField { field: String },

    /// A named field on one of the item's views changed.
    ViewField { view_id: String, field: String },
}

impl ChangePayload {
    /// Convenience constructor for [`ChangePayload::OperationField`].
    pub fn operation_field(field: impl Into<String>) -> Self {
        ChangePayload::OperationField {
            field: field.into(),
        }
    }

    /// Convenience constructor for [`ChangePayload::ViewField`].
    pub fn view_field(view_id: impl Into<String>, field: impl Into<String>) -> Self {
        ChangePayload::ViewField {
            view_id: view_id.into(),
            field: field.into(),
        }
    }

    /// The field name carried by this payload, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            ChangePayload::Item => None,
            ChangePayload::OperationField { field } => Some(field),
            ChangePayload::ViewField { field, .. } => Some(field),
        }
    }
}

/// A single change event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct ChangeEvent {
    pub kind: Changed,
    pub payload: ChangePayload,
}

impl ChangeEvent {
    pub fn new(kind: Changed, payload: ChangePayload) -> Self {
        Self { kind, payload }
    }

    /// An event about the item as a whole (`PrevResult`, `Result`, `EstimateResult`).
    pub fn item(kind: Changed) -> Self {
        Self::new(kind, ChangePayload::Item)
    }
}
