//! Inter-process communication protocol.
//!
//! This module defines the message types exchanged between a front end
//! (GUI, notebook bridge, CLI) and the workflow worker.
//!
//! The protocol follows a Command/Event pattern:
//! - `Command`: requests sent to the worker that owns the workflow
//! - `Event`: status updates the worker sends back
//!
//! The worker processes commands strictly in order, so events for one
//! command always arrive before events for the next.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::change_models::Changed;
use crate::status_models::{DiagnosticKind, ItemStatus, ItemSummary};

/// Commands sent to the workflow worker.
///
/// Uses tagged enum serialization for TypeScript compatibility:
/// ```json
/// {
///   "type": "setOperationParam",
///   "payload": {
///     "item_id": "uuid-here",
///     "field": "threshold",
///     "value": 300.0
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Command {
    /// Add an operation to the workflow.
    ///
    /// `document` is a tagged YAML operation node such as
    /// `!threshold;1 {name: T, channel: Y2-A, threshold: 300.0}`.
    AddOperation {
        /// Insert position; appends when absent.
        index: Option<usize>,
        document: String,
    },

    /// Remove an item from the workflow.
    RemoveItem {
        #[ts(type = "string")]
        item_id: Uuid,
    },

    /// Change which item has UI focus.
    Select {
        #[ts(type = "string | null")]
        item_id: Option<Uuid>,
    },

    /// Set one operation parameter from a JSON value.
    SetOperationParam {
        #[ts(type = "string")]
        item_id: Uuid,
        field: String,
        value: serde_json::Value,
    },

    /// Set one parameter on one of an item's views.
    SetViewParam {
        #[ts(type = "string")]
        item_id: Uuid,
        view_id: String,
        field: String,
        value: serde_json::Value,
    },

    /// Make a view the item's current view.
    SetCurrentView {
        #[ts(type = "string")]
        item_id: Uuid,
        view_id: String,
    },

    /// Explicitly run the estimate step of an item's operation.
    Estimate {
        #[ts(type = "string")]
        item_id: Uuid,
    },

    /// Re-estimate and re-apply the whole workflow.
    RunAll,

    /// Request a summary of every item.
    GetSnapshot,

    /// Stop the worker after draining earlier commands.
    Shutdown,
}

/// Events sent from the workflow worker.
///
/// ```json
/// {
///   "type": "itemStatusUpdate",
///   "payload": {
///     "item_id": "uuid-here",
///     "status": "applying"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// An item was inserted into the workflow.
    ItemAdded {
        #[ts(type = "string")]
        item_id: Uuid,
        index: usize,
    },

    /// An item was removed from the workflow.
    ItemRemoved {
        #[ts(type = "string")]
        item_id: Uuid,
    },

    /// An item's lifecycle status changed.
    ItemStatusUpdate {
        #[ts(type = "string")]
        item_id: Uuid,
        status: ItemStatus,
    },

    /// A diagnostic was set on an item, or cleared when `message` is `None`.
    ItemDiagnostic {
        #[ts(type = "string")]
        item_id: Uuid,
        kind: DiagnosticKind,
        message: Option<String>,
        field: Option<String>,
    },

    /// A change event was raised on an item.
    ChangeRaised {
        #[ts(type = "string")]
        item_id: Uuid,
        kind: Changed,
        field: Option<String>,
    },

    /// An item's view was plotted.
    Plotted {
        #[ts(type = "string")]
        item_id: Uuid,
        view_id: String,
        plot_name: Option<String>,
    },

    /// The selected item changed.
    SelectionChanged {
        #[ts(type = "string | null")]
        item_id: Option<Uuid>,
    },

    /// Response to [`Command::GetSnapshot`].
    Snapshot { items: Vec<ItemSummary> },

    /// A command could not be carried out.
    CommandFailed { command: String, message: String },

    /// The worker has stopped.
    ShutdownComplete,
}
