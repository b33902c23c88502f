//! Custom assertion helpers for integration tests.

use cf_core::experiment::ColumnData;
use cf_core::Workflow;
use cf_protocol::ipc::Event;
use cf_protocol::{Changed, ItemStatus};
use uuid::Uuid;

/// Assert the status of an item.
#[track_caller]
pub fn assert_status(workflow: &Workflow, id: Uuid, status: ItemStatus) {
    let item = workflow.item(id).expect("Item should be in the workflow");
    assert_eq!(
        item.status(),
        status,
        "unexpected status for {} (op_error: {:?})",
        item.friendly_id(),
        item.op_error()
    );
}

/// Assert that an item is invalid with the given operation error.
#[track_caller]
pub fn assert_op_error(workflow: &Workflow, id: Uuid, message: &str) {
    let item = workflow.item(id).expect("Item should be in the workflow");
    assert_eq!(item.status(), ItemStatus::Invalid);
    let error = item.op_error().expect("Item should carry an op_error");
    assert_eq!(error.message, message);
}

/// The named column of an item's result.
#[track_caller]
pub fn result_column(workflow: &Workflow, id: Uuid, name: &str) -> ColumnData {
    workflow
        .item(id)
        .and_then(|item| item.result())
        .expect("Item should have a result")
        .column(name)
        .expect("Column should be in the result")
        .clone()
}

/// Labels of a categorical column, row by row.
#[track_caller]
pub fn category_labels(column: &ColumnData) -> Vec<String> {
    (0..column.len()).map(|row| column.value(row).to_string()).collect()
}

/// Assert that some event raised `kind` on `id`.
pub fn has_change(events: &[Event], id: Uuid, kind: Changed) -> bool {
    events.iter().any(|e| {
        matches!(
            e,
            Event::ChangeRaised { item_id, kind: k, .. } if *item_id == id && *k == kind
        )
    })
}

/// The statuses an item passed through, in order.
pub fn status_trail(events: &[Event], id: Uuid) -> Vec<ItemStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ItemStatusUpdate { item_id, status } if *item_id == id => Some(*status),
            _ => None,
        })
        .collect()
}
