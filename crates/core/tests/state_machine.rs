//! Integration tests for item lifecycle and change propagation.
//!
//! These tests verify that the workflow:
//! - Requires an estimate before applying estimate-driven operations
//! - Discards stale estimates when their inputs change
//! - Re-applies downstream items only when an upstream result changed
//! - Invalidates and recovers downstream items as upstream errors come and go

mod common;

use cf_core::operations::{KMeansOp, ThresholdOp};
use cf_core::WorkflowError;
use cf_protocol::{Changed, ItemStatus};
use common::*;
use serde_json::json;

#[test]
fn test_estimate_then_apply() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, _) = create_import_workflow(dir.path());
    let kmeans_id = append(
        &mut workflow,
        Box::new(KMeansOp::new("K", "V2-A", "Y2-A", 2)),
    );
    assert_op_error(&workflow, kmeans_id, "Click Estimate!");
    workflow.take_events();

    workflow.estimate(kmeans_id).unwrap();

    assert_status(&workflow, kmeans_id, ItemStatus::Valid);
    let events = workflow.take_events();
    let trail = status_trail(&events, kmeans_id);
    assert_eq!(
        trail,
        [
            ItemStatus::Estimating,
            ItemStatus::Waiting,
            ItemStatus::Applying,
            ItemStatus::Valid
        ]
    );
    assert!(has_change(&events, kmeans_id, Changed::EstimateResult));

    let counters = workflow.session().counters(kmeans_id);
    assert_eq!(counters.estimates, 1);
    assert_eq!(counters.applies, 2);
}

#[test]
fn test_estimate_parameter_discards_the_fit() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, _) = create_import_workflow(dir.path());
    let kmeans_id = append(
        &mut workflow,
        Box::new(KMeansOp::new("K", "V2-A", "Y2-A", 2)),
    );
    let gate_id = append(
        &mut workflow,
        Box::new(ThresholdOp::new("T", "Y2-A", 300.0)),
    );
    workflow.estimate(kmeans_id).unwrap();
    assert_status(&workflow, gate_id, ItemStatus::Valid);

    workflow
        .set_operation_param(kmeans_id, "num_clusters", json!(3))
        .unwrap();

    let kmeans = workflow.item(kmeans_id).unwrap();
    assert!(kmeans.result().is_none());
    assert!(!kmeans
        .operation()
        .as_any()
        .downcast_ref::<KMeansOp>()
        .unwrap()
        .is_estimated());
    assert_op_error(&workflow, gate_id, "Previous operation has no result");

    workflow.estimate(kmeans_id).unwrap();
    assert_status(&workflow, kmeans_id, ItemStatus::Valid);
    assert_status(&workflow, gate_id, ItemStatus::Valid);
}

#[test]
fn test_direct_field_edit_discards_the_fit() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, _) = create_import_workflow(dir.path());
    let kmeans_id = append(
        &mut workflow,
        Box::new(KMeansOp::new("K", "V2-A", "Y2-A", 3)),
    );
    let gate_id = append(
        &mut workflow,
        Box::new(ThresholdOp::new("T", "Y2-A", 300.0)),
    );
    workflow.estimate(kmeans_id).unwrap();
    assert_status(&workflow, gate_id, ItemStatus::Valid);
    workflow.take_events();

    workflow
        .edit_operation::<KMeansOp, _, _>(kmeans_id, |op| op.num_clusters = 2)
        .unwrap();

    let events = workflow.take_events();
    assert!(has_change(&events, kmeans_id, Changed::Estimate));
    let kmeans = workflow.item(kmeans_id).unwrap();
    assert!(kmeans.result().is_none());
    assert!(!kmeans
        .operation()
        .as_any()
        .downcast_ref::<KMeansOp>()
        .unwrap()
        .is_estimated());
    assert_op_error(&workflow, gate_id, "Previous operation has no result");

    workflow.estimate(kmeans_id).unwrap();
    assert_status(&workflow, gate_id, ItemStatus::Valid);
}

#[test]
fn test_unchanged_result_does_not_propagate() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, _, gate_id) = create_gated_workflow(dir.path());
    let downstream_id = append(
        &mut workflow,
        Box::new(ThresholdOp::new("U", "V2-A", 25.0)),
    );
    let gate_applies = workflow.session().counters(gate_id).applies;
    let downstream_applies = workflow.session().counters(downstream_id).applies;

    // Nothing lies between 300 and 340, so the gate is unchanged.
    workflow
        .set_operation_param(gate_id, "threshold", json!(340.0))
        .unwrap();

    assert_eq!(workflow.session().counters(gate_id).applies, gate_applies + 1);
    assert_eq!(
        workflow.session().counters(downstream_id).applies,
        downstream_applies
    );
    assert_status(&workflow, downstream_id, ItemStatus::Valid);
}

#[test]
fn test_setting_the_same_value_does_nothing() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, _, gate_id) = create_gated_workflow(dir.path());
    workflow.take_events();
    let before = workflow.session().totals();

    workflow
        .set_operation_param(gate_id, "threshold", json!(300.0))
        .unwrap();

    assert_eq!(workflow.session().totals(), before);
    assert!(workflow.take_events().is_empty());
}

#[test]
fn test_upstream_error_invalidates_then_recovers() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, import_id, gate_id) = create_gated_workflow(dir.path());

    workflow
        .set_operation_param(import_id, "tubes", json!([]))
        .unwrap();
    assert_status(&workflow, import_id, ItemStatus::Invalid);
    assert_op_error(&workflow, gate_id, "Previous operation has no result");
    assert!(workflow.item(gate_id).unwrap().channels().is_empty());

    workflow
        .set_operation_param(
            import_id,
            "tubes",
            json!([
                {"file": "a.csv", "conditions": {"Dox": 1.0, "Well": "A"}},
                {"file": "b.csv", "conditions": {"Dox": 10.0, "Well": "B"}}
            ]),
        )
        .unwrap();
    assert_status(&workflow, import_id, ItemStatus::Valid);
    assert_status(&workflow, gate_id, ItemStatus::Valid);
    assert!(workflow.item(gate_id).unwrap().op_error().is_none());
}

#[test]
fn test_unknown_field_is_rejected() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, _, gate_id) = create_gated_workflow(dir.path());

    let err = workflow
        .set_operation_param(gate_id, "no_such_field", json!(1))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Param(_)), "{err:?}");

    let err = workflow
        .set_operation_param(gate_id, "threshold", json!("high"))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Param(_)), "{err:?}");
}

#[test]
fn test_insert_at_front_reapplies_everything_after() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, import_id, gate_id) = create_gated_workflow(dir.path());
    let removed = workflow.remove(import_id).unwrap();
    assert_op_error(&workflow, gate_id, "No experiment specified");

    workflow.insert(0, removed).unwrap();

    assert_eq!(workflow.index_of(import_id), Some(0));
    assert_status(&workflow, import_id, ItemStatus::Valid);
    assert_status(&workflow, gate_id, ItemStatus::Valid);
}

#[test]
fn test_insert_past_the_end_is_rejected() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, _) = create_import_workflow(dir.path());
    let err = workflow
        .insert(
            5,
            cf_core::WorkflowItem::new(Box::new(ThresholdOp::new("T", "Y2-A", 1.0))),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::IndexOutOfBounds { index: 5, len: 1 }
    ));
    assert_eq!(workflow.len(), 1);
}
