//! End-to-end tests: a realistic gating and statistics workflow.
//!
//! These tests build import → threshold → hierarchy → category →
//! channel statistic and verify each step's result, then export the
//! workflow as a notebook.

mod common;

use cf_core::experiment::{CategorySubset, Subset, Value};
use cf_core::operations::{
    CategoryOp, CategoryRule, ChannelStatisticOp, HierarchyGate, HierarchyOp, StatisticFunction,
};
use cf_protocol::ItemStatus;
use common::*;

#[test]
fn test_gating_and_statistics_workflow() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, import_id, gate_id) = create_gated_workflow(dir.path());

    assert_status(&workflow, import_id, ItemStatus::Valid);
    let imported = workflow.item(import_id).unwrap();
    assert_eq!(imported.channels(), ["V2-A".to_string(), "Y2-A".to_string()]);
    assert!(imported.conditions().contains_key("Dox"));
    assert!(imported.conditions().contains_key("Well"));

    assert_eq!(
        result_column(&workflow, gate_id, "T"),
        cf_core::experiment::ColumnData::Bool(vec![false, false, true, true, true, true])
    );

    let hierarchy_id = append(
        &mut workflow,
        Box::new(HierarchyOp::new(
            "H",
            vec![HierarchyGate::new("T", Value::Bool(true), "High")],
        )),
    );
    assert_status(&workflow, hierarchy_id, ItemStatus::Valid);
    assert_eq!(
        category_labels(&result_column(&workflow, hierarchy_id, "H")),
        ["Unknown", "Unknown", "High", "High", "High", "High"]
    );

    let category_id = append(
        &mut workflow,
        Box::new(CategoryOp::new(
            "C",
            vec![CategoryRule::new(
                vec![Subset::Category(CategorySubset {
                    name: "Well".to_string(),
                    values: vec!["A".to_string(), "B".to_string()],
                    selected: vec!["A".to_string()],
                })],
                "InA",
            )],
        )),
    );
    assert_status(&workflow, category_id, ItemStatus::Valid);
    assert_eq!(
        category_labels(&result_column(&workflow, category_id, "C")),
        ["InA", "InA", "InA", "Unknown", "Unknown", "Unknown"]
    );

    let stat_id = append(
        &mut workflow,
        Box::new(ChannelStatisticOp::new(
            "S",
            "Y2-A",
            StatisticFunction::Mean,
            vec!["Dox".to_string()],
        )),
    );
    assert_status(&workflow, stat_id, ItemStatus::Valid);

    let item = workflow.item(stat_id).unwrap();
    let key = ("S".to_string(), "Mean".to_string());
    assert_eq!(item.statistics(), [key.clone()]);
    let statistic = item.result().unwrap().statistic(&key).unwrap();
    assert_eq!(statistic.index, ["Dox".to_string()]);
    let low = statistic.get(&[Value::Float(1.0)]).unwrap();
    let high = statistic.get(&[Value::Float(10.0)]).unwrap();
    assert!((low - 700.0 / 3.0).abs() < 1e-9);
    assert!((high - 3800.0).abs() < 1e-9);
}

#[test]
fn test_upstream_edit_flows_to_the_last_step() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, _, gate_id) = create_gated_workflow(dir.path());
    let hierarchy_id = append(
        &mut workflow,
        Box::new(HierarchyOp::new(
            "H",
            vec![HierarchyGate::new("T", Value::Bool(true), "High")],
        )),
    );

    workflow
        .set_operation_param(gate_id, "threshold", serde_json::json!(4500.0))
        .unwrap();

    assert_eq!(
        category_labels(&result_column(&workflow, hierarchy_id, "H")),
        ["Unknown", "Unknown", "Unknown", "Unknown", "High", "High"]
    );
}

#[test]
fn test_duplicate_column_name_is_an_error() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, _, _) = create_gated_workflow(dir.path());
    let duplicate = append(
        &mut workflow,
        Box::new(cf_core::operations::ThresholdOp::new("T", "V2-A", 1.0)),
    );

    let item = workflow.item(duplicate).unwrap();
    assert_eq!(item.status(), ItemStatus::Invalid);
    assert_eq!(item.op_error().unwrap().field.as_deref(), Some("name"));
}

#[test]
fn test_notebook_reproduces_every_step() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, _, _) = create_gated_workflow(dir.path());
    append(
        &mut workflow,
        Box::new(ChannelStatisticOp::new(
            "S",
            "Y2-A",
            StatisticFunction::Mean,
            vec!["Dox".to_string()],
        )),
    );

    let notebook = workflow.notebook();
    // Header, then at least one cell per item.
    assert!(notebook.len() >= 4);

    let script = notebook.to_script();
    assert!(script.starts_with("import cytoflow as flow"));
    assert!(script.contains("ex_0 = op_0.apply()"), "{script}");
    assert!(script.contains("ex_1 = op_1.apply(ex_0)"), "{script}");
    assert!(script.contains("ex_2 = op_2.apply(ex_1)"), "{script}");
    assert!(script.contains("flow.ChannelStatisticOp("), "{script}");

    let json = notebook.to_json();
    assert_eq!(json["nbformat"], 4);
    assert_eq!(json["cells"].as_array().unwrap().len(), notebook.len());
}

#[test]
fn test_two_cuts_make_three_categories() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, _, low_cut) = create_gated_workflow(dir.path());
    append(
        &mut workflow,
        Box::new(cf_core::operations::ThresholdOp::new("T2", "Y2-A", 4500.0)),
    );
    let mut levels = HierarchyOp::new(
        "Level",
        vec![
            HierarchyGate::new("T2", Value::Bool(true), "High"),
            HierarchyGate::new("T", Value::Bool(true), "Medium"),
        ],
    );
    levels.default = "Low".to_string();
    let hierarchy_id = append(&mut workflow, Box::new(levels));

    let counts = |workflow: &cf_core::Workflow| {
        result_column(workflow, hierarchy_id, "Level").value_counts()
    };
    assert_eq!(
        counts(&workflow),
        [
            (Value::Str("High".to_string()), 2),
            (Value::Str("Medium".to_string()), 2),
            (Value::Str("Low".to_string()), 2),
        ]
    );

    // 350 now falls under the lower cut as well.
    workflow
        .set_operation_param(low_cut, "threshold", serde_json::json!(375.0))
        .unwrap();
    assert_status(&workflow, hierarchy_id, ItemStatus::Valid);
    assert_eq!(
        counts(&workflow),
        [
            (Value::Str("High".to_string()), 2),
            (Value::Str("Medium".to_string()), 1),
            (Value::Str("Low".to_string()), 3),
        ]
    );
}
