//! Integration tests for saving and loading workflows.
//!
//! These tests verify that:
//! - A saved workflow loads back with the same operations and views
//! - Loaded items wait in `loading` until the workflow is re-run
//! - Relative tube paths resolve against the document's directory
//! - Every item version can be written and read back
//! - Hand-written legacy documents still load
//! - Every operation and view survives a save and load unchanged

mod common;

use cf_core::experiment::{BoolSubset, CategorySubset, RangeSubset, Scale, Subset, Value};
use cf_core::operations::{
    HierarchyGate, HierarchyOp, KMeansOp, KMeansView, PolygonOp, PolygonSelectionView, RangeOp,
    RangeSelectionView, WorkflowOperation,
};
use cf_core::serialization::{registry, SerializationError, VersionLocks};
use cf_core::views::{BarChartView, HistogramView, ScatterplotView, WorkflowView};
use cf_core::Workflow;
use cf_protocol::ItemStatus;
use common::*;

fn build(dir: &std::path::Path) -> Workflow {
    let (mut workflow, _, _) = create_gated_workflow(dir);
    let kmeans_id = append(
        &mut workflow,
        Box::new(KMeansOp::new("K", "V2-A", "Y2-A", 2)),
    );
    workflow.estimate(kmeans_id).expect("Failed to estimate");
    workflow
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let workflow = build(dir.path());
    let path = dir.path().join("analysis.flow");

    workflow
        .save(&path, registry(), &VersionLocks::new())
        .expect("Failed to save");
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("!workflow-item;4"), "{text}");
    assert!(text.contains("!import;1"), "{text}");
    assert!(text.contains("!threshold;1"), "{text}");

    let mut loaded = Workflow::load(&path, registry()).expect("Failed to load");
    assert_eq!(loaded.len(), workflow.len());
    for (saved, restored) in workflow.items().iter().zip(loaded.items()) {
        assert_eq!(saved, restored);
        assert_eq!(restored.status(), ItemStatus::Loading);
        assert_eq!(restored.channels(), saved.channels());
        assert_eq!(restored.conditions(), saved.conditions());
    }

    // The fit is not saved, so applying alone leaves k-means waiting for it.
    loaded.apply_all().expect("Failed to apply");
    let ids: Vec<_> = loaded.items().iter().map(|i| i.id()).collect();
    assert_status(&loaded, ids[0], ItemStatus::Valid);
    assert_status(&loaded, ids[1], ItemStatus::Valid);
    assert_op_error(&loaded, ids[2], "Click Estimate!");

    loaded.run_all().expect("Failed to run");
    for id in ids {
        assert_status(&loaded, id, ItemStatus::Valid);
    }
}

#[test]
fn test_locked_versions_load_back() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let workflow = build(dir.path());

    for version in 1..=4 {
        let locks = VersionLocks::new().lock("workflow-item", version);
        let text = workflow.to_yaml(registry(), &locks).expect("Failed to dump");
        assert!(text.contains(&format!("!workflow-item;{version}")));

        let mut loaded =
            Workflow::from_yaml(&text, registry(), Some(dir.path())).expect("Failed to parse");
        assert_eq!(loaded.items(), workflow.items(), "version {version}");

        loaded.run_all().expect("Failed to run");
        assert!(loaded
            .items()
            .iter()
            .all(|item| item.status() == ItemStatus::Valid));
    }
}

#[test]
fn test_legacy_document_loads() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let text = LEGACY_V1_WORKFLOW;
    let mut workflow =
        Workflow::from_yaml(text, registry(), Some(dir.path())).expect("Failed to parse");
    assert_eq!(workflow.len(), 2);

    let gate = &workflow.items()[1];
    assert_eq!(gate.status(), ItemStatus::Loading);
    assert_eq!(gate.current_view(), Some("threshold-selection"));
    assert_eq!(gate.views().len(), 1);
    assert_eq!(gate.statistics(), [("S".to_string(), "Mean".to_string())]);
    let gate_id = gate.id();

    workflow.apply_all().expect("Failed to apply");
    assert_status(&workflow, gate_id, ItemStatus::Valid);
    // Status fields now describe the live result.
    assert!(workflow.item(gate_id).unwrap().statistics().is_empty());
    assert_eq!(
        result_column(&workflow, gate_id, "T"),
        cf_core::experiment::ColumnData::Bool(vec![false, false, true, true, true, true])
    );
}

#[test]
fn test_workflow_document_is_a_plain_sequence() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (workflow, _) = create_import_workflow(dir.path());
    let text = workflow
        .to_yaml(registry(), &VersionLocks::new())
        .expect("Failed to dump");

    let value: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
    assert!(value.as_sequence().is_some_and(|items| items.len() == 1));
}

#[test]
fn test_unknown_operation_tag_fails_to_load() {
    let text = r#"
- !workflow-item;4
  operation: !no-such-operation;1
    name: X
  views: []
  current_view: null
"#;
    let err = Workflow::from_yaml(text, registry(), None).unwrap_err();
    assert!(
        matches!(err, SerializationError::UnknownTag { ref tag, .. } if tag == "no-such-operation"),
        "{err:?}"
    );
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Workflow::load(&dir.path().join("missing.flow"), registry()).unwrap_err();
    assert!(matches!(err, SerializationError::Io { .. }), "{err:?}");
}

fn subsets() -> Vec<Subset> {
    vec![
        Subset::Bool(BoolSubset {
            name: "T".to_string(),
            selected_t: true,
            selected_f: false,
        }),
        Subset::Category(CategorySubset {
            name: "Well".to_string(),
            values: vec!["A".to_string(), "B".to_string()],
            selected: vec!["B".to_string()],
        }),
        Subset::Range(RangeSubset {
            name: "Dox".to_string(),
            values: vec![1.0, 10.0],
            high: 10.0,
            low: 5.0,
        }),
    ]
}

#[test]
fn test_every_operation_round_trips() {
    let mut polygon = PolygonOp::new(
        "P",
        "V2-A",
        "Y2-A",
        vec![(1.0, 1.0), (400.0, 10.0), (200.0, 6000.0)],
    );
    polygon.yscale = Scale::Log;

    let mut hierarchy = HierarchyOp::new(
        "H",
        vec![
            HierarchyGate::new("T", Value::Float(1.0), "High"),
            HierarchyGate::new("Well", Value::Str("1".to_string()), "One"),
            HierarchyGate::new("U", Value::Bool(true), "Yes"),
        ],
    );
    hierarchy.default = "Other".to_string();

    let mut kmeans = KMeansOp::new("K", "V2-A", "Y2-A", 3);
    kmeans.xscale = Scale::Log;
    kmeans.by = vec!["Dox".to_string(), "Well".to_string()];
    kmeans.subset_list = subsets();

    let operations: [(&str, Box<dyn WorkflowOperation>); 4] = [
        ("!range;1", Box::new(RangeOp::new("R", "Y2-A", 100.0, 400.0))),
        ("!polygon;1", Box::new(polygon)),
        ("!hierarchy;1", Box::new(hierarchy)),
        ("!kmeans;1", Box::new(kmeans)),
    ];

    for (tag, op) in operations {
        let text = registry()
            .to_yaml_string(op.as_any(), &VersionLocks::new())
            .expect("Failed to dump operation");
        assert!(text.starts_with(tag), "{text}");

        let loaded: Box<dyn WorkflowOperation> = registry()
            .from_yaml_str(&text)
            .expect("Failed to load operation");
        assert!(loaded.eq_dyn(op.as_ref()), "{tag} changed on reload:\n{text}");
    }
}

#[test]
fn test_every_view_round_trips() {
    let mut histogram = HistogramView::new("Y2-A");
    histogram.scale = Scale::Log;
    histogram.huefacet = "Dox".to_string();
    histogram.plotfacet = "Well".to_string();
    histogram.subset_list = subsets();
    histogram.plot_params.title = Some("Tubes".to_string());
    histogram.plot_params.num_bins = Some(20);
    histogram.current_plot = Some("A".to_string());

    let mut scatterplot = ScatterplotView::new("V2-A", "Y2-A");
    scatterplot.yscale = Scale::Log;
    scatterplot.subset_list = subsets();
    scatterplot.plot_params.alpha = 0.5;
    scatterplot.current_plot = Some("B".to_string());

    let mut bar_chart = BarChartView::new(("S".to_string(), "Mean".to_string()), "Dox");
    bar_chart.huefacet = "Well".to_string();

    let mut range_view = RangeSelectionView::default();
    range_view.scale = Scale::Log;
    range_view.subset_list = subsets();

    let mut polygon_view = PolygonSelectionView::default();
    polygon_view.huefacet = "Well".to_string();
    polygon_view.subset_list = subsets();

    let mut kmeans_view = KMeansView::default();
    kmeans_view.plot_params.marker = "x".to_string();
    kmeans_view.current_plot = Some("1.0".to_string());

    let views: [(&str, Box<dyn WorkflowView>); 6] = [
        ("!histogram;1", Box::new(histogram)),
        ("!scatterplot;1", Box::new(scatterplot)),
        ("!bar-chart;1", Box::new(bar_chart)),
        ("!range-view;1", Box::new(range_view)),
        ("!polygon-view;1", Box::new(polygon_view)),
        ("!kmeans-view;1", Box::new(kmeans_view)),
    ];

    for (tag, view) in views {
        let text = registry()
            .to_yaml_string(view.as_any(), &VersionLocks::new())
            .expect("Failed to dump view");
        assert!(text.starts_with(tag), "{text}");

        let loaded: Box<dyn WorkflowView> = registry()
            .from_yaml_str(&text)
            .expect("Failed to load view");
        assert!(loaded.eq_dyn(view.as_ref()), "{tag} changed on reload:\n{text}");
    }
}
