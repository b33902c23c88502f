//! Test fixtures: tube files on disk and workflows built on them.

use cf_core::experiment::import::Tube;
use cf_core::experiment::{ConditionKind, Value};
use cf_core::operations::{ImportOp, ThresholdOp, WorkflowOperation};
use cf_core::{Workflow, WorkflowItem};
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;
use uuid::Uuid;

/// Events of the first tube (`Dox = 1.0`, `Well = A`) as `(V2-A, Y2-A)`.
pub const TUBE_A: [(f64, f64); 3] = [(10.0, 100.0), (20.0, 250.0), (30.0, 350.0)];

/// Events of the second tube (`Dox = 10.0`, `Well = B`).
pub const TUBE_B: [(f64, f64); 3] = [(300.0, 400.0), (400.0, 5000.0), (500.0, 6000.0)];

/// Write a two-channel CSV tube into `dir`.
pub fn write_tube(dir: &Path, name: &str, rows: &[(f64, f64)]) -> std::io::Result<()> {
    let mut text = String::from("V2-A,Y2-A\n");
    for (v, y) in rows {
        text.push_str(&format!("{v},{y}\n"));
    }
    std::fs::write(dir.join(name), text)
}

/// Create a temporary directory holding `a.csv` and `b.csv`.
///
/// Returns a TempDir that must be kept alive for the test duration.
pub fn create_tube_dir() -> std::io::Result<TempDir> {
    let dir = tempfile::tempdir()?;
    write_tube(dir.path(), "a.csv", &TUBE_A)?;
    write_tube(dir.path(), "b.csv", &TUBE_B)?;
    Ok(dir)
}

/// An import of both tubes with a float `Dox` and a categorical `Well`.
///
/// Tube files are relative; paths resolve against `dir`.
pub fn create_import_op(dir: &Path) -> ImportOp {
    let tube = |file: &str, dox: f64, well: &str| Tube {
        file: file.to_string(),
        conditions: BTreeMap::from([
            ("Dox".to_string(), Value::Float(dox)),
            ("Well".to_string(), Value::Str(well.to_string())),
        ]),
    };
    let mut op = ImportOp::new(
        vec![tube("a.csv", 1.0, "A"), tube("b.csv", 10.0, "B")],
        BTreeMap::from([
            ("Dox".to_string(), ConditionKind::Float),
            ("Well".to_string(), ConditionKind::Category),
        ]),
    );
    op.resolve_paths(dir);
    op
}

/// A workflow holding only the import. Returns the import's id.
pub fn create_import_workflow(dir: &Path) -> (Workflow, Uuid) {
    let mut workflow = Workflow::new();
    let id = workflow
        .append(WorkflowItem::new(Box::new(create_import_op(dir))))
        .expect("Failed to append import");
    (workflow, id)
}

/// Import followed by a threshold gate `T` on `Y2-A` at 300.
#[allow(dead_code)]
pub fn create_gated_workflow(dir: &Path) -> (Workflow, Uuid, Uuid) {
    let (mut workflow, import_id) = create_import_workflow(dir);
    let gate_id = workflow
        .append(WorkflowItem::new(Box::new(ThresholdOp::new(
            "T", "Y2-A", 300.0,
        ))))
        .expect("Failed to append threshold");
    (workflow, import_id, gate_id)
}

/// Append an operation, panicking on failure.
#[allow(dead_code)]
pub fn append(workflow: &mut Workflow, operation: Box<dyn WorkflowOperation>) -> Uuid {
    workflow
        .append(WorkflowItem::new(operation))
        .expect("Failed to append operation")
}

/// A two-item document written by the first workflow-item version.
///
/// Tube paths are relative; load it with the tube directory as the base.
/// The gate still embeds its current view and lists statistics as pairs.
#[allow(dead_code)]
pub const LEGACY_V1_WORKFLOW: &str = r#"
- !workflow-item;1
  deletable: false
  operation: !import;1
    tubes:
      - file: a.csv
        conditions: {Dox: 1.0, Well: A}
      - file: b.csv
        conditions: {Dox: 10.0, Well: B}
    conditions: {Dox: float, Well: category}
  views: []
  channels: [V2-A, Y2-A]
  conditions: {Dox: float, Well: category}
  metadata: {}
  statistics: []
  current_view: null
  default_view: null
- !workflow-item;1
  deletable: true
  operation: !threshold;1
    name: T
    channel: Y2-A
    threshold: 300.0
  views: []
  channels: [V2-A, Y2-A]
  conditions: {Dox: float, T: bool, Well: category}
  metadata: {}
  statistics: [[S, Mean]]
  current_view: !threshold-view;1
    scale: log
    huefacet: ''
    subset_list: []
  default_view: null
"#;
