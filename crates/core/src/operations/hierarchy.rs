//! Hierarchical gating: assign each event the category of the first gate
//! it passes.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::any::Any;

use super::{
    eq_concrete, param, replace, require_experiment, validate_new_column, ChangeQueue, FieldRole,
    FieldSpec, Warnings, WorkflowOperation,
};
use crate::error::{OpError, ParamError};
use crate::experiment::{ColumnData, Experiment, Value};
use crate::notebook::{operation_code, PyCall};
use crate::serialization::{decode, encode, Registry, VersionMatch};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldRole::Apply),
    FieldSpec::new("gates_list", FieldRole::Apply),
    FieldSpec::new("default", FieldRole::Apply),
];

/// Events whose `gate` condition equals `value` fall into `category`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyGate {
    pub gate: String,
    pub value: Value,
    pub category: String,
}

impl HierarchyGate {
    pub fn new(gate: impl Into<String>, value: Value, category: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            value,
            category: category.into(),
        }
    }
}

fn default_category() -> String {
    "Unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyOp {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gates_list: Vec<HierarchyGate>,
    #[serde(default = "default_category")]
    pub default: String,
    #[serde(skip)]
    changes: ChangeQueue,
}

impl Default for HierarchyOp {
    fn default() -> Self {
        Self {
            name: String::new(),
            gates_list: Vec::new(),
            default: default_category(),
            changes: ChangeQueue::default(),
        }
    }
}

impl HierarchyOp {
    pub fn new(name: impl Into<String>, gates_list: Vec<HierarchyGate>) -> Self {
        Self {
            name: name.into(),
            gates_list,
            ..Self::default()
        }
    }

    pub fn push_gate(&mut self, gate: HierarchyGate) {
        self.gates_list.push(gate);
        self.changes.field(FIELDS, "gates_list");
    }
}

impl WorkflowOperation for HierarchyOp {
    fn id(&self) -> &'static str {
        "hierarchy"
    }

    fn friendly_id(&self) -> &'static str {
        "Hierarchical Gating"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn changed_fields(&self, before: &dyn WorkflowOperation) -> Vec<&'static str> {
        changed_fields!(self, before, [name, gates_list, default])
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "name" => replace(&mut self.name, param(field, value)?),
            "gates_list" => replace(&mut self.gates_list, param(field, value)?),
            "default" => replace(&mut self.default, param(field, value)?),
            _ => return Err(ParamError::UnknownField(field.to_string())),
        };
        if changed {
            self.changes.field(FIELDS, field);
        }
        Ok(())
    }

    fn changes(&mut self) -> &mut ChangeQueue {
        &mut self.changes
    }

    fn apply(
        &self,
        experiment: Option<&Experiment>,
        _warnings: &mut Warnings,
    ) -> Result<Experiment, OpError> {
        let experiment = require_experiment(experiment)?;
        validate_new_column(&self.name, experiment)?;

        let mut columns = Vec::with_capacity(self.gates_list.len());
        for gate in &self.gates_list {
            let column = experiment.column(&gate.gate).map_err(|_| {
                OpError::new(
                    "gates_list",
                    format!("Gate '{}' is not in the experiment.", gate.gate),
                )
            })?;
            let found = (0..column.len()).any(|row| column.value(row).matches(&gate.value));
            if !found {
                return Err(OpError::new(
                    "gates_list",
                    format!("Value '{}' was not found in gate '{}'", gate.value, gate.gate),
                ));
            }
            if gate.category == self.default {
                return Err(OpError::new(
                    "default",
                    format!(
                        "Default category {} can't also be used as a gate category!",
                        gate.category
                    ),
                ));
            }
            columns.push(column);
        }

        let labels: Vec<String> = (0..experiment.len())
            .map(|row| {
                self.gates_list
                    .iter()
                    .zip(&columns)
                    .find(|(gate, column)| column.value(row).matches(&gate.value))
                    .map_or_else(|| self.default.clone(), |(gate, _)| gate.category.clone())
            })
            .collect();

        let mut levels: Vec<String> = Vec::new();
        for gate in &self.gates_list {
            if !levels.contains(&gate.category) {
                levels.push(gate.category.clone());
            }
        }
        levels.push(self.default.clone());

        let mut result = experiment.clone();
        result.add_condition(&self.name, ColumnData::category(levels, &labels))?;
        result.push_history(format!("hierarchy:{}", self.name));
        Ok(result)
    }

    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String {
        let gates: Vec<(String, Value, String)> = self
            .gates_list
            .iter()
            .map(|g| (g.gate.clone(), g.value.clone(), g.category.clone()))
            .collect();
        let call = PyCall::new("flow.HierarchyOp")
            .arg("name", &self.name)
            .arg("gates", &gates)
            .arg_unless("default", self.default.as_str(), "Unknown");
        operation_code(idx, prev_idx, &call, None)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn WorkflowOperation> {
        Box::new(self.clone())
    }

    fn eq_dyn(&self, other: &dyn WorkflowOperation) -> bool {
        eq_concrete(self, other)
    }
}

pub(super) fn register(registry: &mut Registry) {
    registry.register_dumper::<HierarchyOp, _>("hierarchy", 1, |op, _| encode(op));
    registry.register_loader("hierarchy", VersionMatch::Exact(1), |value, _| {
        let op: Box<dyn WorkflowOperation> = Box::new(decode::<HierarchyOp>("hierarchy", value)?);
        Ok(op)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gated() -> Experiment {
        let mut ex = Experiment::new();
        ex.add_channel("Y2-A", vec![10.0, 500.0, 40000.0, 20.0]).unwrap();
        ex.add_condition("Low", ColumnData::Bool(vec![true, false, false, true]))
            .unwrap();
        ex.add_condition("High", ColumnData::Bool(vec![false, false, true, false]))
            .unwrap();
        ex
    }

    fn op() -> HierarchyOp {
        HierarchyOp::new(
            "Level",
            vec![
                HierarchyGate::new("High", Value::Bool(true), "High"),
                HierarchyGate::new("Low", Value::Bool(true), "Low"),
            ],
        )
    }

    #[test]
    fn test_first_matching_gate_wins() {
        let result = op().apply(Some(&gated()), &mut Warnings::new()).unwrap();
        let column = result.column("Level").unwrap();
        assert_eq!(column.levels().unwrap(), ["High", "Low", "Unknown"]);
        let labels: Vec<String> = (0..4).map(|r| column.value(r).to_string()).collect();
        assert_eq!(labels, ["Low", "Unknown", "High", "Low"]);
    }

    #[test]
    fn test_missing_gate_is_an_error() {
        let mut op = op();
        op.gates_list
            .push(HierarchyGate::new("Mid", Value::Bool(true), "Mid"));
        let err = op.apply(Some(&gated()), &mut Warnings::new()).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("gates_list"));
        assert!(err.message.contains("'Mid'"));
    }

    #[test]
    fn test_default_category_cannot_be_reused() {
        let mut op = op();
        op.default = "Low".to_string();
        let err = op.apply(Some(&gated()), &mut Warnings::new()).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("default"));
    }

    #[test]
    fn test_gate_values_load_from_yaml() {
        let op: HierarchyOp = serde_yaml::from_str(
            "name: Level\ngates_list:\n- gate: High\n  value: true\n  category: High\n",
        )
        .unwrap();
        assert_eq!(op.gates_list[0].value, Value::Bool(true));
        assert_eq!(op.default, "Unknown");
    }

    #[test]
    fn test_push_gate_raises_apply() {
        let mut op = HierarchyOp::default();
        op.push_gate(HierarchyGate::new("High", Value::Bool(true), "High"));
        assert_eq!(op.changes().drain().len(), 1);
    }
}
