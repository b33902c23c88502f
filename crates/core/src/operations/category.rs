//! Categorical labelling from subset rules.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::any::Any;

use super::{
    eq_concrete, param, replace, require_experiment, validate_new_column, ChangeQueue, FieldRole,
    FieldSpec, Warnings, WorkflowOperation,
};
use crate::error::{OpError, ParamError};
use crate::experiment::{subset_query, ColumnData, Experiment, Subset};
use crate::notebook::{operation_code, PyCall};
use crate::serialization::{decode, encode, Registry, VersionMatch};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldRole::Apply),
    FieldSpec::new("subsets_list", FieldRole::Apply),
    FieldSpec::new("default", FieldRole::Apply),
];

/// Events selected by every subset in `subset_list` get `category`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    #[serde(default)]
    pub subset_list: Vec<Subset>,
    pub category: String,
}

impl CategoryRule {
    pub fn new(subset_list: Vec<Subset>, category: impl Into<String>) -> Self {
        Self {
            subset_list,
            category: category.into(),
        }
    }

    pub fn query(&self) -> String {
        subset_query(&self.subset_list)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryOp {
    pub name: String,
    pub subsets_list: Vec<CategoryRule>,
    pub default: String,
    changes: ChangeQueue,
}

impl Default for CategoryOp {
    fn default() -> Self {
        Self {
            name: String::new(),
            subsets_list: Vec::new(),
            default: "Unknown".to_string(),
            changes: ChangeQueue::default(),
        }
    }
}

impl CategoryOp {
    pub fn new(name: impl Into<String>, subsets_list: Vec<CategoryRule>) -> Self {
        Self {
            name: name.into(),
            subsets_list,
            ..Self::default()
        }
    }
}

impl WorkflowOperation for CategoryOp {
    fn id(&self) -> &'static str {
        "category"
    }

    fn friendly_id(&self) -> &'static str {
        "Categorical"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn changed_fields(&self, before: &dyn WorkflowOperation) -> Vec<&'static str> {
        changed_fields!(self, before, [name, subsets_list, default])
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "name" => replace(&mut self.name, param(field, value)?),
            "subsets_list" => replace(&mut self.subsets_list, param(field, value)?),
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
        if self.subsets_list.is_empty() {
            return Err(OpError::new("subsets_list", "Must specify some subsets"));
        }

        let mut levels: Vec<String> = Vec::with_capacity(self.subsets_list.len() + 1);
        let mut masks = Vec::with_capacity(self.subsets_list.len());
        for rule in &self.subsets_list {
            if rule.category.is_empty() {
                return Err(OpError::new("subsets_list", "Category string can't be empty!"));
            }
            if rule.category == self.default {
                return Err(OpError::new(
                    "default",
                    format!(
                        "Default category {} can't also be used as a gate category!",
                        rule.category
                    ),
                ));
            }
            if levels.contains(&rule.category) {
                return Err(OpError::new("subsets_list", "Can't reuse categories!"));
            }
            if rule.query().is_empty() {
                return Err(OpError::new("subsets_list", "Subset string can't be empty!"));
            }
            let mask = experiment
                .query(&rule.subset_list)
                .map_err(|e| OpError::new("subsets_list", e.to_string()))?;
            levels.push(rule.category.clone());
            masks.push(mask);
        }
        levels.push(self.default.clone());

        let labels: Vec<String> = (0..experiment.len())
            .map(|row| {
                masks
                    .iter()
                    .position(|mask| mask[row])
                    .map_or_else(|| self.default.clone(), |i| self.subsets_list[i].category.clone())
            })
            .collect();

        let mut result = experiment.clone();
        result.add_condition(&self.name, ColumnData::category(levels, &labels))?;
        result.push_history(format!("category:{}", self.name));
        Ok(result)
    }

    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String {
        let subsets: std::collections::BTreeMap<String, String> = self
            .subsets_list
            .iter()
            .map(|rule| (rule.query(), rule.category.clone()))
            .collect();
        let call = PyCall::new("flow.CategoryOp")
            .arg("name", &self.name)
            .arg("subsets", &subsets)
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

#[derive(Serialize, Deserialize)]
struct CategoryDoc {
    #[serde(default)]
    name: String,
    #[serde(default)]
    subsets_list: YamlValue,
    #[serde(default = "unknown")]
    default: String,
}

#[derive(Serialize, Deserialize)]
struct RuleDoc {
    #[serde(default)]
    subset_list: YamlValue,
    #[serde(default)]
    category: String,
}

fn unknown() -> String {
    "Unknown".to_string()
}

pub(super) fn register(registry: &mut Registry) {
    registry.register_dumper::<CategoryRule, _>("categoryop-subset", 1, |rule, ctx| {
        encode(&RuleDoc {
            subset_list: ctx.dump_seq(rule.subset_list.iter().map(Subset::as_any))?,
            category: rule.category.clone(),
        })
    });
    registry.register_loader("categoryop-subset", VersionMatch::Exact(1), |value, ctx| {
        let doc: RuleDoc = decode("categoryop-subset", value)?;
        Ok(CategoryRule {
            subset_list: ctx.load_seq(doc.subset_list)?,
            category: doc.category,
        })
    });

    registry.register_dumper::<CategoryOp, _>("category", 1, |op, ctx| {
        encode(&CategoryDoc {
            name: op.name.clone(),
            subsets_list: ctx.dump_seq(op.subsets_list.iter().map(|r| r as &dyn Any))?,
            default: op.default.clone(),
        })
    });
    registry.register_loader("category", VersionMatch::Exact(1), |value, ctx| {
        let doc: CategoryDoc = decode("category", value)?;
        let op: Box<dyn WorkflowOperation> = Box::new(CategoryOp {
            name: doc.name,
            subsets_list: ctx.load_seq(doc.subsets_list)?,
            default: doc.default,
            changes: ChangeQueue::default(),
        });
        Ok(op)
    });
}
