//! Grouped summary statistics of one channel.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::any::Any;
use std::fmt;
use std::str::FromStr;

use super::{
    eq_concrete, is_identifier, param, replace, require_experiment, ChangeQueue, FieldRole,
    FieldSpec, Warnings, WorkflowOperation,
};
use crate::error::{OpError, ParamError};
use crate::experiment::{subset_query, Experiment, Statistic, Subset, Value};
use crate::notebook::{operation_code, PyCall};
use crate::serialization::{decode, encode, Registry, VersionMatch};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldRole::Apply),
    FieldSpec::new("channel", FieldRole::Apply),
    FieldSpec::new("statistic_name", FieldRole::Apply),
    FieldSpec::new("by", FieldRole::Apply),
    FieldSpec::new("subset_list", FieldRole::Apply),
];

/// Summary functions, named the way documents name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticFunction {
    Count,
    Mean,
    GeomMean,
    Median,
    StdDev,
}

impl StatisticFunction {
    pub const ALL: [StatisticFunction; 5] = [
        StatisticFunction::Count,
        StatisticFunction::Mean,
        StatisticFunction::GeomMean,
        StatisticFunction::Median,
        StatisticFunction::StdDev,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatisticFunction::Count => "Count",
            StatisticFunction::Mean => "Mean",
            StatisticFunction::GeomMean => "Geom.Mean",
            StatisticFunction::Median => "Median",
            StatisticFunction::StdDev => "Std.Dev",
        }
    }

    /// The Python callable and the import it needs.
    fn py_function(self) -> (&'static str, Option<&'static str>) {
        match self {
            StatisticFunction::Count => ("len", None),
            StatisticFunction::Mean => ("mean", Some("from numpy import mean")),
            StatisticFunction::GeomMean => ("geom_mean", Some("from cytoflow.utility import geom_mean")),
            StatisticFunction::Median => ("median", Some("from numpy import median")),
            StatisticFunction::StdDev => ("std", Some("from numpy import std")),
        }
    }

    /// Summarize `values`. Empty input yields NaN except for `Count`.
    pub fn compute(self, values: &[f64]) -> f64 {
        let n = values.len() as f64;
        let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
        match self {
            StatisticFunction::Count => n,
            _ if values.is_empty() => f64::NAN,
            StatisticFunction::Mean => mean(values),
            StatisticFunction::GeomMean => {
                if values.iter().any(|&v| v <= 0.0) {
                    return f64::NAN;
                }
                (values.iter().map(|v| v.ln()).sum::<f64>() / n).exp()
            }
            StatisticFunction::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            StatisticFunction::StdDev => {
                let m = mean(values);
                (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n).sqrt()
            }
        }
    }
}

impl fmt::Display for StatisticFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatisticFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("Unknown summary function {s}"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatisticOp {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub channel: String,
    /// One of the [`StatisticFunction`] names.
    #[serde(default)]
    pub statistic_name: String,
    #[serde(default)]
    pub by: Vec<String>,
    #[serde(skip)]
    pub subset_list: Vec<Subset>,
    #[serde(skip)]
    changes: ChangeQueue,
}

impl ChannelStatisticOp {
    pub fn new(
        name: impl Into<String>,
        channel: impl Into<String>,
        function: StatisticFunction,
        by: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            channel: channel.into(),
            statistic_name: function.as_str().to_string(),
            by,
            ..Self::default()
        }
    }

    fn function(&self) -> Result<StatisticFunction, OpError> {
        if self.statistic_name.is_empty() {
            return Err(OpError::new("statistic_name", "Summary function isn't set"));
        }
        self.statistic_name
            .parse()
            .map_err(|e: String| OpError::new("statistic_name", e))
    }
}

/// Every combination of the given level values, in lexicographic order.
fn product(levels: &[Vec<Value>]) -> Vec<Vec<Value>> {
    levels.iter().fold(vec![Vec::new()], |keys, level| {
        keys.iter()
            .flat_map(|key| {
                level.iter().map(move |value| {
                    let mut next = key.clone();
                    next.push(value.clone());
                    next
                })
            })
            .collect()
    })
}

impl WorkflowOperation for ChannelStatisticOp {
    fn id(&self) -> &'static str {
        "channel-statistic"
    }

    fn friendly_id(&self) -> &'static str {
        "Channel Statistic"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn changed_fields(&self, before: &dyn WorkflowOperation) -> Vec<&'static str> {
        changed_fields!(self, before, [name, channel, statistic_name, by, subset_list])
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "name" => replace(&mut self.name, param(field, value)?),
            "channel" => replace(&mut self.channel, param(field, value)?),
            "statistic_name" => replace(&mut self.statistic_name, param(field, value)?),
            "by" => replace(&mut self.by, param(field, value)?),
            "subset_list" => replace(&mut self.subset_list, param(field, value)?),
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
        warnings: &mut Warnings,
    ) -> Result<Experiment, OpError> {
        let experiment = require_experiment(experiment)?;
        if self.name.is_empty() {
            return Err(OpError::new("name", "Must specify a name"));
        }
        if !is_identifier(&self.name) {
            return Err(OpError::new(
                "name",
                "Name can only contain letters, numbers and underscores.",
            ));
        }
        let function = self.function()?;
        if self.channel.is_empty() {
            return Err(OpError::new("channel", "Must specify a channel"));
        }
        let values = experiment.channel(&self.channel).map_err(|_| {
            OpError::new(
                "channel",
                format!("Channel {} not found in the experiment", self.channel),
            )
        })?;
        if self.by.is_empty() {
            return Err(OpError::new(
                "by",
                "Must specify some grouping conditions in 'by'",
            ));
        }
        let key = (self.name.clone(), self.statistic_name.clone());
        if experiment.statistic(&key).is_some() {
            return Err(OpError::new(
                "name",
                format!("{key:?} is already in the experiment's statistics"),
            ));
        }

        let mask = experiment
            .query(&self.subset_list)
            .map_err(|e| OpError::new("subset_list", e.to_string()))?;
        if !mask.iter().any(|&m| m) {
            return Err(OpError::new(
                "subset_list",
                format!(
                    "Subset string '{}' returned no events",
                    subset_query(&self.subset_list)
                ),
            ));
        }

        let mut levels = Vec::with_capacity(self.by.len());
        for b in &self.by {
            if experiment.is_channel(b) || !experiment.has_column(b) {
                return Err(OpError::new(
                    "by",
                    format!("Aggregation metadata {b} not found"),
                ));
            }
            let unique = experiment.unique_values(b)?;
            if unique.len() == 1 {
                warnings.warn(Some("by"), format!("Only one category for {b}"));
            }
            levels.push(unique);
        }

        let groups = experiment.group_by(&self.by, Some(&mask))?;
        let mut statistic = Statistic::new(self.by.clone());
        for key in product(&levels) {
            let group = groups.iter().find(|g| g.key == key);
            let value = match group {
                Some(group) => {
                    let data: Vec<f64> = group.rows.iter().map(|&r| values[r]).collect();
                    function.compute(&data)
                }
                None => {
                    warnings.warn(None, format!("Group {key:?} had no data"));
                    0.0
                }
            };
            if value.is_nan() {
                warnings.warn(None, format!("Found NaN in category {key:?}"));
            }
            statistic.rows.push((key, value));
        }

        let mut result = experiment.clone();
        result.add_statistic(key, statistic)?;
        result.push_history(format!("channel-statistic:{}", self.name));
        Ok(result)
    }

    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String {
        let subset = subset_query(&self.subset_list);
        let (callable, import) = self
            .statistic_name
            .parse::<StatisticFunction>()
            .map(StatisticFunction::py_function)
            .unwrap_or(("None", None));
        let call = PyCall::new("flow.ChannelStatisticOp")
            .arg("name", &self.name)
            .arg("channel", &self.channel)
            .raw("function", callable)
            .arg("statistic_name", &self.statistic_name)
            .arg("by", &self.by)
            .arg_unless("subset", subset.as_str(), "");
        let code = operation_code(idx, prev_idx, &call, None);
        match import {
            Some(import) => format!("{import}\n{code}"),
            None => code,
        }
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
struct ChannelStatisticDoc {
    #[serde(default)]
    name: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    statistic_name: String,
    #[serde(default)]
    by: Vec<String>,
    #[serde(default)]
    subset_list: YamlValue,
}

pub(super) fn register(registry: &mut Registry) {
    registry.register_dumper::<ChannelStatisticOp, _>("channel-statistic", 1, |op, _| encode(op));
    registry.register_dumper::<ChannelStatisticOp, _>("channel-statistic", 2, |op, ctx| {
        encode(&ChannelStatisticDoc {
            name: op.name.clone(),
            channel: op.channel.clone(),
            statistic_name: op.statistic_name.clone(),
            by: op.by.clone(),
            subset_list: ctx.dump_seq(op.subset_list.iter().map(Subset::as_any))?,
        })
    });
    // v1 documents have no subset list and decode with an empty one.
    registry.register_loader("channel-statistic", VersionMatch::Any, |value, ctx| {
        let doc: ChannelStatisticDoc = decode("channel-statistic", value)?;
        let op: Box<dyn WorkflowOperation> = Box::new(ChannelStatisticOp {
            name: doc.name,
            channel: doc.channel,
            statistic_name: doc.statistic_name,
            by: doc.by,
            subset_list: ctx.load_seq(doc.subset_list)?,
            changes: ChangeQueue::default(),
        });
        Ok(op)
    });
}
