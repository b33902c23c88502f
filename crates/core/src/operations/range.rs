//! Range gate: a boolean condition that is true where a channel lies in an
//! inclusive interval.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::any::Any;

use super::{
    eq_concrete, param, replace, require_experiment, validate_new_column, ChangeQueue, FieldRole,
    FieldSpec, Transient, Warnings, WorkflowOperation,
};
use crate::error::{OpError, ParamError, ViewError};
use crate::experiment::{subset_query, ColumnData, Experiment, Scale, Subset};
use crate::notebook::{operation_code, PyCall};
use crate::serialization::{decode, encode, Registry, VersionMatch};
use crate::views::{
    render_histogram, Annotation, Figure, HistogramParams, HistogramSpec, Selection, WorkflowView,
};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldRole::Apply),
    FieldSpec::new("channel", FieldRole::Apply),
    FieldSpec::new("low", FieldRole::Apply),
    FieldSpec::new("high", FieldRole::Apply),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeOp {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub low: f64,
    #[serde(default)]
    pub high: f64,
    #[serde(skip)]
    changes: ChangeQueue,
}

impl RangeOp {
    pub fn new(name: impl Into<String>, channel: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            channel: channel.into(),
            low,
            high,
            changes: ChangeQueue::default(),
        }
    }

    pub fn set_bounds(&mut self, low: f64, high: f64) {
        if replace(&mut self.low, low) {
            self.changes.field(FIELDS, "low");
        }
        if replace(&mut self.high, high) {
            self.changes.field(FIELDS, "high");
        }
    }
}

impl WorkflowOperation for RangeOp {
    fn id(&self) -> &'static str {
        "range"
    }

    fn friendly_id(&self) -> &'static str {
        "Range"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn changed_fields(&self, before: &dyn WorkflowOperation) -> Vec<&'static str> {
        changed_fields!(self, before, [name, channel, low, high])
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "name" => replace(&mut self.name, param(field, value)?),
            "channel" => replace(&mut self.channel, param(field, value)?),
            "low" => replace(&mut self.low, param(field, value)?),
            "high" => replace(&mut self.high, param(field, value)?),
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
        if self.channel.is_empty() {
            return Err(OpError::new("channel", "Must specify a channel"));
        }
        let values = experiment.channel(&self.channel).map_err(|_| {
            OpError::new(
                "channel",
                format!("{} isn't a channel in the experiment", self.channel),
            )
        })?;

        if self.high <= self.low {
            return Err(OpError::new("high", "range high must be > range low"));
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if self.high <= min {
            return Err(OpError::new("high", format!("range high must be > {min}")));
        }
        if self.low >= max {
            return Err(OpError::new("low", format!("range low must be < {max}")));
        }

        let gate: Vec<bool> = values
            .iter()
            .map(|&v| v >= self.low && v <= self.high)
            .collect();
        let mut result = experiment.clone();
        result.add_condition(&self.name, ColumnData::Bool(gate))?;
        result.push_history(format!("range:{}", self.name));
        Ok(result)
    }

    fn default_view(&self) -> Option<Box<dyn WorkflowView>> {
        Some(Box::new(RangeSelectionView::default()))
    }

    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String {
        let call = PyCall::new("flow.RangeOp")
            .arg("name", &self.name)
            .arg("channel", &self.channel)
            .arg("low", &self.low)
            .arg("high", &self.high);
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

const VIEW_ID: &str = "range-selection";

/// Histogram of the upstream result with the range shaded.
/// Dragging across the plot sets both bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeSelectionView {
    pub scale: Scale,
    pub huefacet: String,
    pub subset_list: Vec<Subset>,
    pub plot_params: HistogramParams,
    interactive: Transient<bool>,
    changes: ChangeQueue,
}

impl WorkflowView for RangeSelectionView {
    fn id(&self) -> &'static str {
        VIEW_ID
    }

    fn friendly_id(&self) -> &'static str {
        "Range Setting"
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "scale" => replace(&mut self.scale, param(field, value)?),
            "huefacet" => replace(&mut self.huefacet, param(field, value)?),
            "plot_params" => replace(&mut self.plot_params, param(field, value)?),
            _ => return Err(ParamError::UnknownField(field.to_string())),
        };
        if changed {
            self.changes.view_field(VIEW_ID, field);
        }
        Ok(())
    }

    fn changes(&mut self) -> &mut ChangeQueue {
        &mut self.changes
    }

    fn plots_previous_result(&self) -> bool {
        true
    }

    fn plot(
        &self,
        experiment: &Experiment,
        operation: &dyn WorkflowOperation,
        _warnings: &mut Warnings,
    ) -> Result<Figure, ViewError> {
        let op = operation
            .as_any()
            .downcast_ref::<RangeOp>()
            .ok_or_else(|| ViewError::general("Range view needs a range operation"))?;
        let mut figure = render_histogram(
            experiment,
            &HistogramSpec {
                channel: &op.channel,
                scale: self.scale,
                huefacet: &self.huefacet,
                plotfacet: "",
                current_plot: None,
                subset_list: &self.subset_list,
                params: &self.plot_params,
            },
        )?;
        figure.annotations.push(Annotation::Span {
            low: op.low,
            high: op.high,
        });
        Ok(figure)
    }

    fn is_interactive(&self) -> bool {
        self.interactive.0
    }

    fn set_interactive(&mut self, interactive: bool) {
        self.interactive.0 = interactive;
    }

    fn selection_params(&self, selection: &Selection) -> Option<Vec<(&'static str, JsonValue)>> {
        match selection {
            Selection::Span { low, high } if self.interactive.0 => Some(vec![
                ("low", JsonValue::from(*low)),
                ("high", JsonValue::from(*high)),
            ]),
            _ => None,
        }
    }

    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String {
        let subset = subset_query(&self.subset_list);
        let call = PyCall::new(format!("op_{idx}.default_view"))
            .arg_unless("scale", &self.scale, &Scale::Linear)
            .arg_unless("huefacet", self.huefacet.as_str(), "")
            .arg_unless("subset", subset.as_str(), "");
        let input = prev_idx.map(|p| format!("ex_{p}")).unwrap_or_default();
        format!("{}.plot({input})", call.render())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn WorkflowView> {
        Box::new(self.clone())
    }

    fn eq_dyn(&self, other: &dyn WorkflowView) -> bool {
        crate::views::eq_concrete(self, other)
    }
}

#[derive(Serialize, Deserialize)]
struct RangeViewDoc {
    #[serde(default)]
    scale: Scale,
    #[serde(default)]
    huefacet: String,
    #[serde(default)]
    subset_list: YamlValue,
    #[serde(default)]
    plot_params: HistogramParams,
}

pub(super) fn register(registry: &mut Registry) {
    registry.register_dumper::<RangeOp, _>("range", 1, |op, _| encode(op));
    registry.register_loader("range", VersionMatch::Exact(1), |value, _| {
        let op: Box<dyn WorkflowOperation> = Box::new(decode::<RangeOp>("range", value)?);
        Ok(op)
    });

    registry.register_dumper::<RangeSelectionView, _>("range-view", 1, |view, ctx| {
        encode(&RangeViewDoc {
            scale: view.scale,
            huefacet: view.huefacet.clone(),
            subset_list: ctx.dump_seq(view.subset_list.iter().map(Subset::as_any))?,
            plot_params: view.plot_params.clone(),
        })
    });
    registry.register_loader("range-view", VersionMatch::Exact(1), |value, ctx| {
        let doc: RangeViewDoc = decode("range-view", value)?;
        let view: Box<dyn WorkflowView> = Box::new(RangeSelectionView {
            scale: doc.scale,
            huefacet: doc.huefacet,
            subset_list: ctx.load_seq(doc.subset_list)?,
            plot_params: doc.plot_params,
            ..RangeSelectionView::default()
        });
        Ok(view)
    });
}
