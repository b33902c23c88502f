//! Threshold gate: a boolean condition that is true where a channel is
//! strictly above a cut value.

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
    plot_name_arg, render_histogram, Annotation, Figure, HistogramParams, HistogramSpec,
    Selection, WorkflowView,
};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldRole::Apply),
    FieldSpec::new("channel", FieldRole::Apply),
    FieldSpec::new("threshold", FieldRole::Apply),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOp {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub threshold: f64,
    #[serde(skip)]
    changes: ChangeQueue,
}

impl ThresholdOp {
    pub fn new(name: impl Into<String>, channel: impl Into<String>, threshold: f64) -> Self {
        Self {
            name: name.into(),
            channel: channel.into(),
            threshold,
            changes: ChangeQueue::default(),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        if replace(&mut self.name, name.into()) {
            self.changes.field(FIELDS, "name");
        }
    }

    pub fn set_channel(&mut self, channel: impl Into<String>) {
        if replace(&mut self.channel, channel.into()) {
            self.changes.field(FIELDS, "channel");
        }
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        if replace(&mut self.threshold, threshold) {
            self.changes.field(FIELDS, "threshold");
        }
    }
}

impl WorkflowOperation for ThresholdOp {
    fn id(&self) -> &'static str {
        "threshold"
    }

    fn friendly_id(&self) -> &'static str {
        "Threshold"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn changed_fields(&self, before: &dyn WorkflowOperation) -> Vec<&'static str> {
        changed_fields!(self, before, [name, channel, threshold])
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        match field {
            "name" => self.set_name(param::<String>(field, value)?),
            "channel" => self.set_channel(param::<String>(field, value)?),
            "threshold" => self.set_threshold(param(field, value)?),
            _ => return Err(ParamError::UnknownField(field.to_string())),
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

        let gate: Vec<bool> = values.iter().map(|&v| v > self.threshold).collect();
        let mut result = experiment.clone();
        result.add_condition(&self.name, ColumnData::Bool(gate))?;
        result.push_history(format!("threshold:{}", self.name));
        Ok(result)
    }

    fn default_view(&self) -> Option<Box<dyn WorkflowView>> {
        Some(Box::new(ThresholdSelectionView::default()))
    }

    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String {
        let call = PyCall::new("flow.ThresholdOp")
            .arg("name", &self.name)
            .arg("channel", &self.channel)
            .arg("threshold", &self.threshold);
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

const VIEW_ID: &str = "threshold-selection";

/// Histogram of the upstream result with the threshold drawn on it.
/// Clicking the plot moves the threshold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdSelectionView {
    pub scale: Scale,
    pub huefacet: String,
    pub subset_list: Vec<Subset>,
    pub plot_params: HistogramParams,
    pub current_plot: Option<String>,
    interactive: Transient<bool>,
    changes: ChangeQueue,
}

impl WorkflowView for ThresholdSelectionView {
    fn id(&self) -> &'static str {
        VIEW_ID
    }

    fn friendly_id(&self) -> &'static str {
        "Threshold Setting"
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "scale" => replace(&mut self.scale, param(field, value)?),
            "huefacet" => replace(&mut self.huefacet, param(field, value)?),
            "plot_params" => replace(&mut self.plot_params, param(field, value)?),
            "current_plot" => replace(&mut self.current_plot, param(field, value)?),
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

    fn current_plot(&self) -> Option<&str> {
        self.current_plot.as_deref()
    }

    fn set_current_plot(&mut self, plot: Option<String>) {
        self.current_plot = plot;
    }

    fn plot(
        &self,
        experiment: &Experiment,
        operation: &dyn WorkflowOperation,
        _warnings: &mut Warnings,
    ) -> Result<Figure, ViewError> {
        let op = operation
            .as_any()
            .downcast_ref::<ThresholdOp>()
            .ok_or_else(|| ViewError::general("Threshold view needs a threshold operation"))?;
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
        figure.annotations.push(Annotation::Threshold { x: op.threshold });
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
            Selection::Point { x } if self.interactive.0 => {
                Some(vec![("threshold", JsonValue::from(*x))])
            }
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
        format!(
            "{}.plot({input}{})",
            call.render(),
            plot_name_arg(self.current_plot.as_deref())
        )
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
struct ThresholdViewV1 {
    #[serde(default)]
    scale: Scale,
    #[serde(default)]
    huefacet: String,
    #[serde(default)]
    subset_list: YamlValue,
}

#[derive(Serialize, Deserialize)]
struct ThresholdViewV2 {
    #[serde(default)]
    scale: Scale,
    #[serde(default)]
    huefacet: String,
    #[serde(default)]
    subset_list: YamlValue,
    #[serde(default)]
    plot_params: HistogramParams,
    #[serde(default)]
    current_plot: Option<String>,
}

pub(super) fn register(registry: &mut Registry) {
    registry.register_dumper::<ThresholdOp, _>("threshold", 1, |op, _| encode(op));
    registry.register_loader("threshold", VersionMatch::Exact(1), |value, _| {
        let op: Box<dyn WorkflowOperation> = Box::new(decode::<ThresholdOp>("threshold", value)?);
        Ok(op)
    });

    registry.register_dumper::<ThresholdSelectionView, _>("threshold-view", 1, |view, ctx| {
        encode(&ThresholdViewV1 {
            scale: view.scale,
            huefacet: view.huefacet.clone(),
            subset_list: ctx.dump_seq(view.subset_list.iter().map(Subset::as_any))?,
        })
    });
    registry.register_dumper::<ThresholdSelectionView, _>("threshold-view", 2, |view, ctx| {
        encode(&ThresholdViewV2 {
            scale: view.scale,
            huefacet: view.huefacet.clone(),
            subset_list: ctx.dump_seq(view.subset_list.iter().map(Subset::as_any))?,
            plot_params: view.plot_params.clone(),
            current_plot: view.current_plot.clone(),
        })
    });
    // v1 documents simply lack the newer fields, so every version decodes
    // through the v2 shape.
    registry.register_loader("threshold-view", VersionMatch::Any, |value, ctx| {
        let doc: ThresholdViewV2 = decode("threshold-view", value)?;
        let view: Box<dyn WorkflowView> = Box::new(ThresholdSelectionView {
            scale: doc.scale,
            huefacet: doc.huefacet,
            subset_list: ctx.load_seq(doc.subset_list)?,
            plot_params: doc.plot_params,
            current_plot: doc.current_plot,
            ..ThresholdSelectionView::default()
        });
        Ok(view)
    });
}
