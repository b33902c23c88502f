use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::any::Any;

use super::{
    bin_counts, bin_edges, eq_concrete, plot_name_arg, FacetGrid, Figure, Layer, Panel,
    WorkflowView,
};
use crate::error::{ParamError, ViewError};
use crate::experiment::{subset_query, Experiment, Scale, Subset};
use crate::notebook::PyCall;
use crate::operations::{param, replace, ChangeQueue, Warnings, WorkflowOperation};
use crate::serialization::{decode, encode, Registry, VersionMatch};

pub(super) const ID: &str = "histogram";

/// Plot parameters for one-dimensional histograms.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistogramParams {
    #[serde(default)]
    pub title: Option<String>,
    /// Bin count; chosen from the event count when unset.
    #[serde(default)]
    pub num_bins: Option<usize>,
    #[serde(default = "default_histtype")]
    pub histtype: String,
    #[serde(default)]
    pub density: bool,
    #[serde(default)]
    pub linewidth: Option<f64>,
}

fn default_histtype() -> String {
    "stepfilled".to_string()
}

impl Default for HistogramParams {
    fn default() -> Self {
        Self {
            title: None,
            num_bins: None,
            histtype: default_histtype(),
            density: false,
            linewidth: None,
        }
    }
}

/// Everything a histogram needs, borrowed from whichever view draws it.
pub struct HistogramSpec<'s> {
    pub channel: &'s str,
    pub scale: Scale,
    pub huefacet: &'s str,
    pub plotfacet: &'s str,
    pub current_plot: Option<&'s str>,
    pub subset_list: &'s [Subset],
    pub params: &'s HistogramParams,
}

/// Bin one channel, one layer per `huefacet` value.
pub fn render_histogram(experiment: &Experiment, spec: &HistogramSpec<'_>) -> Result<Figure, ViewError> {
    let mut grid = FacetGrid::new(experiment, spec.subset_list)?;
    let plot = grid.select_plot(spec.plotfacet, spec.current_plot)?;
    let scaled = grid.scaled("channel", spec.channel, spec.scale)?;
    let selected: Vec<f64> = grid.rows().iter().map(|&r| scaled[r]).collect();
    let edges = bin_edges(&selected, spec.params.num_bins);

    let layers = grid
        .hue_groups(spec.huefacet)?
        .into_iter()
        .map(|(label, rows)| Layer::Histogram {
            label,
            counts: bin_counts(rows.iter().map(|&r| scaled[r]), &edges),
            edges: edges.clone(),
        })
        .collect();

    let mut figure = Figure::new(spec.channel, "Count");
    figure.xscale = spec.scale;
    figure.title = spec.params.title.clone().or_else(|| plot.clone());
    figure.panels.push(Panel {
        label: plot,
        layers,
    });
    Ok(figure)
}

/// A histogram of one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramView {
    pub channel: String,
    pub scale: Scale,
    pub huefacet: String,
    pub plotfacet: String,
    pub subset_list: Vec<Subset>,
    pub plot_params: HistogramParams,
    pub current_plot: Option<String>,
    changes: ChangeQueue,
}

impl HistogramView {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    pub fn set_channel(&mut self, channel: impl Into<String>) {
        if replace(&mut self.channel, channel.into()) {
            self.changes.view_field(ID, "channel");
        }
    }

    pub fn set_scale(&mut self, scale: Scale) {
        if replace(&mut self.scale, scale) {
            self.changes.view_field(ID, "scale");
        }
    }

    pub fn set_huefacet(&mut self, huefacet: impl Into<String>) {
        if replace(&mut self.huefacet, huefacet.into()) {
            self.changes.view_field(ID, "huefacet");
        }
    }
}

impl WorkflowView for HistogramView {
    fn id(&self) -> &'static str {
        ID
    }

    fn friendly_id(&self) -> &'static str {
        "Histogram"
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "channel" => replace(&mut self.channel, param(field, value)?),
            "scale" => replace(&mut self.scale, param(field, value)?),
            "huefacet" => replace(&mut self.huefacet, param(field, value)?),
            "plotfacet" => replace(&mut self.plotfacet, param(field, value)?),
            "plot_params" => replace(&mut self.plot_params, param(field, value)?),
            "current_plot" => replace(&mut self.current_plot, param(field, value)?),
            _ => return Err(ParamError::UnknownField(field.to_string())),
        };
        if changed {
            self.changes.view_field(ID, field);
        }
        Ok(())
    }

    fn changes(&mut self) -> &mut ChangeQueue {
        &mut self.changes
    }

    fn plot_facet(&self) -> Option<&str> {
        Some(self.plotfacet.as_str()).filter(|f| !f.is_empty())
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
        _operation: &dyn WorkflowOperation,
        _warnings: &mut Warnings,
    ) -> Result<Figure, ViewError> {
        render_histogram(
            experiment,
            &HistogramSpec {
                channel: &self.channel,
                scale: self.scale,
                huefacet: &self.huefacet,
                plotfacet: &self.plotfacet,
                current_plot: self.current_plot.as_deref(),
                subset_list: &self.subset_list,
                params: &self.plot_params,
            },
        )
    }

    fn notebook_code(&self, idx: usize, _prev_idx: Option<usize>) -> String {
        let subset = subset_query(&self.subset_list);
        let call = PyCall::new("flow.HistogramView")
            .arg("channel", &self.channel)
            .arg_unless("scale", &self.scale, &Scale::Linear)
            .arg_unless("huefacet", self.huefacet.as_str(), "")
            .arg_unless("subset", subset.as_str(), "");
        format!(
            "{}.plot(ex_{idx}{})",
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
        eq_concrete(self, other)
    }
}

#[derive(Serialize, Deserialize)]
struct HistogramDoc {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    scale: Scale,
    #[serde(default)]
    huefacet: String,
    #[serde(default)]
    plotfacet: String,
    #[serde(default)]
    subset_list: YamlValue,
    #[serde(default)]
    plot_params: HistogramParams,
    #[serde(default)]
    current_plot: Option<String>,
}

pub(super) fn register(registry: &mut Registry) {
    registry.register_dumper::<HistogramView, _>("histogram", 1, |view, ctx| {
        encode(&HistogramDoc {
            channel: view.channel.clone(),
            scale: view.scale,
            huefacet: view.huefacet.clone(),
            plotfacet: view.plotfacet.clone(),
            subset_list: ctx.dump_seq(view.subset_list.iter().map(Subset::as_any))?,
            plot_params: view.plot_params.clone(),
            current_plot: view.current_plot.clone(),
        })
    });
    registry.register_loader("histogram", VersionMatch::Exact(1), |value, ctx| {
        let doc: HistogramDoc = decode("histogram", value)?;
        let view: Box<dyn WorkflowView> = Box::new(HistogramView {
            channel: doc.channel,
            scale: doc.scale,
            huefacet: doc.huefacet,
            plotfacet: doc.plotfacet,
            subset_list: ctx.load_seq(doc.subset_list)?,
            plot_params: doc.plot_params,
            current_plot: doc.current_plot,
            changes: ChangeQueue::default(),
        });
        Ok(view)
    });
}
