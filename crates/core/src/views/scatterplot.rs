use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::any::Any;

use super::{eq_concrete, plot_name_arg, FacetGrid, Figure, Layer, Panel, WorkflowView};
use crate::error::{ParamError, ViewError};
use crate::experiment::{subset_query, Experiment, Scale, Subset};
use crate::notebook::PyCall;
use crate::operations::{param, replace, ChangeQueue, Warnings, WorkflowOperation};
use crate::serialization::{decode, encode, Registry, VersionMatch};

pub(super) const ID: &str = "scatterplot";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScatterplotParams {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Marker size.
    #[serde(default = "default_size")]
    pub s: f64,
    #[serde(default = "default_marker")]
    pub marker: String,
}

fn default_alpha() -> f64 {
    0.25
}

fn default_size() -> f64 {
    2.0
}

fn default_marker() -> String {
    "o".to_string()
}

impl Default for ScatterplotParams {
    fn default() -> Self {
        Self {
            title: None,
            alpha: default_alpha(),
            s: default_size(),
            marker: default_marker(),
        }
    }
}

pub struct ScatterSpec<'s> {
    pub xchannel: &'s str,
    pub ychannel: &'s str,
    pub xscale: Scale,
    pub yscale: Scale,
    pub huefacet: &'s str,
    pub plotfacet: &'s str,
    pub current_plot: Option<&'s str>,
    pub subset_list: &'s [Subset],
    pub params: &'s ScatterplotParams,
}

/// Scaled x/y points, one layer per `huefacet` value.
pub fn render_scatter(experiment: &Experiment, spec: &ScatterSpec<'_>) -> Result<Figure, ViewError> {
    let mut grid = FacetGrid::new(experiment, spec.subset_list)?;
    let plot = grid.select_plot(spec.plotfacet, spec.current_plot)?;
    let x = grid.scaled("xchannel", spec.xchannel, spec.xscale)?;
    let y = grid.scaled("ychannel", spec.ychannel, spec.yscale)?;

    let layers = grid
        .hue_groups(spec.huefacet)?
        .into_iter()
        .map(|(label, rows)| Layer::Points {
            label,
            x: rows.iter().map(|&r| x[r]).collect(),
            y: rows.iter().map(|&r| y[r]).collect(),
        })
        .collect();

    let mut figure = Figure::new(spec.xchannel, spec.ychannel);
    figure.xscale = spec.xscale;
    figure.yscale = spec.yscale;
    figure.title = spec.params.title.clone().or_else(|| plot.clone());
    figure.panels.push(Panel {
        label: plot,
        layers,
    });
    Ok(figure)
}

/// A two-channel scatter plot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScatterplotView {
    pub xchannel: String,
    pub ychannel: String,
    pub xscale: Scale,
    pub yscale: Scale,
    pub huefacet: String,
    pub plotfacet: String,
    pub subset_list: Vec<Subset>,
    pub plot_params: ScatterplotParams,
    pub current_plot: Option<String>,
    changes: ChangeQueue,
}

impl ScatterplotView {
    pub fn new(xchannel: impl Into<String>, ychannel: impl Into<String>) -> Self {
        Self {
            xchannel: xchannel.into(),
            ychannel: ychannel.into(),
            ..Self::default()
        }
    }
}

impl WorkflowView for ScatterplotView {
    fn id(&self) -> &'static str {
        ID
    }

    fn friendly_id(&self) -> &'static str {
        "Scatterplot"
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "xchannel" => replace(&mut self.xchannel, param(field, value)?),
            "ychannel" => replace(&mut self.ychannel, param(field, value)?),
            "xscale" => replace(&mut self.xscale, param(field, value)?),
            "yscale" => replace(&mut self.yscale, param(field, value)?),
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
        render_scatter(
            experiment,
            &ScatterSpec {
                xchannel: &self.xchannel,
                ychannel: &self.ychannel,
                xscale: self.xscale,
                yscale: self.yscale,
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
        let call = PyCall::new("flow.ScatterplotView")
            .arg("xchannel", &self.xchannel)
            .arg("ychannel", &self.ychannel)
            .arg_unless("xscale", &self.xscale, &Scale::Linear)
            .arg_unless("yscale", &self.yscale, &Scale::Linear)
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
struct ScatterplotDoc {
    #[serde(default)]
    xchannel: String,
    #[serde(default)]
    ychannel: String,
    #[serde(default)]
    xscale: Scale,
    #[serde(default)]
    yscale: Scale,
    #[serde(default)]
    huefacet: String,
    #[serde(default)]
    plotfacet: String,
    #[serde(default)]
    subset_list: YamlValue,
    #[serde(default)]
    plot_params: ScatterplotParams,
    #[serde(default)]
    current_plot: Option<String>,
}

pub(super) fn register(registry: &mut Registry) {
    registry.register_dumper::<ScatterplotView, _>("scatterplot", 1, |view, ctx| {
        encode(&ScatterplotDoc {
            xchannel: view.xchannel.clone(),
            ychannel: view.ychannel.clone(),
            xscale: view.xscale,
            yscale: view.yscale,
            huefacet: view.huefacet.clone(),
            plotfacet: view.plotfacet.clone(),
            subset_list: ctx.dump_seq(view.subset_list.iter().map(Subset::as_any))?,
            plot_params: view.plot_params.clone(),
            current_plot: view.current_plot.clone(),
        })
    });
    registry.register_loader("scatterplot", VersionMatch::Exact(1), |value, ctx| {
        let doc: ScatterplotDoc = decode("scatterplot", value)?;
        let view: Box<dyn WorkflowView> = Box::new(ScatterplotView {
            xchannel: doc.xchannel,
            ychannel: doc.ychannel,
            xscale: doc.xscale,
            yscale: doc.yscale,
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
