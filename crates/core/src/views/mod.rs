//! Workflow views.
//!
//! A view turns an experiment (or a statistic inside it) into a [`Figure`].
//! Concrete views hold an explicit parameter struct and share the facet
//! layout through [`FacetGrid`] rather than a class hierarchy.
//!
//! Selection views (threshold, range, polygon, k-means) live next to their
//! operations and read the operation's parameters at plot time.

mod bar_chart;
mod facets;
mod figure;
mod histogram;
mod scatterplot;

pub use bar_chart::BarChartView;
pub use facets::{bin_counts, bin_edges, FacetGrid};
pub use figure::{Annotation, Figure, Layer, Panel};
pub use histogram::{render_histogram, HistogramParams, HistogramSpec, HistogramView};
pub use scatterplot::{render_scatter, ScatterSpec, ScatterplotParams, ScatterplotView};

use cf_protocol::{ChangePayload, Changed};
use serde_json::Value as JsonValue;
use std::any::Any;
use std::fmt::Debug;

use crate::error::{ParamError, ViewError};
use crate::experiment::Experiment;
use crate::operations::{ChangeQueue, Warnings, WorkflowOperation};
use crate::serialization::Registry;

pub const TRACING_TARGET: &str = "cf_core::views";

/// Interactive input from a plot, in data coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// A single position on the x axis.
    Point { x: f64 },
    /// An interval on the x axis.
    Span { low: f64, high: f64 },
    /// A closed polygon in the x/y plane.
    Polygon { vertices: Vec<(f64, f64)> },
}

/// A view as seen by the workflow.
pub trait WorkflowView: Debug + Send + Sync {
    /// Identifier, unique among the views of one item.
    fn id(&self) -> &'static str;

    fn friendly_id(&self) -> &'static str;

    /// Set a parameter from a JSON value, raising [`Changed::View`].
    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError>;

    fn changes(&mut self) -> &mut ChangeQueue;

    /// Should the item re-plot this view for this event?
    fn should_plot(&self, kind: Changed, _payload: &ChangePayload) -> bool {
        kind.is_actionable()
    }

    /// Selection views draw the upstream item's result instead of their own.
    fn plots_previous_result(&self) -> bool {
        false
    }

    /// The condition whose values split the data into separate plots.
    fn plot_facet(&self) -> Option<&str> {
        None
    }

    /// Names of the plots this view can show for `experiment`.
    fn enum_plots(
        &self,
        experiment: &Experiment,
        _operation: &dyn WorkflowOperation,
    ) -> Result<Vec<String>, ViewError> {
        match self.plot_facet() {
            Some(facet) => FacetGrid::plot_names(experiment, facet),
            None => Ok(Vec::new()),
        }
    }

    fn current_plot(&self) -> Option<&str> {
        None
    }

    /// Choose the plot to show. Not announced as a change.
    fn set_current_plot(&mut self, _plot: Option<String>) {}

    fn plot(
        &self,
        experiment: &Experiment,
        operation: &dyn WorkflowOperation,
        warnings: &mut Warnings,
    ) -> Result<Figure, ViewError>;

    fn is_interactive(&self) -> bool {
        false
    }

    fn set_interactive(&mut self, _interactive: bool) {}

    /// Operation parameter edits for an interactive selection, if this view
    /// accepts that kind of selection.
    fn selection_params(&self, _selection: &Selection) -> Option<Vec<(&'static str, JsonValue)>> {
        None
    }

    /// Notebook code plotting this view for the item at `idx`.
    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String;

    fn as_any(&self) -> &dyn Any;

    fn clone_box(&self) -> Box<dyn WorkflowView>;

    fn eq_dyn(&self, other: &dyn WorkflowView) -> bool;
}

impl Clone for Box<dyn WorkflowView> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl PartialEq for Box<dyn WorkflowView> {
    fn eq(&self, other: &Self) -> bool {
        self.eq_dyn(other.as_ref())
    }
}

pub(crate) fn eq_concrete<T: PartialEq + 'static>(this: &T, other: &dyn WorkflowView) -> bool {
    other
        .as_any()
        .downcast_ref::<T>()
        .is_some_and(|other| this == other)
}

/// Build a standalone view by its id.
pub fn view_by_id(id: &str) -> Option<Box<dyn WorkflowView>> {
    match id {
        histogram::ID => Some(Box::new(HistogramView::default())),
        scatterplot::ID => Some(Box::new(ScatterplotView::default())),
        bar_chart::ID => Some(Box::new(BarChartView::default())),
        _ => None,
    }
}

/// Trailing `, plot_name = ...` argument for a view's plot call.
pub(crate) fn plot_name_arg(current_plot: Option<&str>) -> String {
    use crate::notebook::PyRepr;
    current_plot
        .map(|p| format!(", plot_name = {}", p.py_repr()))
        .unwrap_or_default()
}

pub(crate) fn register(registry: &mut Registry) {
    histogram::register(registry);
    scatterplot::register(registry);
    bar_chart::register(registry);
}
