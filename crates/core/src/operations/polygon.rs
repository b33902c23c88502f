//! Polygon gate over two channels.

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
    render_scatter, Annotation, Figure, ScatterSpec, ScatterplotParams, Selection, WorkflowView,
};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldRole::Apply),
    FieldSpec::new("xchannel", FieldRole::Apply),
    FieldSpec::new("ychannel", FieldRole::Apply),
    FieldSpec::new("vertices", FieldRole::Apply),
    FieldSpec::new("xscale", FieldRole::Apply),
    FieldSpec::new("yscale", FieldRole::Apply),
];

/// Events inside the polygon get `true`. Containment is tested in scaled
/// space, so a polygon drawn on a log plot gates what the user saw.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolygonOp {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub xchannel: String,
    #[serde(default)]
    pub ychannel: String,
    #[serde(default)]
    pub vertices: Vec<(f64, f64)>,
    #[serde(default)]
    pub xscale: Scale,
    #[serde(default)]
    pub yscale: Scale,
    #[serde(skip)]
    changes: ChangeQueue,
}

impl PolygonOp {
    pub fn new(
        name: impl Into<String>,
        xchannel: impl Into<String>,
        ychannel: impl Into<String>,
        vertices: Vec<(f64, f64)>,
    ) -> Self {
        Self {
            name: name.into(),
            xchannel: xchannel.into(),
            ychannel: ychannel.into(),
            vertices,
            ..Self::default()
        }
    }

    pub fn set_vertices(&mut self, vertices: Vec<(f64, f64)>) {
        if replace(&mut self.vertices, vertices) {
            self.changes.field(FIELDS, "vertices");
        }
    }
}

/// Even-odd rule; points on an edge may fall either way.
fn contains(polygon: &[(f64, f64)], x: f64, y: f64) -> bool {
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

impl WorkflowOperation for PolygonOp {
    fn id(&self) -> &'static str {
        "polygon"
    }

    fn friendly_id(&self) -> &'static str {
        "Polygon"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn changed_fields(&self, before: &dyn WorkflowOperation) -> Vec<&'static str> {
        changed_fields!(self, before, [name, xchannel, ychannel, vertices, xscale, yscale])
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "name" => replace(&mut self.name, param(field, value)?),
            "xchannel" => replace(&mut self.xchannel, param(field, value)?),
            "ychannel" => replace(&mut self.ychannel, param(field, value)?),
            "vertices" => replace(&mut self.vertices, param(field, value)?),
            "xscale" => replace(&mut self.xscale, param(field, value)?),
            "yscale" => replace(&mut self.yscale, param(field, value)?),
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
        if self.xchannel.is_empty() || self.ychannel.is_empty() {
            return Err(OpError::general(
                "Must specify both an x channel and a y channel",
            ));
        }
        let xs = experiment.channel(&self.xchannel).map_err(|_| {
            OpError::new(
                "xchannel",
                format!("xchannel {} is not in the experiment", self.xchannel),
            )
        })?;
        let ys = experiment.channel(&self.ychannel).map_err(|_| {
            OpError::new(
                "ychannel",
                format!("ychannel {} is not in the experiment", self.ychannel),
            )
        })?;
        if self.vertices.len() < 3 {
            return Err(OpError::new("vertices", "Must have at least 3 vertices"));
        }

        let polygon: Vec<(f64, f64)> = self
            .vertices
            .iter()
            .map(|&(x, y)| (self.xscale.apply(x), self.yscale.apply(y)))
            .collect();
        let gate: Vec<bool> = xs
            .iter()
            .zip(ys)
            .map(|(&x, &y)| contains(&polygon, self.xscale.apply(x), self.yscale.apply(y)))
            .collect();

        let mut result = experiment.clone();
        result.add_condition(&self.name, ColumnData::Bool(gate))?;
        result.push_history(format!("polygon:{}", self.name));
        Ok(result)
    }

    fn default_view(&self) -> Option<Box<dyn WorkflowView>> {
        Some(Box::new(PolygonSelectionView::default()))
    }

    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String {
        let call = PyCall::new("flow.PolygonOp")
            .arg("name", &self.name)
            .arg("xchannel", &self.xchannel)
            .arg("ychannel", &self.ychannel)
            .arg("vertices", &self.vertices)
            .arg_unless("xscale", &self.xscale, &Scale::Linear)
            .arg_unless("yscale", &self.yscale, &Scale::Linear);
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

const VIEW_ID: &str = "polygon-selection";

/// Scatterplot of the upstream result with the polygon outlined. The axis
/// scales are the operation's, so vertices drawn here gate in the same space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonSelectionView {
    pub huefacet: String,
    pub subset_list: Vec<Subset>,
    pub plot_params: ScatterplotParams,
    interactive: Transient<bool>,
    changes: ChangeQueue,
}

impl WorkflowView for PolygonSelectionView {
    fn id(&self) -> &'static str {
        VIEW_ID
    }

    fn friendly_id(&self) -> &'static str {
        "Polygon Selection"
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
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
            .downcast_ref::<PolygonOp>()
            .ok_or_else(|| ViewError::general("Polygon view needs a polygon operation"))?;
        let mut figure = render_scatter(
            experiment,
            &ScatterSpec {
                xchannel: &op.xchannel,
                ychannel: &op.ychannel,
                xscale: op.xscale,
                yscale: op.yscale,
                huefacet: &self.huefacet,
                plotfacet: "",
                current_plot: None,
                subset_list: &self.subset_list,
                params: &self.plot_params,
            },
        )?;
        if !op.vertices.is_empty() {
            figure.annotations.push(Annotation::Polygon {
                vertices: op.vertices.clone(),
            });
        }
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
            Selection::Polygon { vertices } if self.interactive.0 => {
                let vertices = serde_json::to_value(vertices).ok()?;
                Some(vec![("vertices", vertices)])
            }
            _ => None,
        }
    }

    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String {
        let subset = subset_query(&self.subset_list);
        let call = PyCall::new(format!("op_{idx}.default_view"))
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
struct PolygonViewDoc {
    #[serde(default)]
    huefacet: String,
    #[serde(default)]
    subset_list: YamlValue,
    #[serde(default)]
    plot_params: ScatterplotParams,
}

pub(super) fn register(registry: &mut Registry) {
    registry.register_dumper::<PolygonOp, _>("polygon", 1, |op, _| encode(op));
    registry.register_loader("polygon", VersionMatch::Exact(1), |value, _| {
        let op: Box<dyn WorkflowOperation> = Box::new(decode::<PolygonOp>("polygon", value)?);
        Ok(op)
    });

    registry.register_dumper::<PolygonSelectionView, _>("polygon-view", 1, |view, ctx| {
        encode(&PolygonViewDoc {
            huefacet: view.huefacet.clone(),
            subset_list: ctx.dump_seq(view.subset_list.iter().map(Subset::as_any))?,
            plot_params: view.plot_params.clone(),
        })
    });
    registry.register_loader("polygon-view", VersionMatch::Exact(1), |value, ctx| {
        let doc: PolygonViewDoc = decode("polygon-view", value)?;
        let view: Box<dyn WorkflowView> = Box::new(PolygonSelectionView {
            huefacet: doc.huefacet,
            subset_list: ctx.load_seq(doc.subset_list)?,
            plot_params: doc.plot_params,
            ..PolygonSelectionView::default()
        });
        Ok(view)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experiment() -> Experiment {
        let mut ex = Experiment::new();
        ex.add_channel("V2-A", vec![5.0, 50.0, 500.0, 5000.0]).unwrap();
        ex.add_channel("Y2-A", vec![5.0, 50.0, 500.0, 5.0]).unwrap();
        ex
    }

    fn square() -> Vec<(f64, f64)> {
        vec![(10.0, 10.0), (1000.0, 10.0), (1000.0, 1000.0), (10.0, 1000.0)]
    }

    #[test]
    fn test_point_in_polygon() {
        let tri = [(0.0, 0.0), (4.0, 0.0), (0.0, 4.0)];
        assert!(contains(&tri, 1.0, 1.0));
        assert!(!contains(&tri, 3.0, 3.0));
        assert!(!contains(&tri, -1.0, 1.0));
    }

    #[test]
    fn test_polygon_gate() {
        let op = PolygonOp::new("P", "V2-A", "Y2-A", square());
        let result = op.apply(Some(&experiment()), &mut Warnings::new()).unwrap();
        assert_eq!(
            result.column("P").unwrap(),
            &ColumnData::Bool(vec![false, true, true, false])
        );
    }

    #[test]
    fn test_polygon_gate_in_log_space_matches_linear_for_axis_aligned_box() {
        let mut op = PolygonOp::new("P", "V2-A", "Y2-A", square());
        op.xscale = Scale::Log;
        op.yscale = Scale::Log;
        let result = op.apply(Some(&experiment()), &mut Warnings::new()).unwrap();
        assert_eq!(
            result.column("P").unwrap(),
            &ColumnData::Bool(vec![false, true, true, false])
        );
    }

    #[test]
    fn test_polygon_needs_three_vertices() {
        let op = PolygonOp::new("P", "V2-A", "Y2-A", vec![(0.0, 0.0), (1.0, 1.0)]);
        let err = op.apply(Some(&experiment()), &mut Warnings::new()).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("vertices"));
    }

    #[test]
    fn test_polygon_requires_both_channels() {
        let op = PolygonOp::new("P", "V2-A", "", square());
        let err = op.apply(Some(&experiment()), &mut Warnings::new()).unwrap_err();
        assert_eq!(err.message, "Must specify both an x channel and a y channel");
    }

    #[test]
    fn test_drawn_polygon_becomes_vertices() {
        let mut view = PolygonSelectionView::default();
        view.set_interactive(true);
        let params = view
            .selection_params(&Selection::Polygon {
                vertices: vec![(1.0, 2.0), (3.0, 4.0), (5.0, 0.0)],
            })
            .unwrap();
        assert_eq!(params[0].0, "vertices");

        let mut op = PolygonOp::default();
        op.set_param("vertices", params[0].1.clone()).unwrap();
        assert_eq!(op.vertices, vec![(1.0, 2.0), (3.0, 4.0), (5.0, 0.0)]);
    }
}
