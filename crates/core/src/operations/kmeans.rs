//! K-means clustering on two scaled channels.
//!
//! `estimate` fits one set of centroids per `by` group with a deterministic
//! Lloyd iteration (farthest-point seeding), so the same data always yields
//! the same clusters. `apply` labels every event with its nearest centroid
//! as `{name}_{k}`, or `{name}_None` when it can't be placed.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::any::Any;
use std::collections::BTreeMap;

use super::{
    eq_concrete, param, replace, require_experiment, validate_new_column, ChangeQueue, FieldRole,
    FieldSpec, Transient, Warnings, WorkflowOperation, TRACING_TARGET,
};
use crate::error::{OpError, ParamError, ViewError};
use crate::experiment::{subset_query, ColumnData, Experiment, Scale, Statistic, Subset, Value};
use crate::notebook::{operation_code, PyCall};
use crate::serialization::{decode, encode, Registry, VersionMatch};
use crate::views::{
    plot_name_arg, render_scatter, Annotation, FacetGrid, Figure, ScatterSpec, ScatterplotParams,
    WorkflowView,
};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldRole::Apply),
    FieldSpec::new("xchannel", FieldRole::Estimate),
    FieldSpec::new("ychannel", FieldRole::Estimate),
    FieldSpec::new("xscale", FieldRole::Estimate),
    FieldSpec::new("yscale", FieldRole::Estimate),
    FieldSpec::new("num_clusters", FieldRole::Estimate),
    FieldSpec::new("by", FieldRole::Estimate),
    FieldSpec::new("subset_list", FieldRole::Estimate),
    FieldSpec::new("_kmeans", FieldRole::EstimateResult),
];

const MAX_ITERATIONS: usize = 300;
const MAX_GROUP_VALUES: usize = 100;

type Centroids = Vec<(f64, f64)>;

fn default_clusters() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansOp {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub xchannel: String,
    #[serde(default)]
    pub ychannel: String,
    #[serde(default)]
    pub xscale: Scale,
    #[serde(default)]
    pub yscale: Scale,
    #[serde(default = "default_clusters")]
    pub num_clusters: usize,
    #[serde(default)]
    pub by: Vec<String>,
    #[serde(skip)]
    pub subset_list: Vec<Subset>,
    /// Fitted centroids in scaled space, per `by` group.
    #[serde(skip)]
    centroids: Transient<Vec<(Vec<Value>, Centroids)>>,
    #[serde(skip)]
    changes: ChangeQueue,
}

impl Default for KMeansOp {
    fn default() -> Self {
        Self {
            name: String::new(),
            xchannel: String::new(),
            ychannel: String::new(),
            xscale: Scale::Linear,
            yscale: Scale::Linear,
            num_clusters: default_clusters(),
            by: Vec::new(),
            subset_list: Vec::new(),
            centroids: Transient::default(),
            changes: ChangeQueue::default(),
        }
    }
}

impl KMeansOp {
    pub fn new(
        name: impl Into<String>,
        xchannel: impl Into<String>,
        ychannel: impl Into<String>,
        num_clusters: usize,
    ) -> Self {
        Self {
            name: name.into(),
            xchannel: xchannel.into(),
            ychannel: ychannel.into(),
            num_clusters,
            ..Self::default()
        }
    }

    pub fn set_num_clusters(&mut self, num_clusters: usize) {
        if replace(&mut self.num_clusters, num_clusters) {
            self.changes.field(FIELDS, "num_clusters");
        }
    }

    /// Fitted centroids per group, in data coordinates.
    pub fn centroids(&self) -> Vec<(Vec<Value>, Centroids)> {
        self.centroids
            .0
            .iter()
            .map(|(key, points)| {
                let points = points
                    .iter()
                    .map(|&(x, y)| (self.xscale.inverse(x), self.yscale.inverse(y)))
                    .collect();
                (key.clone(), points)
            })
            .collect()
    }

    pub fn is_estimated(&self) -> bool {
        !self.centroids.0.is_empty()
    }

    /// Whether the fitted model still has `num_clusters` centroids per group.
    fn fit_is_current(&self) -> bool {
        self.is_estimated()
            && self
                .centroids
                .0
                .iter()
                .all(|(_, centroids)| centroids.len() == self.num_clusters)
    }

    fn check_channels(&self, experiment: &Experiment) -> Result<(Vec<f64>, Vec<f64>), OpError> {
        if self.xchannel.is_empty() {
            return Err(OpError::new("xchannel", "Must set X channel"));
        }
        if self.ychannel.is_empty() {
            return Err(OpError::new("ychannel", "Must set Y channel"));
        }
        let scaled = |field: &str, channel: &str, scale: Scale| {
            experiment
                .channel(channel)
                .map(|values| values.iter().map(|&v| scale.apply(v)).collect::<Vec<_>>())
                .map_err(|_| {
                    OpError::new(field, format!("Channel {channel} not found in the experiment"))
                })
        };
        Ok((
            scaled("xchannel", &self.xchannel, self.xscale)?,
            scaled("ychannel", &self.ychannel, self.yscale)?,
        ))
    }

    fn check_by(&self, experiment: &Experiment) -> Result<(), OpError> {
        for b in &self.by {
            if !experiment.has_column(b) {
                return Err(OpError::new(
                    "by",
                    format!("Aggregation metadata {b} not found in the experiment"),
                ));
            }
            if experiment.unique_values(b)?.len() > MAX_GROUP_VALUES {
                return Err(OpError::new(
                    "by",
                    format!(
                        "More than {MAX_GROUP_VALUES} unique values found for aggregation \
                         metadata {b}.  Did you accidentally specify a data channel?"
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn distance2(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)
}

/// Index of the nearest centroid; ties go to the lower index.
fn nearest(centroids: &[(f64, f64)], point: (f64, f64)) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, &c) in centroids.iter().enumerate() {
        let d = distance2(c, point);
        if d < best_d {
            best = i;
            best_d = d;
        }
    }
    best
}

/// Lloyd's algorithm seeded with the point nearest the mean followed by
/// repeated farthest points. `points` must hold at least `k` entries.
fn fit(points: &[(f64, f64)], k: usize) -> Centroids {
    let n = points.len() as f64;
    let mean = points
        .iter()
        .fold((0.0, 0.0), |acc, p| (acc.0 + p.0 / n, acc.1 + p.1 / n));
    let mut centroids = vec![points[nearest(points, mean)]];
    while centroids.len() < k {
        let farthest = points
            .iter()
            .copied()
            .max_by(|&a, &b| {
                let da = distance2(centroids[nearest(&centroids, a)], a);
                let db = distance2(centroids[nearest(&centroids, b)], b);
                da.total_cmp(&db)
            })
            .unwrap_or(mean);
        centroids.push(farthest);
    }

    let mut assignment = vec![usize::MAX; points.len()];
    for _ in 0..MAX_ITERATIONS {
        let mut moved = false;
        for (slot, &p) in assignment.iter_mut().zip(points) {
            let c = nearest(&centroids, p);
            if *slot != c {
                *slot = c;
                moved = true;
            }
        }
        if !moved {
            break;
        }
        let mut sums = vec![(0.0, 0.0, 0usize); k];
        for (&c, &p) in assignment.iter().zip(points) {
            sums[c].0 += p.0;
            sums[c].1 += p.1;
            sums[c].2 += 1;
        }
        for (centroid, (sx, sy, count)) in centroids.iter_mut().zip(sums) {
            if count > 0 {
                *centroid = (sx / count as f64, sy / count as f64);
            }
        }
    }
    centroids
}

impl WorkflowOperation for KMeansOp {
    fn id(&self) -> &'static str {
        "kmeans"
    }

    fn friendly_id(&self) -> &'static str {
        "KMeans"
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn changed_fields(&self, before: &dyn WorkflowOperation) -> Vec<&'static str> {
        changed_fields!(self, before, [name, xchannel, ychannel, xscale, yscale, num_clusters, by, subset_list])
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "name" => replace(&mut self.name, param(field, value)?),
            "xchannel" => replace(&mut self.xchannel, param(field, value)?),
            "ychannel" => replace(&mut self.ychannel, param(field, value)?),
            "xscale" => replace(&mut self.xscale, param(field, value)?),
            "yscale" => replace(&mut self.yscale, param(field, value)?),
            "num_clusters" => replace(&mut self.num_clusters, param(field, value)?),
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

    fn requires_estimate(&self) -> bool {
        true
    }

    fn estimate(&mut self, experiment: &Experiment, _warnings: &mut Warnings) -> Result<(), OpError> {
        if self.num_clusters < 2 {
            return Err(OpError::new("num_clusters", "num_clusters must be >= 2"));
        }
        let (xs, ys) = self.check_channels(experiment)?;
        self.check_by(experiment)?;

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

        let mut fitted = Vec::new();
        for group in experiment.group_by(&self.by, Some(&mask))? {
            let points: Vec<(f64, f64)> = group
                .rows
                .iter()
                .map(|&r| (xs[r], ys[r]))
                .filter(|p| p.0.is_finite() && p.1.is_finite())
                .collect();
            if points.len() < self.num_clusters {
                return Err(OpError::general(format!(
                    "Group {:?} has {} usable events, fewer than {} clusters",
                    group.key,
                    points.len(),
                    self.num_clusters
                )));
            }
            fitted.push((group.key, fit(&points, self.num_clusters)));
        }
        tracing::debug!(
            target: TRACING_TARGET,
            name = %self.name,
            groups = fitted.len(),
            "fitted k-means centroids"
        );
        self.centroids.0 = fitted;
        Ok(())
    }

    fn apply(
        &self,
        experiment: Option<&Experiment>,
        _warnings: &mut Warnings,
    ) -> Result<Experiment, OpError> {
        let experiment = require_experiment(experiment)?;
        if !self.fit_is_current() {
            return Err(OpError::general("Click Estimate!"));
        }
        validate_new_column(&self.name, experiment)?;
        let (xs, ys) = self.check_channels(experiment)?;
        self.check_by(experiment)?;

        let columns = self
            .by
            .iter()
            .map(|b| experiment.column(b))
            .collect::<Result<Vec<_>, _>>()?;
        let none = format!("{}_None", self.name);
        let cluster_label = |c: usize| format!("{}_{}", self.name, c + 1);

        let mut labels = Vec::with_capacity(experiment.len());
        let mut counts: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for row in 0..experiment.len() {
            let key: Vec<Value> = columns.iter().map(|c| c.value(row)).collect();
            let point = (xs[row], ys[row]);
            let group = self.centroids.0.iter().position(|(k, _)| *k == key);
            match group {
                Some(g) if point.0.is_finite() && point.1.is_finite() => {
                    let c = nearest(&self.centroids.0[g].1, point);
                    counts.entry(g).or_insert_with(|| vec![0; self.num_clusters])[c] += 1;
                    labels.push(cluster_label(c));
                }
                _ => labels.push(none.clone()),
            }
        }

        let mut levels: Vec<String> = (0..self.num_clusters).map(cluster_label).collect();
        levels.push(none);

        let mut index = self.by.clone();
        index.push("Cluster".to_string());
        let mut count_stat = Statistic::new(index.clone());
        let mut prop_stat = Statistic::new(index);
        for (g, (key, _)) in self.centroids.0.iter().enumerate() {
            let group_counts = counts.get(&g).cloned().unwrap_or_else(|| vec![0; self.num_clusters]);
            let total: usize = group_counts.iter().sum();
            for (c, &count) in group_counts.iter().enumerate() {
                let mut row_key = key.clone();
                row_key.push(Value::Int(c as i64 + 1));
                let proportion = if total == 0 { 0.0 } else { count as f64 / total as f64 };
                count_stat.rows.push((row_key.clone(), count as f64));
                prop_stat.rows.push((row_key, proportion));
            }
        }

        let mut result = experiment.clone();
        result.add_condition(&self.name, ColumnData::category(levels, &labels))?;
        result.add_statistic((self.name.clone(), "count".to_string()), count_stat)?;
        result.add_statistic((self.name.clone(), "proportion".to_string()), prop_stat)?;
        result.push_history(format!("kmeans:{}", self.name));
        Ok(result)
    }

    fn clear_estimate(&mut self) {
        self.centroids.0.clear();
    }

    fn default_view(&self) -> Option<Box<dyn WorkflowView>> {
        Some(Box::new(KMeansView::default()))
    }

    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String {
        let scale: BTreeMap<String, Scale> = [
            (self.xchannel.clone(), self.xscale),
            (self.ychannel.clone(), self.yscale),
        ]
        .into_iter()
        .collect();
        let call = PyCall::new("flow.KMeansOp")
            .arg("name", &self.name)
            .arg("channels", &vec![self.xchannel.clone(), self.ychannel.clone()])
            .arg("scale", &scale)
            .arg("num_clusters", &self.num_clusters)
            .arg_unless("by", &self.by, &Vec::new());
        let subset = subset_query(&self.subset_list);
        operation_code(idx, prev_idx, &call, Some(&subset))
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

const VIEW_ID: &str = "kmeans";

/// Scatterplot coloured by cluster, with the fitted centroids overlaid.
/// Faceted into one plot per value of the operation's first `by` condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KMeansView {
    pub plot_params: ScatterplotParams,
    pub current_plot: Option<String>,
    changes: ChangeQueue,
}

impl KMeansView {
    fn estimated_op(operation: &dyn WorkflowOperation) -> Result<&KMeansOp, ViewError> {
        let op = operation
            .as_any()
            .downcast_ref::<KMeansOp>()
            .ok_or_else(|| ViewError::general("KMeans view needs a k-means operation"))?;
        if !op.is_estimated() {
            return Err(ViewError::general("Must estimate the clusters before plotting"));
        }
        Ok(op)
    }
}

impl WorkflowView for KMeansView {
    fn id(&self) -> &'static str {
        VIEW_ID
    }

    fn friendly_id(&self) -> &'static str {
        "KMeans"
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
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

    fn enum_plots(
        &self,
        experiment: &Experiment,
        operation: &dyn WorkflowOperation,
    ) -> Result<Vec<String>, ViewError> {
        let op = Self::estimated_op(operation)?;
        match op.by.first() {
            Some(facet) => FacetGrid::plot_names(experiment, facet),
            None => Ok(Vec::new()),
        }
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
        let op = Self::estimated_op(operation)?;
        let plotfacet = op.by.first().map(String::as_str).unwrap_or("");
        let huefacet = if experiment.has_column(&op.name) {
            op.name.as_str()
        } else {
            ""
        };
        let mut figure = render_scatter(
            experiment,
            &ScatterSpec {
                xchannel: &op.xchannel,
                ychannel: &op.ychannel,
                xscale: op.xscale,
                yscale: op.yscale,
                huefacet,
                plotfacet,
                current_plot: self.current_plot.as_deref(),
                subset_list: &op.subset_list,
                params: &self.plot_params,
            },
        )?;
        let plot = figure.panels.first().and_then(|p| p.label.clone());
        for (key, points) in op.centroids() {
            let label = (!key.is_empty()).then(|| {
                key.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            });
            let shown = match (&plot, key.first()) {
                (Some(plot), Some(first)) => first.to_string() == *plot,
                _ => true,
            };
            if shown {
                figure.annotations.push(Annotation::Centroids { label, points });
            }
        }
        Ok(figure)
    }

    fn notebook_code(&self, idx: usize, _prev_idx: Option<usize>) -> String {
        format!(
            "op_{idx}.default_view().plot(ex_{idx}{})",
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
struct KMeansDoc {
    #[serde(default)]
    name: String,
    #[serde(default)]
    xchannel: String,
    #[serde(default)]
    ychannel: String,
    #[serde(default)]
    xscale: Scale,
    #[serde(default)]
    yscale: Scale,
    #[serde(default = "default_clusters")]
    num_clusters: usize,
    #[serde(default)]
    by: Vec<String>,
    #[serde(default)]
    subset_list: YamlValue,
}

#[derive(Serialize, Deserialize)]
struct KMeansViewDoc {
    #[serde(default)]
    plot_params: ScatterplotParams,
    #[serde(default)]
    current_plot: Option<String>,
}

pub(super) fn register(registry: &mut Registry) {
    registry.register_dumper::<KMeansOp, _>("kmeans", 1, |op, ctx| {
        encode(&KMeansDoc {
            name: op.name.clone(),
            xchannel: op.xchannel.clone(),
            ychannel: op.ychannel.clone(),
            xscale: op.xscale,
            yscale: op.yscale,
            num_clusters: op.num_clusters,
            by: op.by.clone(),
            subset_list: ctx.dump_seq(op.subset_list.iter().map(Subset::as_any))?,
        })
    });
    registry.register_loader("kmeans", VersionMatch::Exact(1), |value, ctx| {
        let doc: KMeansDoc = decode("kmeans", value)?;
        let op: Box<dyn WorkflowOperation> = Box::new(KMeansOp {
            name: doc.name,
            xchannel: doc.xchannel,
            ychannel: doc.ychannel,
            xscale: doc.xscale,
            yscale: doc.yscale,
            num_clusters: doc.num_clusters,
            by: doc.by,
            subset_list: ctx.load_seq(doc.subset_list)?,
            ..KMeansOp::default()
        });
        Ok(op)
    });

    registry.register_dumper::<KMeansView, _>("kmeans-view", 1, |view, _| {
        encode(&KMeansViewDoc {
            plot_params: view.plot_params.clone(),
            current_plot: view.current_plot.clone(),
        })
    });
    registry.register_loader("kmeans-view", VersionMatch::Exact(1), |value, _| {
        let doc: KMeansViewDoc = decode("kmeans-view", value)?;
        let view: Box<dyn WorkflowView> = Box::new(KMeansView {
            plot_params: doc.plot_params,
            current_plot: doc.current_plot,
            changes: ChangeQueue::default(),
        });
        Ok(view)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_protocol::{ChangePayload, Changed};

    /// Two tight blobs around (10, 10) and (100, 100), split across two wells.
    fn experiment() -> Experiment {
        let xs = vec![9.0, 10.0, 11.0, 99.0, 100.0, 101.0, 10.0, 100.0];
        let ys = vec![10.0, 9.0, 11.0, 100.0, 99.0, 101.0, 10.0, 100.0];
        let wells = ["A", "A", "A", "A", "B", "B", "B", "B"].map(String::from);
        let mut ex = Experiment::new();
        ex.add_channel("V2-A", xs).unwrap();
        ex.add_channel("Y2-A", ys).unwrap();
        ex.add_condition("Well", ColumnData::category(vec![], &wells))
            .unwrap();
        ex
    }

    #[test]
    fn test_fit_is_deterministic() {
        let points = [(0.0, 0.0), (0.0, 1.0), (10.0, 10.0), (10.0, 11.0)];
        let first = fit(&points, 2);
        assert_eq!(first, fit(&points, 2));
        let mut sorted = first.clone();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert_eq!(sorted, vec![(0.0, 0.5), (10.0, 10.5)]);
    }

    #[test]
    fn test_apply_before_estimate_fails() {
        let op = KMeansOp::new("KM", "V2-A", "Y2-A", 2);
        let err = op.apply(Some(&experiment()), &mut Warnings::new()).unwrap_err();
        assert_eq!(err.message, "Click Estimate!");
        assert_eq!(err.field, None);
    }

    #[test]
    fn test_apply_with_stale_cluster_count_fails() {
        let mut op = KMeansOp::new("KM", "V2-A", "Y2-A", 3);
        op.estimate(&experiment(), &mut Warnings::new()).unwrap();
        op.num_clusters = 2;
        let err = op.apply(Some(&experiment()), &mut Warnings::new()).unwrap_err();
        assert_eq!(err.message, "Click Estimate!");

        op.estimate(&experiment(), &mut Warnings::new()).unwrap();
        let result = op.apply(Some(&experiment()), &mut Warnings::new()).unwrap();
        assert_eq!(result.column("KM").unwrap().levels().unwrap(), ["KM_1", "KM_2", "KM_3", "KM_None"]);
    }

    #[test]
    fn test_estimate_then_apply_labels_clusters() {
        let mut op = KMeansOp::new("KM", "V2-A", "Y2-A", 2);
        op.estimate(&experiment(), &mut Warnings::new()).unwrap();
        let result = op.apply(Some(&experiment()), &mut Warnings::new()).unwrap();
        let column = result.column("KM").unwrap();
        assert_eq!(column.levels().unwrap(), ["KM_1", "KM_2", "KM_None"]);

        let labels: Vec<String> = (0..8).map(|r| column.value(r).to_string()).collect();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[0], labels[6]);
        assert_eq!(labels[3], labels[7]);
        assert_ne!(labels[0], labels[3]);

        let counts = result
            .statistic(&("KM".to_string(), "count".to_string()))
            .unwrap();
        assert_eq!(counts.index, vec!["Cluster".to_string()]);
        let total: f64 = counts.rows.iter().map(|(_, v)| v).sum();
        assert_eq!(total, 8.0);
    }

    #[test]
    fn test_by_fits_each_group() {
        let mut op = KMeansOp::new("KM", "V2-A", "Y2-A", 2);
        op.by = vec!["Well".to_string()];
        op.estimate(&experiment(), &mut Warnings::new()).unwrap();
        let centroids = op.centroids();
        assert_eq!(centroids.len(), 2);
        assert_eq!(centroids[0].0, vec![Value::Str("A".to_string())]);
    }

    #[test]
    fn test_log_scale_drops_nonpositive_events() {
        let mut ex = experiment();
        let mut op = KMeansOp::new("KM", "V2-A", "Y2-A", 2);
        op.xscale = Scale::Log;
        op.estimate(&ex, &mut Warnings::new()).unwrap();

        ex = {
            let mut shifted = Experiment::new();
            let mut xs = ex.channel("V2-A").unwrap().to_vec();
            xs[0] = -5.0;
            shifted.add_channel("V2-A", xs).unwrap();
            shifted
                .add_channel("Y2-A", ex.channel("Y2-A").unwrap().to_vec())
                .unwrap();
            shifted
        };
        let result = op.apply(Some(&ex), &mut Warnings::new()).unwrap();
        assert_eq!(result.column("KM").unwrap().value(0).to_string(), "KM_None");
    }

    #[test]
    fn test_estimate_validation() {
        let mut op = KMeansOp::new("KM", "", "Y2-A", 2);
        let err = op.estimate(&experiment(), &mut Warnings::new()).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("xchannel"));

        op.xchannel = "V2-A".to_string();
        op.num_clusters = 1;
        let err = op.estimate(&experiment(), &mut Warnings::new()).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("num_clusters"));
    }

    #[test]
    fn test_default_predicates_for_estimate_fields() {
        let mut op = KMeansOp::new("KM", "V2-A", "Y2-A", 2);
        op.set_num_clusters(3);
        let event = op.changes().drain().remove(0);
        assert_eq!(event.kind, Changed::Estimate);
        assert!(op.should_clear_estimate(event.kind, &event.payload));
        assert!(!op.should_apply(event.kind, &event.payload));
        assert!(op.should_apply(Changed::EstimateResult, &ChangePayload::Item));
        assert!(!op.should_clear_estimate(Changed::Apply, &ChangePayload::Item));
    }

    #[test]
    fn test_clear_estimate_resets_centroids() {
        let mut op = KMeansOp::new("KM", "V2-A", "Y2-A", 2);
        op.estimate(&experiment(), &mut Warnings::new()).unwrap();
        assert!(op.is_estimated());
        op.clear_estimate();
        assert!(!op.is_estimated());
    }

    #[test]
    fn test_view_requires_estimate() {
        let mut op = KMeansOp::new("KM", "V2-A", "Y2-A", 2);
        let view = KMeansView::default();
        let err = view
            .plot(&experiment(), &op, &mut Warnings::new())
            .unwrap_err();
        assert_eq!(err.message, "Must estimate the clusters before plotting");

        op.estimate(&experiment(), &mut Warnings::new()).unwrap();
        let figure = view.plot(&experiment(), &op, &mut Warnings::new()).unwrap();
        assert!(matches!(figure.annotations[0], Annotation::Centroids { .. }));
    }

    #[test]
    fn test_notebook_code_estimates_first() {
        let op = KMeansOp::new("KM", "V2-A", "Y2-A", 2);
        let code = op.notebook_code(3, Some(2));
        let lines: Vec<&str> = code.lines().collect();
        assert!(lines[0].starts_with("op_3 = flow.KMeansOp(name = 'KM'"));
        assert_eq!(lines[1], "op_3.estimate(ex_2)");
        assert_eq!(lines[2], "ex_3 = op_3.apply(ex_2)");
    }
}
