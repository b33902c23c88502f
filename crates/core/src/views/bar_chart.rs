use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::any::Any;

use super::{eq_concrete, Figure, Layer, Panel, WorkflowView};
use crate::error::{ParamError, ViewError};
use crate::experiment::{Experiment, Scale, Value};
use crate::notebook::PyCall;
use crate::operations::{param, replace, ChangeQueue, Warnings, WorkflowOperation};
use crate::serialization::{decode, encode, Registry, VersionMatch};

pub(super) const ID: &str = "bar-chart";

/// Bars of a grouped statistic, one bar per value of `variable`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BarChartView {
    /// `(operation name, statistic name)`.
    #[serde(default)]
    pub statistic: (String, String),
    #[serde(default)]
    pub variable: String,
    #[serde(default)]
    pub scale: Scale,
    #[serde(default)]
    pub huefacet: String,
    #[serde(skip)]
    changes: ChangeQueue,
}

impl BarChartView {
    pub fn new(statistic: (String, String), variable: impl Into<String>) -> Self {
        Self {
            statistic,
            variable: variable.into(),
            ..Self::default()
        }
    }
}

impl WorkflowView for BarChartView {
    fn id(&self) -> &'static str {
        ID
    }

    fn friendly_id(&self) -> &'static str {
        "Bar Chart"
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "statistic" => replace(&mut self.statistic, param(field, value)?),
            "variable" => replace(&mut self.variable, param(field, value)?),
            "scale" => replace(&mut self.scale, param(field, value)?),
            "huefacet" => replace(&mut self.huefacet, param(field, value)?),
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

    fn plot(
        &self,
        experiment: &Experiment,
        _operation: &dyn WorkflowOperation,
        _warnings: &mut Warnings,
    ) -> Result<Figure, ViewError> {
        if self.statistic.0.is_empty() {
            return Err(ViewError::new("statistic", "Statistic not set"));
        }
        let stat = experiment.statistic(&self.statistic).ok_or_else(|| {
            ViewError::new(
                "statistic",
                format!("Can't find the statistic {:?} in the experiment", self.statistic),
            )
        })?;
        if self.variable.is_empty() {
            return Err(ViewError::new("variable", "Independent variable not set"));
        }
        let var_pos = stat.index.iter().position(|l| *l == self.variable).ok_or_else(|| {
            ViewError::new(
                "variable",
                format!("Variable {} not in the statistic's index", self.variable),
            )
        })?;
        let hue_pos = if self.huefacet.is_empty() {
            None
        } else {
            Some(stat.index.iter().position(|l| *l == self.huefacet).ok_or_else(|| {
                ViewError::new(
                    "huefacet",
                    format!("Facet {} not in the statistic's index", self.huefacet),
                )
            })?)
        };
        let unused = stat.index.len() - 1 - usize::from(hue_pos.is_some());
        if unused > 0 {
            return Err(ViewError::general(
                "Every level of the statistic's index must be the variable or a facet",
            ));
        }

        let variable_values = stat.level_values(&self.variable).unwrap_or_default();
        let hues: Vec<Option<Value>> = match hue_pos {
            Some(_) => stat
                .level_values(&self.huefacet)
                .unwrap_or_default()
                .into_iter()
                .map(Some)
                .collect(),
            None => vec![None],
        };

        let layers = hues
            .iter()
            .map(|hue| {
                let values = variable_values
                    .iter()
                    .map(|v| {
                        stat.rows
                            .iter()
                            .find(|(key, _)| {
                                key[var_pos] == *v
                                    && match (hue_pos, hue) {
                                        (Some(p), Some(h)) => key[p] == *h,
                                        _ => true,
                                    }
                            })
                            .map(|(_, value)| self.scale.apply(*value))
                            .unwrap_or(f64::NAN)
                    })
                    .collect();
                Layer::Bars {
                    labels: variable_values.iter().map(ToString::to_string).collect(),
                    values,
                }
            })
            .collect();

        let mut figure = Figure::new(self.variable.clone(), self.statistic.1.clone());
        figure.yscale = self.scale;
        figure.panels.push(Panel {
            label: None,
            layers,
        });
        Ok(figure)
    }

    fn notebook_code(&self, idx: usize, _prev_idx: Option<usize>) -> String {
        let call = PyCall::new("flow.BarChartView")
            .arg("statistic", &(self.statistic.0.clone(), self.statistic.1.clone()))
            .arg("variable", &self.variable)
            .arg_unless("scale", &self.scale, &Scale::Linear)
            .arg_unless("huefacet", self.huefacet.as_str(), "");
        format!("{}.plot(ex_{idx})", call.render())
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

pub(super) fn register(registry: &mut Registry) {
    registry.register_dumper::<BarChartView, _>("bar-chart", 1, |view, _| encode(view));
    registry.register_loader("bar-chart", VersionMatch::Exact(1), |value, _| {
        let view: Box<dyn WorkflowView> = Box::new(decode::<BarChartView>("bar-chart", value)?);
        Ok(view)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Statistic;
    use crate::operations::ThresholdOp;

    fn experiment() -> Experiment {
        let mut ex = Experiment::new();
        let mut stat = Statistic::new(vec!["Dox".to_string()]);
        stat.rows.push((vec![Value::Float(1.0)], 100.0));
        stat.rows.push((vec![Value::Float(10.0)], 1000.0));
        ex.add_statistic(("Mean".to_string(), "Mean".to_string()), stat)
            .unwrap();
        ex
    }

    #[test]
    fn test_bar_chart_one_bar_per_value() {
        let view = BarChartView::new(("Mean".to_string(), "Mean".to_string()), "Dox");
        let figure = view
            .plot(&experiment(), &ThresholdOp::default(), &mut Warnings::new())
            .unwrap();
        assert_eq!(
            figure.panels[0].layers[0],
            Layer::Bars {
                labels: vec!["1.0".to_string(), "10.0".to_string()],
                values: vec![100.0, 1000.0],
            }
        );
    }

    #[test]
    fn test_bar_chart_missing_statistic() {
        let view = BarChartView::new(("Other".to_string(), "Mean".to_string()), "Dox");
        let err = view
            .plot(&experiment(), &ThresholdOp::default(), &mut Warnings::new())
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("statistic"));
    }
}
