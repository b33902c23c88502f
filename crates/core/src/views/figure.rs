use serde::Serialize;

use crate::experiment::Scale;

/// A backend-free description of a rendered plot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Figure {
    pub title: Option<String>,
    pub xlabel: String,
    pub ylabel: String,
    pub xscale: Scale,
    pub yscale: Scale,
    pub panels: Vec<Panel>,
    pub annotations: Vec<Annotation>,
}

impl Figure {
    pub fn new(xlabel: impl Into<String>, ylabel: impl Into<String>) -> Self {
        Self {
            title: None,
            xlabel: xlabel.into(),
            ylabel: ylabel.into(),
            xscale: Scale::Linear,
            yscale: Scale::Linear,
            panels: Vec::new(),
            annotations: Vec::new(),
        }
    }

    /// Number of events drawn across all histogram and point layers.
    pub fn event_count(&self) -> usize {
        self.panels
            .iter()
            .flat_map(|p| &p.layers)
            .map(|layer| match layer {
                Layer::Histogram { counts, .. } => counts.iter().sum(),
                Layer::Points { x, .. } => x.len(),
                Layer::Bars { .. } => 0,
            })
            .sum()
    }
}

/// One facet of a figure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Panel {
    pub label: Option<String>,
    pub layers: Vec<Layer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layer {
    /// Binned counts in scaled space; `edges` has one more entry than `counts`.
    Histogram {
        label: Option<String>,
        edges: Vec<f64>,
        counts: Vec<usize>,
    },
    Points {
        label: Option<String>,
        x: Vec<f64>,
        y: Vec<f64>,
    },
    Bars {
        labels: Vec<String>,
        values: Vec<f64>,
    },
}

/// Overlays drawn by selection views.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    Threshold { x: f64 },
    Span { low: f64, high: f64 },
    Polygon { vertices: Vec<(f64, f64)> },
    Centroids {
        label: Option<String>,
        points: Vec<(f64, f64)>,
    },
}
