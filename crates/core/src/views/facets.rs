use crate::error::ViewError;
use crate::experiment::{Experiment, Scale, Subset};

/// Facet layout shared by every view: subset filtering, choosing the plot
/// for the current `plotfacet` value, and splitting rows by `huefacet`.
pub struct FacetGrid<'a> {
    experiment: &'a Experiment,
    rows: Vec<usize>,
}

impl<'a> FacetGrid<'a> {
    /// Start from the rows selected by `subsets`.
    pub fn new(experiment: &'a Experiment, subsets: &[Subset]) -> Result<Self, ViewError> {
        let mask = experiment
            .query(subsets)
            .map_err(|e| ViewError::new("subset_list", e.to_string()))?;
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        if rows.is_empty() {
            return Err(ViewError::new("subset_list", "Subset string selected no events"));
        }
        Ok(Self { experiment, rows })
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    fn check_facet(&self, field: &str, facet: &str) -> Result<(), ViewError> {
        if self.experiment.conditions().contains_key(facet) {
            Ok(())
        } else {
            Err(ViewError::new(
                field,
                format!("Facet {facet} is not a condition in the experiment"),
            ))
        }
    }

    /// Labels of the plots a `plotfacet` splits the data into.
    pub fn plot_names(experiment: &Experiment, plotfacet: &str) -> Result<Vec<String>, ViewError> {
        if plotfacet.is_empty() {
            return Ok(Vec::new());
        }
        let values = experiment
            .unique_values(plotfacet)
            .map_err(|e| ViewError::new("plotfacet", e.to_string()))?;
        Ok(values.iter().map(ToString::to_string).collect())
    }

    /// Keep only the rows of the current plot. Returns the plot label.
    pub fn select_plot(
        &mut self,
        plotfacet: &str,
        current_plot: Option<&str>,
    ) -> Result<Option<String>, ViewError> {
        if plotfacet.is_empty() {
            return Ok(None);
        }
        self.check_facet("plotfacet", plotfacet)?;
        let names = Self::plot_names(self.experiment, plotfacet)?;
        let plot = match current_plot {
            Some(p) if names.iter().any(|n| n == p) => p.to_string(),
            Some(p) => {
                return Err(ViewError::new(
                    "current_plot",
                    format!("Plot {p} is not a value of {plotfacet}"),
                ))
            }
            None => names
                .first()
                .cloned()
                .ok_or_else(|| ViewError::new("plotfacet", "No plots to show"))?,
        };
        let column = self
            .experiment
            .column(plotfacet)
            .map_err(|e| ViewError::new("plotfacet", e.to_string()))?;
        self.rows.retain(|&r| column.value(r).to_string() == plot);
        Ok(Some(plot))
    }

    /// Split the current rows by the values of `huefacet`.
    pub fn hue_groups(&self, huefacet: &str) -> Result<Vec<(Option<String>, Vec<usize>)>, ViewError> {
        if huefacet.is_empty() {
            return Ok(vec![(None, self.rows.clone())]);
        }
        self.check_facet("huefacet", huefacet)?;
        let column = self
            .experiment
            .column(huefacet)
            .map_err(|e| ViewError::new("huefacet", e.to_string()))?;
        let values = self
            .experiment
            .unique_values(huefacet)
            .map_err(|e| ViewError::new("huefacet", e.to_string()))?;
        Ok(values
            .into_iter()
            .map(|value| {
                let rows: Vec<usize> = self
                    .rows
                    .iter()
                    .copied()
                    .filter(|&r| column.value(r) == value)
                    .collect();
                (Some(value.to_string()), rows)
            })
            .filter(|(_, rows)| !rows.is_empty())
            .collect())
    }

    /// A channel mapped through `scale`.
    pub fn scaled(&self, field: &str, channel: &str, scale: Scale) -> Result<Vec<f64>, ViewError> {
        if channel.is_empty() {
            return Err(ViewError::new(field, "Must set channel"));
        }
        let values = self.experiment.channel(channel).map_err(|_| {
            ViewError::new(field, format!("Channel {channel} isn't in the experiment"))
        })?;
        Ok(values.iter().map(|&v| scale.apply(v)).collect())
    }
}

/// `num_bins + 1` evenly spaced edges spanning the finite values, or a
/// default bin count of `sqrt(n)` clamped to `[10, 100]`.
pub fn bin_edges(values: &[f64], num_bins: Option<usize>) -> Vec<f64> {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() {
        return Vec::new();
    }
    let bins = num_bins
        .unwrap_or_else(|| ((values.len() as f64).sqrt().ceil() as usize).clamp(10, 100))
        .max(1);
    let (min, max) = if max > min { (min, max) } else { (min - 0.5, max + 0.5) };
    let width = (max - min) / bins as f64;
    (0..=bins).map(|i| min + width * i as f64).collect()
}

/// Count values per bin; the last bin includes its right edge.
pub fn bin_counts(values: impl IntoIterator<Item = f64>, edges: &[f64]) -> Vec<usize> {
    let bins = edges.len().saturating_sub(1);
    let mut counts = vec![0usize; bins];
    if bins == 0 {
        return counts;
    }
    let (lo, hi) = (edges[0], edges[bins]);
    let width = (hi - lo) / bins as f64;
    for v in values {
        if !v.is_finite() || v < lo || v > hi {
            continue;
        }
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    counts
}
