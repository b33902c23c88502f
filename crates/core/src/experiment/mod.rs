//! In-memory cytometry experiment.
//!
//! An [`Experiment`] is a columnar table of events. Float columns that hold
//! measured intensities are *channels*; every other column is a typed
//! *condition* (experimental metadata or the output of a gate). The
//! container also carries grouped statistics, free-form metadata and the
//! names of the operations applied so far.
//!
//! Operations never mutate their input: they clone it, add columns or
//! statistics, and hand back the new experiment.

mod column;
pub mod import;
mod scale;
mod statistic;
mod subset;

pub(crate) use subset::register as register_subsets;

pub use column::{ColumnData, ConditionKind, Value};
pub use scale::Scale;
pub use statistic::{Statistic, StatisticKey};
pub use subset::{subset_query, BoolSubset, CategorySubset, RangeSubset, Subset};

use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while building or querying an experiment.
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("column '{0}' is not in the experiment")]
    UnknownColumn(String),

    #[error("column '{0}' is already in the experiment")]
    DuplicateColumn(String),

    #[error("column '{name}' has {found} rows, the experiment has {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("column '{name}' is not {expected}")]
    WrongKind { name: String, expected: &'static str },

    #[error("statistic ({0}, {1}) is already in the experiment")]
    DuplicateStatistic(String, String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CSV {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("{0}")]
    Import(String),
}

/// A group of rows sharing the same values of some conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: Vec<Value>,
    pub rows: Vec<usize>,
}

/// A columnar table of cytometry events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Experiment {
    columns: Vec<(String, ColumnData)>,
    channels: Vec<String>,
    statistics: BTreeMap<StatisticKey, Statistic>,
    metadata: BTreeMap<String, JsonValue>,
    history: Vec<String>,
    len: usize,
}

impl Experiment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Channel names in insertion order.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Condition names mapped to their kinds.
    pub fn conditions(&self) -> BTreeMap<String, ConditionKind> {
        self.columns
            .iter()
            .filter(|(name, _)| !self.channels.contains(name))
            .map(|(name, data)| (name.clone(), data.kind()))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn is_channel(&self, name: &str) -> bool {
        self.channels.iter().any(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Result<&ColumnData, ExperimentError> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data)
            .ok_or_else(|| ExperimentError::UnknownColumn(name.to_string()))
    }

    /// The values of a float channel.
    pub fn channel(&self, name: &str) -> Result<&[f64], ExperimentError> {
        match self.column(name)? {
            ColumnData::Float(values) if self.is_channel(name) => Ok(values),
            _ => Err(ExperimentError::WrongKind {
                name: name.to_string(),
                expected: "a channel",
            }),
        }
    }

    pub fn statistics(&self) -> &BTreeMap<StatisticKey, Statistic> {
        &self.statistics
    }

    pub fn statistic(&self, key: &StatisticKey) -> Option<&Statistic> {
        self.statistics.get(key)
    }

    pub fn metadata(&self) -> &BTreeMap<String, JsonValue> {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut BTreeMap<String, JsonValue> {
        &mut self.metadata
    }

    /// Names of the operations applied to produce this experiment.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn push_history(&mut self, entry: impl Into<String>) {
        self.history.push(entry.into());
    }

    fn check_new_column(&self, name: &str, len: usize) -> Result<(), ExperimentError> {
        if self.has_column(name) {
            return Err(ExperimentError::DuplicateColumn(name.to_string()));
        }
        // The first column fixes the row count.
        if !self.columns.is_empty() && len != self.len {
            return Err(ExperimentError::LengthMismatch {
                name: name.to_string(),
                expected: self.len,
                found: len,
            });
        }
        Ok(())
    }

    pub fn add_channel(&mut self, name: &str, values: Vec<f64>) -> Result<(), ExperimentError> {
        self.check_new_column(name, values.len())?;
        self.len = values.len();
        self.channels.push(name.to_string());
        self.columns
            .push((name.to_string(), ColumnData::Float(values)));
        Ok(())
    }

    pub fn add_condition(&mut self, name: &str, data: ColumnData) -> Result<(), ExperimentError> {
        self.check_new_column(name, data.len())?;
        self.len = data.len();
        self.columns.push((name.to_string(), data));
        Ok(())
    }

    pub fn add_statistic(
        &mut self,
        key: StatisticKey,
        statistic: Statistic,
    ) -> Result<(), ExperimentError> {
        if self.statistics.contains_key(&key) {
            return Err(ExperimentError::DuplicateStatistic(key.0, key.1));
        }
        self.statistics.insert(key, statistic);
        Ok(())
    }

    /// Distinct values of a column, sorted.
    pub fn unique_values(&self, name: &str) -> Result<Vec<Value>, ExperimentError> {
        let data = self.column(name)?;
        let mut values: Vec<Value> = Vec::new();
        for row in 0..data.len() {
            let value = data.value(row);
            if !values.contains(&value) {
                values.push(value);
            }
        }
        values.sort_by(Value::total_cmp);
        Ok(values)
    }

    /// Rows selected by every subset in `subsets`.
    ///
    /// Subsets that select everything do not constrain the mask.
    pub fn query(&self, subsets: &[Subset]) -> Result<Vec<bool>, ExperimentError> {
        let mut mask = vec![true; self.len];
        for subset in subsets {
            if let Some(selected) = subset.mask(self)? {
                for (keep, sel) in mask.iter_mut().zip(selected) {
                    *keep &= sel;
                }
            }
        }
        Ok(mask)
    }

    /// A new experiment holding only the rows where `mask` is true.
    pub fn subset(&self, mask: &[bool]) -> Experiment {
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        self.take(&rows)
    }

    /// A new experiment holding the given rows, in order.
    pub fn take(&self, rows: &[usize]) -> Experiment {
        Experiment {
            columns: self
                .columns
                .iter()
                .map(|(name, data)| (name.clone(), data.take(rows)))
                .collect(),
            channels: self.channels.clone(),
            statistics: self.statistics.clone(),
            metadata: self.metadata.clone(),
            history: self.history.clone(),
            len: rows.len(),
        }
    }

    /// Split the rows selected by `mask` into groups by the values of `by`.
    ///
    /// Groups are sorted by key. With an empty `by` there is a single group
    /// with an empty key.
    pub fn group_by(
        &self,
        by: &[String],
        mask: Option<&[bool]>,
    ) -> Result<Vec<Group>, ExperimentError> {
        let columns = by
            .iter()
            .map(|name| self.column(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut groups: Vec<Group> = Vec::new();
        for row in 0..self.len {
            if let Some(mask) = mask {
                if !mask[row] {
                    continue;
                }
            }
            let key: Vec<Value> = columns.iter().map(|c| c.value(row)).collect();
            match groups.iter_mut().find(|g| g.key == key) {
                Some(group) => group.rows.push(row),
                None => groups.push(Group {
                    key,
                    rows: vec![row],
                }),
            }
        }
        groups.sort_by(|a, b| compare_keys(&a.key, &b.key));
        Ok(groups)
    }
}

fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Experiment {
        let mut ex = Experiment::new();
        ex.add_channel("Y2-A", vec![10.0, 300.0, 301.0, 50000.0])
            .unwrap();
        ex.add_condition(
            "Dox",
            ColumnData::Float(vec![1.0, 1.0, 10.0, 10.0]),
        )
        .unwrap();
        ex
    }

    #[test]
    fn test_add_channel_and_conditions() {
        let ex = sample();
        assert_eq!(ex.len(), 4);
        assert_eq!(ex.channels(), &["Y2-A".to_string()]);
        assert_eq!(ex.conditions().get("Dox"), Some(&ConditionKind::Float));
        assert!(ex.channel("Dox").is_err());
    }

    #[test]
    fn test_duplicate_column_is_rejected() {
        let mut ex = sample();
        let err = ex
            .add_condition("Y2-A", ColumnData::Bool(vec![true; 4]))
            .unwrap_err();
        assert!(matches!(err, ExperimentError::DuplicateColumn(name) if name == "Y2-A"));
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let mut ex = sample();
        let err = ex
            .add_condition("T", ColumnData::Bool(vec![true; 3]))
            .unwrap_err();
        assert!(matches!(err, ExperimentError::LengthMismatch { expected: 4, found: 3, .. }));
    }

    #[test]
    fn test_subset_keeps_selected_rows() {
        let ex = sample();
        let sub = ex.subset(&[false, true, true, false]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.channel("Y2-A").unwrap(), &[300.0, 301.0]);
    }

    #[test]
    fn test_group_by_sorted_keys() {
        let ex = sample();
        let groups = ex.group_by(&["Dox".to_string()], None).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, vec![Value::Float(1.0)]);
        assert_eq!(groups[0].rows, vec![0, 1]);
        assert_eq!(groups[1].rows, vec![2, 3]);

        let all = ex.group_by(&[], Some(&[true, false, true, false])).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].rows, vec![0, 2]);
    }

    #[test]
    fn test_clone_is_structurally_equal() {
        let ex = sample();
        assert_eq!(ex.clone(), ex);
    }
}
