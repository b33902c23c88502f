use serde::{Deserialize, Serialize};
use std::any::Any;

use super::{ColumnData, Experiment, ExperimentError, Value};
use crate::serialization::{decode, encode, Registry, VersionMatch};

/// One constraint on the events an operation or view looks at.
///
/// Documents carry subsets as tagged nodes; the serde form here is the
/// `{"kind": "bool", ...}` shape used for parameter edits.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Subset {
    /// Select events by a boolean condition.
    Bool(BoolSubset),
    /// Select events whose categorical condition is one of `selected`.
    Category(CategorySubset),
    /// Select events whose numeric condition lies in `[low, high]`.
    Range(RangeSubset),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BoolSubset {
    pub name: String,
    #[serde(default)]
    pub selected_t: bool,
    #[serde(default)]
    pub selected_f: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CategorySubset {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub selected: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RangeSubset {
    pub name: String,
    #[serde(default)]
    pub values: Vec<f64>,
    pub high: f64,
    pub low: f64,
}

impl RangeSubset {
    fn covers_everything(&self) -> bool {
        let min = self.values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        self.values.is_empty() || (self.low <= min && self.high >= max)
    }
}

impl Subset {
    pub fn name(&self) -> &str {
        match self {
            Subset::Bool(s) => &s.name,
            Subset::Category(s) => &s.name,
            Subset::Range(s) => &s.name,
        }
    }

    /// The concrete subset, for handing to the serialization registry.
    pub fn as_any(&self) -> &dyn Any {
        match self {
            Subset::Bool(s) => s,
            Subset::Category(s) => s,
            Subset::Range(s) => s,
        }
    }

    /// The query string this subset contributes, or an empty string when
    /// it selects every event.
    pub fn query_str(&self) -> String {
        match self {
            Subset::Bool(s) => match (s.selected_t, s.selected_f) {
                (true, false) => format!("({} == True)", s.name),
                (false, true) => format!("({} == False)", s.name),
                _ => String::new(),
            },
            Subset::Category(s) => {
                if s.selected.is_empty() || s.selected.len() == s.values.len() {
                    return String::new();
                }
                let terms: Vec<String> = s
                    .selected
                    .iter()
                    .map(|v| format!("{} == \"{v}\"", s.name))
                    .collect();
                format!("({})", terms.join(" or "))
            }
            Subset::Range(s) => {
                if s.covers_everything() {
                    return String::new();
                }
                format!(
                    "({} >= {:?} and {} <= {:?})",
                    s.name, s.low, s.name, s.high
                )
            }
        }
    }

    /// Row mask for this subset, or `None` when it does not constrain anything.
    pub fn mask(&self, experiment: &Experiment) -> Result<Option<Vec<bool>>, ExperimentError> {
        let column = experiment.column(self.name())?;
        let n = column.len();
        let mask = match self {
            Subset::Bool(s) => {
                let want = match (s.selected_t, s.selected_f) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => return Ok(None),
                };
                let ColumnData::Bool(values) = column else {
                    return Err(ExperimentError::WrongKind {
                        name: s.name.clone(),
                        expected: "a boolean condition",
                    });
                };
                values.iter().map(|&v| v == want).collect()
            }
            Subset::Category(s) => {
                if self.query_str().is_empty() {
                    return Ok(None);
                }
                let selected: Vec<Value> = s.selected.iter().cloned().map(Value::Str).collect();
                (0..n)
                    .map(|row| {
                        let value = column.value(row);
                        selected.iter().any(|sel| sel.matches(&value))
                    })
                    .collect()
            }
            Subset::Range(s) => {
                if s.covers_everything() {
                    return Ok(None);
                }
                (0..n)
                    .map(|row| {
                        column
                            .as_f64(row)
                            .is_some_and(|v| v >= s.low && v <= s.high)
                    })
                    .collect()
            }
        };
        Ok(Some(mask))
    }
}

/// Join the query strings of a subset list with `and`.
pub fn subset_query(subsets: &[Subset]) -> String {
    subsets
        .iter()
        .map(Subset::query_str)
        .filter(|q| !q.is_empty())
        .collect::<Vec<_>>()
        .join(" and ")
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register_dumper::<BoolSubset, _>("bool-subset", 1, |s, _| encode(s));
    registry.register_dumper::<CategorySubset, _>("category-subset", 1, |s, _| encode(s));
    registry.register_dumper::<RangeSubset, _>("range-subset", 1, |s, _| encode(s));

    registry.register_loader("bool-subset", VersionMatch::Exact(1), |value, _| {
        decode("bool-subset", value).map(Subset::Bool)
    });
    registry.register_loader("category-subset", VersionMatch::Exact(1), |value, _| {
        decode("category-subset", value).map(Subset::Category)
    });
    registry.register_loader("range-subset", VersionMatch::Exact(1), |value, _| {
        decode("range-subset", value).map(Subset::Range)
    });
}
