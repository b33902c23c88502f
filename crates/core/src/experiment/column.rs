use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The type of a condition column.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Bool,
    Int,
    Float,
    Category,
}

impl ConditionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionKind::Bool => "bool",
            ConditionKind::Int => "int",
            ConditionKind::Float => "float",
            ConditionKind::Category => "category",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cell value.
///
/// Serialized untagged, so YAML `true`, `3`, `1.5` and `A` map onto the
/// obvious variants. Floats compare by bit pattern, so NaN equals NaN.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Total order used to sort group keys and unique values.
    ///
    /// Values of different variants order as bool < number < string.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::Str(_) => 2,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Loose equality used when matching user-entered values against data:
    /// numbers compare numerically, everything else by its label.
    pub fn matches(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

/// Element-wise equality of float slices by bit pattern.
fn same_floats(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// The values of one column.
///
/// Equality is bit-for-bit: float columns holding NaN at the same rows
/// compare equal.
#[derive(Debug, Clone)]
pub enum ColumnData {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    /// Categorical values stored as codes into `levels`.
    Category { levels: Vec<String>, codes: Vec<u32> },
}

impl PartialEq for ColumnData {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ColumnData::Float(a), ColumnData::Float(b)) => same_floats(a, b),
            (ColumnData::Int(a), ColumnData::Int(b)) => a == b,
            (ColumnData::Bool(a), ColumnData::Bool(b)) => a == b,
            (
                ColumnData::Category { levels, codes },
                ColumnData::Category {
                    levels: other_levels,
                    codes: other_codes,
                },
            ) => levels == other_levels && codes == other_codes,
            _ => false,
        }
    }
}

impl ColumnData {
    /// Build a categorical column; `levels` fixes the category order and
    /// any label missing from it is appended.
    pub fn category(mut levels: Vec<String>, labels: &[String]) -> Self {
        let mut codes = Vec::with_capacity(labels.len());
        for label in labels {
            let code = match levels.iter().position(|l| l == label) {
                Some(pos) => pos,
                None => {
                    levels.push(label.clone());
                    levels.len() - 1
                }
            };
            codes.push(code as u32);
        }
        ColumnData::Category { levels, codes }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Category { codes, .. } => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ConditionKind {
        match self {
            ColumnData::Float(_) => ConditionKind::Float,
            ColumnData::Int(_) => ConditionKind::Int,
            ColumnData::Bool(_) => ConditionKind::Bool,
            ColumnData::Category { .. } => ConditionKind::Category,
        }
    }

    pub fn value(&self, row: usize) -> Value {
        match self {
            ColumnData::Float(v) => Value::Float(v[row]),
            ColumnData::Int(v) => Value::Int(v[row]),
            ColumnData::Bool(v) => Value::Bool(v[row]),
            ColumnData::Category { levels, codes } => {
                Value::Str(levels[codes[row] as usize].clone())
            }
        }
    }

    /// Numeric view of a cell, for range queries.
    pub fn as_f64(&self, row: usize) -> Option<f64> {
        match self {
            ColumnData::Float(v) => Some(v[row]),
            ColumnData::Int(v) => Some(v[row] as f64),
            _ => None,
        }
    }

    /// Category labels in level order, or `None` for non-categorical columns.
    pub fn levels(&self) -> Option<&[String]> {
        match self {
            ColumnData::Category { levels, .. } => Some(levels),
            _ => None,
        }
    }

    pub fn take(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Float(v) => ColumnData::Float(rows.iter().map(|&r| v[r]).collect()),
            ColumnData::Int(v) => ColumnData::Int(rows.iter().map(|&r| v[r]).collect()),
            ColumnData::Bool(v) => ColumnData::Bool(rows.iter().map(|&r| v[r]).collect()),
            ColumnData::Category { levels, codes } => ColumnData::Category {
                levels: levels.clone(),
                codes: rows.iter().map(|&r| codes[r]).collect(),
            },
        }
    }

    /// Number of rows carrying each label, in level order.
    pub fn value_counts(&self) -> Vec<(Value, usize)> {
        let mut counts: Vec<(Value, usize)> = Vec::new();
        if let ColumnData::Category { levels, codes } = self {
            let mut per_level = vec![0usize; levels.len()];
            for &code in codes {
                per_level[code as usize] += 1;
            }
            return levels
                .iter()
                .cloned()
                .map(Value::Str)
                .zip(per_level)
                .collect();
        }
        for row in 0..self.len() {
            let value = self.value(row);
            match counts.iter_mut().find(|(v, _)| *v == value) {
                Some((_, n)) => *n += 1,
                None => counts.push((value, 1)),
            }
        }
        counts.sort_by(|a, b| a.0.total_cmp(&b.0));
        counts
    }
}
