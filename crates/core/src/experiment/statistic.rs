use super::Value;

/// Statistics are keyed by `(operation name, statistic name)`.
pub type StatisticKey = (String, String);

/// A grouped statistic: one value per combination of the index conditions.
#[derive(Debug, Clone, Default)]
pub struct Statistic {
    /// Names of the conditions the statistic is grouped by.
    pub index: Vec<String>,
    pub rows: Vec<(Vec<Value>, f64)>,
}

/// Values compare by bit pattern, like float columns.
impl PartialEq for Statistic {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.rows.len() == other.rows.len()
            && self
                .rows
                .iter()
                .zip(&other.rows)
                .all(|((k, v), (ok, ov))| k == ok && v.to_bits() == ov.to_bits())
    }
}

impl Statistic {
    pub fn new(index: Vec<String>) -> Self {
        Self {
            index,
            rows: Vec::new(),
        }
    }

    pub fn get(&self, key: &[Value]) -> Option<f64> {
        self.rows
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, v)| *v)
    }

    /// Distinct values of one index level, in row order.
    pub fn level_values(&self, level: &str) -> Option<Vec<Value>> {
        let pos = self.index.iter().position(|l| l == level)?;
        let mut values: Vec<Value> = Vec::new();
        for (key, _) in &self.rows {
            if !values.contains(&key[pos]) {
                values.push(key[pos].clone());
            }
        }
        Some(values)
    }
}
