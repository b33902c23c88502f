//! CSV tube import.
//!
//! Each tube is a CSV file with one column per channel and one row per
//! event, plus the values of the experimental conditions for that tube.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{ColumnData, ConditionKind, Experiment, ExperimentError, Value};

/// One tube: a data file and the condition values it was recorded under.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Tube {
    pub file: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, Value>,
}

/// The experiment built from a set of tubes, plus non-fatal problems.
#[derive(Debug)]
pub struct Imported {
    pub experiment: Experiment,
    pub warnings: Vec<String>,
}

struct TubeData {
    headers: Vec<String>,
    rows: Vec<Vec<f64>>,
}

fn read_tube(path: &Path) -> Result<TubeData, ExperimentError> {
    let display = path.display().to_string();
    let mut reader = csv::Reader::from_path(path).map_err(|source| ExperimentError::Csv {
        path: display.clone(),
        source,
    })?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|source| ExperimentError::Csv {
            path: display.clone(),
            source,
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|source| ExperimentError::Csv {
            path: display.clone(),
            source,
        })?;
        let row = record
            .iter()
            .map(|field| {
                field.trim().parse::<f64>().map_err(|e| {
                    ExperimentError::Import(format!(
                        "{display}: row {}: '{field}' is not a number: {e}",
                        line + 1
                    ))
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        rows.push(row);
    }
    Ok(TubeData { headers, rows })
}

fn convert(name: &str, kind: ConditionKind, value: &Value) -> Result<Value, ExperimentError> {
    let bad = || ExperimentError::Import(format!("condition '{name}': '{value}' is not {kind}"));
    Ok(match kind {
        ConditionKind::Bool => match value {
            Value::Bool(b) => Value::Bool(*b),
            Value::Str(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            Value::Str(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            _ => return Err(bad()),
        },
        ConditionKind::Int => match value {
            Value::Int(i) => Value::Int(*i),
            Value::Str(s) => Value::Int(s.parse().map_err(|_| bad())?),
            _ => return Err(bad()),
        },
        ConditionKind::Float => match value {
            Value::Str(s) => Value::Float(s.parse().map_err(|_| bad())?),
            other => Value::Float(other.as_f64().ok_or_else(bad)?),
        },
        ConditionKind::Category => Value::Str(value.to_string()),
    })
}

/// Read every tube into one experiment.
///
/// # Arguments
///
/// * `tubes` - Tubes to read, relative paths resolved against `base_dir`
/// * `conditions` - Condition names and kinds every tube must provide
/// * `channels` - Channel renames (file column -> experiment name); empty keeps all columns
/// * `events` - Events to keep per tube (the first N); 0 keeps everything
///
/// # Errors
///
/// Returns an error if a file cannot be read, the tubes disagree on their
/// channels, or a tube is missing a condition value.
pub fn import_tubes(
    tubes: &[Tube],
    conditions: &BTreeMap<String, ConditionKind>,
    channels: &BTreeMap<String, String>,
    events: usize,
    base_dir: &Path,
) -> Result<Imported, ExperimentError> {
    if tubes.is_empty() {
        return Err(ExperimentError::Import("no tubes to import".to_string()));
    }

    let mut warnings = Vec::new();
    let mut headers: Option<Vec<String>> = None;
    let mut data: Vec<Vec<f64>> = Vec::new();
    let mut condition_values: BTreeMap<&str, Vec<Value>> =
        conditions.keys().map(|k| (k.as_str(), Vec::new())).collect();

    for tube in tubes {
        let path = base_dir.join(&tube.file);
        let tube_data = read_tube(&path)?;
        match &headers {
            None => {
                data = vec![Vec::new(); tube_data.headers.len()];
                headers = Some(tube_data.headers.clone());
            }
            Some(h) if *h != tube_data.headers => {
                return Err(ExperimentError::Import(format!(
                    "{} has different channels than the first tube",
                    tube.file
                )));
            }
            Some(_) => {}
        }

        let mut rows = tube_data.rows;
        if events > 0 {
            if rows.len() < events {
                warnings.push(format!(
                    "Only {} events in tube {}, not {events}",
                    rows.len(),
                    tube.file
                ));
            }
            rows.truncate(events);
        }

        for (name, kind) in conditions {
            let value = tube.conditions.get(name).ok_or_else(|| {
                ExperimentError::Import(format!(
                    "tube {} has no value for condition '{name}'",
                    tube.file
                ))
            })?;
            let value = convert(name, *kind, value)?;
            if let Some(column) = condition_values.get_mut(name.as_str()) {
                column.extend(std::iter::repeat(value).take(rows.len()));
            }
        }

        for row in rows {
            for (column, value) in data.iter_mut().zip(row) {
                column.push(value);
            }
        }
    }

    let mut experiment = Experiment::new();
    for (header, values) in headers.unwrap_or_default().into_iter().zip(data) {
        let name = if channels.is_empty() {
            Some(header)
        } else {
            channels.get(&header).cloned()
        };
        if let Some(name) = name {
            experiment.add_channel(&name, values)?;
        }
    }

    for (name, kind) in conditions {
        let values = condition_values.remove(name.as_str()).unwrap_or_default();
        let column = match kind {
            ConditionKind::Bool => ColumnData::Bool(
                values.iter().map(|v| matches!(v, Value::Bool(true))).collect(),
            ),
            ConditionKind::Int => ColumnData::Int(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Int(i) => *i,
                        _ => 0,
                    })
                    .collect(),
            ),
            ConditionKind::Float => {
                ColumnData::Float(values.iter().filter_map(Value::as_f64).collect())
            }
            ConditionKind::Category => {
                let labels: Vec<String> = values.iter().map(Value::to_string).collect();
                ColumnData::category(Vec::new(), &labels)
            }
        };
        experiment.add_condition(name, column)?;
    }

    experiment.push_history("import");
    Ok(Imported {
        experiment,
        warnings,
    })
}
