//! Notebook code generation.
//!
//! Operations and views render their current configuration as Python calls
//! against the `cytoflow` library, so a GUI session can be replayed outside
//! the GUI. [`PyCall`] builds one call; [`Notebook`] assembles the cells of
//! an nbformat 4 document.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::experiment::{Scale, Value};

/// Render a value the way Python's `repr` would.
pub trait PyRepr {
    fn py_repr(&self) -> String;
}

impl PyRepr for str {
    fn py_repr(&self) -> String {
        let escaped = self.replace('\\', "\\\\").replace('\'', "\\'");
        format!("'{escaped}'")
    }
}

impl PyRepr for String {
    fn py_repr(&self) -> String {
        self.as_str().py_repr()
    }
}

impl PyRepr for f64 {
    fn py_repr(&self) -> String {
        if self.is_nan() {
            "float('nan')".to_string()
        } else if self.is_infinite() {
            if *self > 0.0 { "float('inf')" } else { "float('-inf')" }.to_string()
        } else {
            format!("{self:?}")
        }
    }
}

impl PyRepr for bool {
    fn py_repr(&self) -> String {
        if *self { "True" } else { "False" }.to_string()
    }
}

impl PyRepr for usize {
    fn py_repr(&self) -> String {
        self.to_string()
    }
}

impl PyRepr for u32 {
    fn py_repr(&self) -> String {
        self.to_string()
    }
}

impl PyRepr for Value {
    fn py_repr(&self) -> String {
        match self {
            Value::Bool(b) => b.py_repr(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.py_repr(),
            Value::Str(s) => s.py_repr(),
        }
    }
}

impl PyRepr for Scale {
    fn py_repr(&self) -> String {
        self.as_str().py_repr()
    }
}

impl<T: PyRepr> PyRepr for Vec<T> {
    fn py_repr(&self) -> String {
        let items: Vec<String> = self.iter().map(PyRepr::py_repr).collect();
        format!("[{}]", items.join(", "))
    }
}

impl<A: PyRepr, B: PyRepr> PyRepr for (A, B) {
    fn py_repr(&self) -> String {
        format!("({}, {})", self.0.py_repr(), self.1.py_repr())
    }
}

impl<A: PyRepr, B: PyRepr, C: PyRepr> PyRepr for (A, B, C) {
    fn py_repr(&self) -> String {
        format!(
            "({}, {}, {})",
            self.0.py_repr(),
            self.1.py_repr(),
            self.2.py_repr()
        )
    }
}

impl<T: PyRepr> PyRepr for BTreeMap<String, T> {
    fn py_repr(&self) -> String {
        let items: Vec<String> = self
            .iter()
            .map(|(k, v)| format!("{}: {}", k.py_repr(), v.py_repr()))
            .collect();
        format!("{{{}}}", items.join(", "))
    }
}

/// A Python call expression with keyword arguments.
#[derive(Debug, Clone)]
pub struct PyCall {
    callee: String,
    args: Vec<(String, String)>,
}

impl PyCall {
    pub fn new(callee: impl Into<String>) -> Self {
        Self {
            callee: callee.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<T: PyRepr + ?Sized>(mut self, name: &str, value: &T) -> Self {
        self.args.push((name.to_string(), value.py_repr()));
        self
    }

    /// Add an argument only when it differs from the library default.
    pub fn arg_unless<T: PyRepr + PartialEq + ?Sized>(self, name: &str, value: &T, default: &T) -> Self {
        if value == default {
            self
        } else {
            self.arg(name, value)
        }
    }

    /// Add an argument whose value is already Python source.
    pub fn raw(mut self, name: &str, source: impl Into<String>) -> Self {
        self.args.push((name.to_string(), source.into()));
        self
    }

    pub fn render(&self) -> String {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|(name, value)| format!("{name} = {value}"))
            .collect();
        format!("{}({})", self.callee, args.join(", "))
    }
}

/// Code for an operation cell: construct the operation, optionally
/// estimate it, and apply it to the upstream experiment.
pub fn operation_code(
    idx: usize,
    prev_idx: Option<usize>,
    call: &PyCall,
    estimate_subset: Option<&str>,
) -> String {
    let mut lines = vec![format!("op_{idx} = {}", call.render())];
    let input = prev_idx.map(|p| format!("ex_{p}")).unwrap_or_default();
    if let Some(subset) = estimate_subset {
        let subset_arg = if subset.is_empty() {
            String::new()
        } else {
            format!(", subset = {}", subset.py_repr())
        };
        lines.push(format!("op_{idx}.estimate({input}{subset_arg})"));
    }
    lines.push(format!("ex_{idx} = op_{idx}.apply({input})"));
    lines.join("\n")
}

#[derive(Debug, Clone, Serialize)]
struct Cell {
    cell_type: &'static str,
    metadata: serde_json::Map<String, serde_json::Value>,
    source: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outputs: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_count: Option<serde_json::Value>,
}

/// An nbformat 4 notebook.
#[derive(Debug, Clone, Default)]
pub struct Notebook {
    cells: Vec<Cell>,
}

impl Notebook {
    pub fn new() -> Self {
        Self::default()
    }

    fn split_source(text: &str) -> Vec<String> {
        let lines: Vec<&str> = text.split('\n').collect();
        let last = lines.len().saturating_sub(1);
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                if i == last {
                    line.to_string()
                } else {
                    format!("{line}\n")
                }
            })
            .collect()
    }

    pub fn push_code(&mut self, source: &str) {
        self.cells.push(Cell {
            cell_type: "code",
            metadata: serde_json::Map::new(),
            source: Self::split_source(source),
            outputs: Some(Vec::new()),
            execution_count: Some(serde_json::Value::Null),
        });
    }

    pub fn push_markdown(&mut self, source: &str) {
        self.cells.push(Cell {
            cell_type: "markdown",
            metadata: serde_json::Map::new(),
            source: Self::split_source(source),
            outputs: None,
            execution_count: None,
        });
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The notebook as nbformat 4 JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "cells": self.cells,
            "metadata": {
                "kernelspec": {
                    "display_name": "Python 3",
                    "language": "python",
                    "name": "python3"
                },
                "language_info": { "name": "python" }
            },
            "nbformat": 4,
            "nbformat_minor": 4
        })
    }

    /// All code cells joined into one script.
    pub fn to_script(&self) -> String {
        self.cells
            .iter()
            .filter(|c| c.cell_type == "code")
            .map(|c| c.source.concat())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
