//! Active values of the swept parameters.
//!
//! Sequence code reads swept parameters through
//! [`VariableBindings::get_variable_parameter`] and every other parameter
//! straight from the [`ParameterSnapshot`]. Nothing is injected as a field.

use crate::error::{AppResult, ScanError};
use crate::parameters::ParameterSnapshot;
use crate::scan::spec::SequenceScan;

/// Current value of every swept parameter of one sub-sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableBindings {
    names: Vec<String>,
    values: Vec<f64>,
    selected: Option<String>,
}

impl VariableBindings {
    /// Initial bindings for `scan`.
    ///
    /// Axes that will be swept start at their first candidate value. In a 1-D
    /// scan the other declared axes keep their snapshot value (falling back to
    /// their first candidate when the snapshot has no number for them).
    pub fn new(scan: &SequenceScan, params: &ParameterSnapshot) -> Self {
        let selected = (!scan.is_ndim).then(|| scan.selected().map(str::to_string)).flatten();
        let mut names = Vec::with_capacity(scan.axes.len());
        let mut values = Vec::with_capacity(scan.axes.len());

        for (name, scannable) in &scan.axes {
            let first = scannable.values().first().copied().unwrap_or(0.0);
            let swept = scan.is_ndim || selected.as_deref() == Some(name.as_str());
            let value = if swept {
                first
            } else {
                params
                    .get(name)
                    .and_then(|v| v.as_f64())
                    .unwrap_or(first)
            };
            names.push(name.clone());
            values.push(value);
        }

        Self {
            names,
            values,
            selected,
        }
    }

    /// Value of swept parameter `name`
    pub fn get_variable_parameter(&self, name: &str) -> AppResult<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
            .ok_or_else(|| ScanError::NotScannable(name.to_string()))
    }

    /// Assign `value` to `name`.
    ///
    /// In a 1-D scan only the selected axis may change; returns whether the
    /// assignment took effect.
    pub fn set_variable_parameter(&mut self, name: &str, value: f64) -> bool {
        if let Some(selected) = &self.selected {
            if selected != name {
                return false;
            }
        }
        match self.names.iter().position(|n| n == name) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    /// Apply one scan point: one assignment per axis
    pub fn apply(&mut self, axis_names: &[String], point: &[f64]) {
        for (name, value) in axis_names.iter().zip(point) {
            self.set_variable_parameter(name, *value);
        }
    }

    /// Whether `name` is a swept parameter
    pub fn is_variable(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// `(name, value)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.names.iter().map(String::as_str).zip(self.values.iter().copied())
    }
}
