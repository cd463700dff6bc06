//! Declarative description of what each sub-sequence sweeps.
//!
//! A [`ScanSpec`] is built once when the experiment is constructed and handed to
//! the engine by value. It is never shared between engine instances.
//!
//! ```rust,ignore
//! let spec = ScanSpec::new()
//!     .sequence(
//!         "RabiFlopping",
//!         SequenceScan::new("Rabi")
//!             .axis("RabiFlopping.duration", Scannable::range(0.0, 50e-6, 51))
//!             .axis("RabiFlopping.detuning", Scannable::range(-1e3, 1e3, 11)),
//!     );
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ScanError};

/// Plot tab used for sub-sequences whose selected axis is a [`Scannable::NoScan`].
pub const CURRENT_TAB: &str = "Current";

/// Finite, restartable generator of candidate values for one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scannable {
    /// `npoints` values evenly spaced from `start` to `stop`, both inclusive
    Range {
        /// First value
        start: f64,
        /// Last value
        stop: f64,
        /// Number of points
        npoints: usize,
    },
    /// Explicit list of values, in the given order
    Explicit {
        /// Candidate values
        values: Vec<f64>,
    },
    /// The same value repeated; used to repeat an experiment without sweeping
    NoScan {
        /// The fixed value
        value: f64,
        /// Number of repetitions
        repetitions: usize,
    },
}

impl Scannable {
    /// Linear range
    pub fn range(start: f64, stop: f64, npoints: usize) -> Self {
        Scannable::Range {
            start,
            stop,
            npoints,
        }
    }

    /// Explicit list of values
    pub fn explicit(values: Vec<f64>) -> Self {
        Scannable::Explicit { values }
    }

    /// Repeat one value
    pub fn no_scan(value: f64, repetitions: usize) -> Self {
        Scannable::NoScan { value, repetitions }
    }

    /// Number of candidate values
    pub fn len(&self) -> usize {
        match self {
            Scannable::Range { npoints, .. } => *npoints,
            Scannable::Explicit { values } => values.len(),
            Scannable::NoScan { repetitions, .. } => *repetitions,
        }
    }

    /// Whether there are no candidate values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this axis repeats a fixed value
    pub fn is_no_scan(&self) -> bool {
        matches!(self, Scannable::NoScan { .. })
    }

    /// Candidate values in generation order
    pub fn values(&self) -> Vec<f64> {
        match self {
            Scannable::Range {
                start,
                stop,
                npoints,
            } => match *npoints {
                0 => Vec::new(),
                1 => vec![*start],
                n => {
                    let step = (stop - start) / (n - 1) as f64;
                    (0..n).map(|i| start + step * i as f64).collect()
                }
            },
            Scannable::Explicit { values } => values.clone(),
            Scannable::NoScan { value, repetitions } => vec![*value; *repetitions],
        }
    }

    /// Candidate values sorted ascending (1-D iteration order)
    pub fn sorted_values(&self) -> Vec<f64> {
        let mut values = self.values();
        values.sort_by(f64::total_cmp);
        values
    }
}

/// Scan definition for one named sub-sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceScan {
    /// Live-plot tab name
    pub plot_tab: String,
    /// Swept parameters, in declaration order
    pub axes: IndexMap<String, Scannable>,
    /// Active axis for 1-D scans; defaults to the first declared axis
    #[serde(default)]
    pub selected_axis: Option<String>,
    /// Sweep the Cartesian product of all axes instead of the selected axis
    #[serde(default)]
    pub is_ndim: bool,
}

impl SequenceScan {
    /// Empty scan plotting to `plot_tab`
    pub fn new(plot_tab: &str) -> Self {
        Self {
            plot_tab: plot_tab.to_string(),
            axes: IndexMap::new(),
            selected_axis: None,
            is_ndim: false,
        }
    }

    /// Add a swept parameter
    pub fn axis(mut self, name: &str, scannable: Scannable) -> Self {
        self.axes.insert(name.to_string(), scannable);
        self
    }

    /// Choose the active axis for a 1-D scan
    pub fn select(mut self, name: &str) -> Self {
        self.selected_axis = Some(name.to_string());
        self
    }

    /// Sweep the Cartesian product of all axes
    pub fn ndim(mut self) -> Self {
        self.is_ndim = true;
        self
    }

    /// Name of the active axis
    pub fn selected(&self) -> Option<&str> {
        self.selected_axis
            .as_deref()
            .or_else(|| self.axes.keys().next().map(String::as_str))
    }

    /// Candidate values of the active axis
    pub fn selected_scannable(&self) -> Option<&Scannable> {
        self.selected().and_then(|name| self.axes.get(name))
    }

    /// Plot tab, forced to [`CURRENT_TAB`] when the active axis does not sweep
    pub fn effective_plot_tab(&self) -> &str {
        match self.selected_scannable() {
            Some(s) if !self.is_ndim && s.is_no_scan() => CURRENT_TAB,
            _ => &self.plot_tab,
        }
    }

    fn validate(&self, seq_name: &str) -> AppResult<()> {
        if self.axes.is_empty() {
            return Err(ScanError::Configuration(format!(
                "Sub-sequence '{}' declares no scan axes",
                seq_name
            )));
        }
        for name in self.axes.keys() {
            if !name.contains('.') {
                return Err(ScanError::Configuration(format!(
                    "Sub-sequence '{}': axis '{}' must be of the form Collection.Name",
                    seq_name, name
                )));
            }
        }
        if let Some(selected) = &self.selected_axis {
            if !self.axes.contains_key(selected) {
                return Err(ScanError::Configuration(format!(
                    "Sub-sequence '{}': selected axis '{}' is not a declared axis",
                    seq_name, selected
                )));
            }
        }
        Ok(())
    }
}

/// Scan definitions for all sub-sequences, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSpec {
    sequences: IndexMap<String, SequenceScan>,
}

impl ScanSpec {
    /// Empty specification
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named sub-sequence
    pub fn sequence(mut self, seq_name: &str, scan: SequenceScan) -> Self {
        self.sequences.insert(seq_name.to_string(), scan);
        self
    }

    /// Sub-sequences in execution order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SequenceScan)> {
        self.sequences.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Look up one sub-sequence
    pub fn get(&self, seq_name: &str) -> Option<&SequenceScan> {
        self.sequences.get(seq_name)
    }

    /// Number of sub-sequences
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Whether no sub-sequence is declared
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// More than one sub-sequence; artifacts are then split per sub-sequence
    pub fn is_multi(&self) -> bool {
        self.sequences.len() > 1
    }

    /// Check structural invariants
    pub fn validate(&self) -> AppResult<()> {
        if self.sequences.is_empty() {
            return Err(ScanError::Configuration(
                "Scan specification declares no sub-sequences".to_string(),
            ));
        }
        for (seq_name, scan) in &self.sequences {
            scan.validate(seq_name)?;
        }
        Ok(())
    }
}
