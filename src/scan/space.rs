//! Flattened iteration space and the resumable cursor that walks it.
//!
//! The space is a flat array of scan points. For 1-D scans each point holds the
//! single selected-axis value, sorted ascending. For N-D scans the points are
//! the Cartesian product of all axes in lexicographic order (first declared
//! axis varies slowest).
//!
//! The cursor is a plain pair of integers. `outer` indexes the first axis and
//! `inner` indexes the product of the remaining axes, so a pause inside a
//! nested sweep is restored at exactly the same nesting depth.

use crate::error::{AppResult, ScanError};
use crate::scan::spec::{Scannable, SequenceScan};

/// Checkpoint into the iteration space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ScanPosition {
    /// Index along the slowest axis (the only index for 1-D scans)
    pub outer: usize,
    /// Index within the product of the remaining axes (always 0 for 1-D)
    pub inner: usize,
}

impl ScanPosition {
    /// Position at `(outer, inner)`
    pub fn new(outer: usize, inner: usize) -> Self {
        Self { outer, inner }
    }
}

impl std::fmt::Display for ScanPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.outer, self.inner)
    }
}

/// Every scan point of one sub-sequence, flattened.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationSpace {
    axis_names: Vec<String>,
    points: Vec<Vec<f64>>,
    inner_len: usize,
    is_ndim: bool,
}

impl IterationSpace {
    /// Sorted candidate values of a single axis
    pub fn one_dim(axis: &str, scannable: &Scannable) -> Self {
        Self {
            axis_names: vec![axis.to_string()],
            points: scannable
                .sorted_values()
                .into_iter()
                .map(|v| vec![v])
                .collect(),
            inner_len: 1,
            is_ndim: false,
        }
    }

    /// Lexicographic Cartesian product of all axes
    pub fn cartesian<'a, I>(axes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Scannable)>,
    {
        let mut axis_names = Vec::new();
        let mut points: Vec<Vec<f64>> = vec![Vec::new()];
        let mut lens = Vec::new();

        for (name, scannable) in axes {
            let values = scannable.values();
            lens.push(values.len());
            axis_names.push(name.to_string());
            points = points
                .iter()
                .flat_map(|prefix| {
                    values.iter().map(move |v| {
                        let mut point = prefix.clone();
                        point.push(*v);
                        point
                    })
                })
                .collect();
        }

        Self {
            axis_names,
            points,
            inner_len: lens.iter().skip(1).product(),
            is_ndim: true,
        }
    }

    /// Space for one sub-sequence, honouring its 1-D/N-D flag
    pub fn for_sequence(seq_name: &str, scan: &SequenceScan) -> AppResult<Self> {
        if scan.is_ndim {
            return Ok(Self::cartesian(
                scan.axes.iter().map(|(k, v)| (k.as_str(), v)),
            ));
        }
        let axis = scan.selected().ok_or_else(|| {
            ScanError::Configuration(format!("Sub-sequence '{}' has no axis to scan", seq_name))
        })?;
        let scannable = scan.axes.get(axis).ok_or_else(|| {
            ScanError::Configuration(format!(
                "Sub-sequence '{}': selected axis '{}' is not declared",
                seq_name, axis
            ))
        })?;
        Ok(Self::one_dim(axis, scannable))
    }

    /// Number of scan points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether there is nothing to scan
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether this is a Cartesian (N-D) space
    pub fn is_ndim(&self) -> bool {
        self.is_ndim
    }

    /// Names of the axes each point assigns, in point order
    pub fn axis_names(&self) -> &[String] {
        &self.axis_names
    }

    /// Values of the point at flat index `index`
    pub fn point(&self, index: usize) -> Option<&[f64]> {
        self.points.get(index).map(Vec::as_slice)
    }

    /// Length of the inner (nested) dimension
    pub fn inner_len(&self) -> usize {
        self.inner_len.max(1)
    }

    /// Checkpoint for flat index `index`
    pub fn position_of(&self, index: usize) -> ScanPosition {
        let inner_len = self.inner_len();
        ScanPosition::new(index / inner_len, index % inner_len)
    }
}

/// Resumable cursor over an [`IterationSpace`].
///
/// The cursor only moves when the engine saves a checkpoint, so re-entering the
/// loop always starts at the saved point rather than the one after it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCursor {
    position: ScanPosition,
    len: usize,
    inner_len: usize,
}

impl ScanCursor {
    /// Cursor at `(0, 0)`
    pub fn new(space: &IterationSpace) -> Self {
        Self {
            position: ScanPosition::default(),
            len: space.len(),
            inner_len: space.inner_len(),
        }
    }

    /// Current checkpoint
    pub fn position(&self) -> ScanPosition {
        self.position
    }

    /// Flat index the next loop entry starts from
    pub fn index(&self) -> usize {
        (self.position.outer * self.inner_len + self.position.inner).min(self.len)
    }

    /// Record that the next entry must start at flat index `index`
    pub fn save(&mut self, index: usize) {
        let index = index.min(self.len);
        self.position = ScanPosition::new(index / self.inner_len, index % self.inner_len);
    }

    /// Move past the last point
    pub fn finish(&mut self) {
        self.save(self.len);
    }

    /// Whether every point has been visited
    pub fn is_exhausted(&self) -> bool {
        self.index() >= self.len
    }
}
