//! Results collected for one sub-sequence.

use std::ops::Range;

use crate::readout::ReducedPoint;
use crate::scan::IterationSpace;

/// Per-index results of one sub-sequence scan.
///
/// Series are sized to the scan length up front and filled with NaN, so a
/// point whose reduction failed stays NaN rather than shifting later points.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanData {
    seq_name: String,
    axis_names: Vec<String>,
    axis_values: Vec<Vec<f64>>,
    x: Vec<f64>,
    series_names: Vec<String>,
    series: Vec<Vec<f64>>,
    confidence: Option<Vec<f64>>,
    time: Vec<f64>,
    raw: Vec<Vec<u32>>,
    visited: Vec<usize>,
    flushed: usize,
}

impl ScanData {
    /// Empty results for `space`.
    ///
    /// `x_is_index` plots against the scan index instead of the first axis
    /// value (used for N-D scans and non-sweeping axes).
    pub fn new(
        seq_name: &str,
        space: &IterationSpace,
        x_is_index: bool,
        series_names: &[String],
        with_confidence: bool,
    ) -> Self {
        let len = space.len();
        let mut axis_values = vec![Vec::with_capacity(len); space.axis_names().len()];
        let mut x = Vec::with_capacity(len);
        for index in 0..len {
            let point = space.point(index).unwrap_or_default();
            for (column, value) in axis_values.iter_mut().zip(point) {
                column.push(*value);
            }
            let first = point.first().copied().unwrap_or(f64::NAN);
            x.push(if x_is_index { index as f64 } else { first });
        }

        Self {
            seq_name: seq_name.to_string(),
            axis_names: space.axis_names().to_vec(),
            axis_values,
            x,
            series_names: series_names.to_vec(),
            series: vec![vec![f64::NAN; len]; series_names.len()],
            confidence: with_confidence.then(|| vec![f64::NAN; len]),
            time: vec![f64::NAN; len],
            raw: vec![Vec::new(); len],
            visited: Vec::with_capacity(len),
            flushed: 0,
        }
    }

    /// Sub-sequence name
    pub fn seq_name(&self) -> &str {
        &self.seq_name
    }

    /// Number of scan points
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Whether the scan has no points
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Plot x value per index
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Swept parameter names
    pub fn axis_names(&self) -> &[String] {
        &self.axis_names
    }

    /// Values of one swept parameter per index
    pub fn axis(&self, name: &str) -> Option<&[f64]> {
        self.axis_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.axis_values[i].as_slice())
    }

    /// Reduced series names
    pub fn series_names(&self) -> &[String] {
        &self.series_names
    }

    /// One reduced series
    pub fn series(&self, name: &str) -> Option<&[f64]> {
        self.series_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.series[i].as_slice())
    }

    /// Mean detector confidence per index (camera readout only)
    pub fn confidence(&self) -> Option<&[f64]> {
        self.confidence.as_deref()
    }

    /// Elapsed seconds per index
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Raw counts of one index (empty for camera readout)
    pub fn raw_counts(&self, index: usize) -> &[u32] {
        self.raw.get(index).map(Vec::as_slice).unwrap_or_default()
    }

    /// Indices in the order they were processed
    pub fn visited(&self) -> &[usize] {
        &self.visited
    }

    /// Number of leading indices already flushed
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// Store the results of one index
    pub fn record(
        &mut self,
        index: usize,
        raw_counts: Vec<u32>,
        reduced: Option<&ReducedPoint>,
        elapsed_s: f64,
    ) {
        if index >= self.len() {
            return;
        }
        self.visited.push(index);
        self.raw[index] = raw_counts;
        self.time[index] = elapsed_s;
        if let Some(point) = reduced {
            for (column, value) in self.series.iter_mut().zip(&point.values) {
                column[index] = *value;
            }
            if let (Some(confidence), Some(value)) = (self.confidence.as_mut(), point.confidence) {
                confidence[index] = value;
            }
        }
    }

    /// Raw counts of `range`, concatenated
    pub fn raw_batch(&self, range: Range<usize>) -> Vec<u32> {
        self.raw[range].iter().flatten().copied().collect()
    }

    /// `(dataset, values)` of every dataset for `range`, axes first
    pub fn batch(&self, range: Range<usize>) -> Vec<(String, Vec<f64>)> {
        let mut out = Vec::new();
        for (name, values) in self.axis_names.iter().zip(&self.axis_values) {
            out.push((name.clone(), values[range.clone()].to_vec()));
        }
        for (name, values) in self.series_names.iter().zip(&self.series) {
            out.push((name.clone(), values[range.clone()].to_vec()));
        }
        out.push((crate::sink::TIME_DATASET.to_string(), self.time[range.clone()].to_vec()));
        if let Some(confidence) = &self.confidence {
            out.push((
                crate::sink::CONFIDENCE_DATASET.to_string(),
                confidence[range].to_vec(),
            ));
        }
        out
    }

    /// Record that everything before `end` has been flushed
    pub fn mark_flushed(&mut self, end: usize) {
        self.flushed = end.min(self.len()).max(self.flushed);
    }

    /// Forget all raw readings
    pub fn discard_raw(&mut self) {
        self.raw.iter_mut().for_each(Vec::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::Scannable;

    fn data() -> ScanData {
        let space = IterationSpace::one_dim("A.x", &Scannable::explicit(vec![3.0, 1.0, 2.0]));
        ScanData::new(
            "A",
            &space,
            false,
            &["dark_ions:0".to_string(), "dark_ions:1".to_string()],
            false,
        )
    }

    #[test]
    fn test_series_start_as_nan() {
        let data = data();
        assert_eq!(data.x(), &[1.0, 2.0, 3.0]);
        assert!(data.series("dark_ions:0").unwrap().iter().all(|v| v.is_nan()));
        assert!(data.confidence().is_none());
    }

    #[test]
    fn test_record_and_batch() {
        let mut data = data();
        let point = ReducedPoint {
            values: vec![0.25, 0.75],
            confidence: None,
        };
        data.record(1, vec![1, 9], Some(&point), 0.5);
        data.record(0, vec![2], None, 0.1);

        assert_eq!(data.visited(), &[1, 0]);
        assert_eq!(data.series("dark_ions:1").unwrap()[1], 0.75);
        assert!(data.series("dark_ions:1").unwrap()[0].is_nan());
        assert_eq!(data.raw_batch(0..2), vec![2, 1, 9]);

        let batch = data.batch(0..2);
        let names: Vec<&str> = batch.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["A.x", "dark_ions:0", "dark_ions:1", "time"]);
        assert_eq!(batch[3].1, vec![0.1, 0.5]);

        data.discard_raw();
        assert!(data.raw_counts(1).is_empty());
    }

    #[test]
    fn test_index_x_for_ndim() {
        let a = Scannable::explicit(vec![1.0, 2.0]);
        let b = Scannable::explicit(vec![5.0, 6.0]);
        let space = IterationSpace::cartesian([("A.a", &a), ("A.b", &b)]);
        let data = ScanData::new("A", &space, true, &[], false);
        assert_eq!(data.x(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(data.axis("A.b").unwrap(), &[5.0, 6.0, 5.0, 6.0]);
    }
}
