//! Readout reduction: raw per-repetition readings to display-ready series.
//!
//! Reduction is a pure function of the raw batch and the readout mode. PMT
//! modes bucket photon counts by an ordered threshold list; camera modes hand
//! the frames to an external [`IonStateDetector`].
//!
//! # Series produced per mode
//!
//! | mode            | series                                        |
//! |-----------------|-----------------------------------------------|
//! | `pmt`           | `dark_ions:0` … `dark_ions:<thresholds>`      |
//! | `pmt_parity`    | as `pmt`, plus `parity`                       |
//! | `camera`        | `ion number:0` … `ion number:<n-1>`           |
//! | `camera_states` | one per basis state (`SS`, `DS`, `SD`, `DD` …) |
//! | `camera_parity` | as `camera_states`, plus `parity`             |

pub mod camera;

use std::str::FromStr;
use std::sync::Arc;

use crate::error::{AppResult, ScanError};

pub use camera::{Frame, IonStateDetector, IonStateEstimate};

/// Name of the parity series
pub const PARITY_SERIES: &str = "parity";

/// How the state of the ions is read out after each shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadoutMode {
    /// PMT photon counting with threshold discrimination
    Pmt,
    /// PMT threshold discrimination plus parity
    PmtParity,
    /// Camera, per-ion excitation
    Camera,
    /// Camera, occupancy of every multi-ion basis state
    CameraStates,
    /// Camera basis-state occupancy plus parity
    CameraParity,
}

impl ReadoutMode {
    /// Whether readout uses the camera
    pub fn uses_camera(&self) -> bool {
        matches!(
            self,
            ReadoutMode::Camera | ReadoutMode::CameraStates | ReadoutMode::CameraParity
        )
    }

    /// Whether a parity series is produced
    pub fn has_parity(&self) -> bool {
        matches!(self, ReadoutMode::PmtParity | ReadoutMode::CameraParity)
    }

    /// Whether Cartesian (N-D) scans can be reduced in this mode
    pub fn supports_ndim(&self) -> bool {
        matches!(self, ReadoutMode::Pmt)
    }

    /// Parameter-store spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadoutMode::Pmt => "pmt",
            ReadoutMode::PmtParity => "pmt_parity",
            ReadoutMode::Camera => "camera",
            ReadoutMode::CameraStates => "camera_states",
            ReadoutMode::CameraParity => "camera_parity",
        }
    }
}

impl FromStr for ReadoutMode {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pmt" => Ok(ReadoutMode::Pmt),
            "pmt_parity" => Ok(ReadoutMode::PmtParity),
            "camera" => Ok(ReadoutMode::Camera),
            "camera_states" => Ok(ReadoutMode::CameraStates),
            "camera_parity" => Ok(ReadoutMode::CameraParity),
            other => Err(ScanError::Configuration(format!(
                "Unknown readout mode '{}'. Must be one of: pmt, pmt_parity, camera, camera_states, camera_parity",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ReadoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw readings of one scan index, one entry per repetition.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBatch {
    /// PMT photon counts
    Counts(Vec<u32>),
    /// Camera frames of a kinetic series
    Frames(Vec<Frame>),
}

impl RawBatch {
    /// Number of repetitions in the batch
    pub fn len(&self) -> usize {
        match self {
            RawBatch::Counts(c) => c.len(),
            RawBatch::Frames(f) => f.len(),
        }
    }

    /// Whether the batch holds no readings
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Photon counts, if this is a PMT batch
    pub fn counts(&self) -> Option<&[u32]> {
        match self {
            RawBatch::Counts(c) => Some(c),
            RawBatch::Frames(_) => None,
        }
    }
}

/// Reduced values of one scan index, aligned with [`Reducer::series_names`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedPoint {
    /// One value per series
    pub values: Vec<f64>,
    /// Mean detector confidence (camera modes only)
    pub confidence: Option<f64>,
}

/// Fraction of readings falling in each threshold bucket.
///
/// `thresholds` must be increasing. Bucket `k` holds readings `c` with
/// `thresholds[k-1] < c <= thresholds[k]`; the last bucket is unbounded above.
/// Returns `thresholds.len() + 1` fractions of `counts.len()`.
pub fn threshold_occupancies(counts: &[u32], thresholds: &[f64]) -> Vec<f64> {
    let n = counts.len();
    if n == 0 {
        return vec![0.0; thresholds.len() + 1];
    }

    let mut sorted = counts.to_vec();
    sorted.sort_unstable();

    let mut edges = Vec::with_capacity(thresholds.len() + 2);
    edges.push(0);
    for &threshold in thresholds {
        edges.push(sorted.partition_point(|&c| f64::from(c) <= threshold));
    }
    edges.push(n);

    edges
        .windows(2)
        .map(|w| w[1].saturating_sub(w[0]) as f64 / n as f64)
        .collect()
}

/// Alternating signed sum over buckets: even index `+`, odd index `-`.
pub fn parity(occupancies: &[f64]) -> f64 {
    occupancies
        .iter()
        .enumerate()
        .map(|(k, p)| if k % 2 == 0 { *p } else { -*p })
        .sum()
}

/// Largest ion count the camera readout modes accept
pub const MAX_CAMERA_IONS: usize = 12;

/// Basis-state labels for `n_ions` ions, ion 0 first; `S` bright, `D` dark.
///
/// Callers keep `n_ions` at or below [`MAX_CAMERA_IONS`].
///
/// State `i` assigns ion `k` the `k`-th bit of `i`, so for two ions the order is
/// `SS`, `DS`, `SD`, `DD`.
pub fn camera_state_labels(n_ions: usize) -> Vec<String> {
    (0..1usize << n_ions)
        .map(|state| {
            (0..n_ions)
                .map(|ion| if state >> ion & 1 == 0 { 'S' } else { 'D' })
                .collect()
        })
        .collect()
}

/// Mode-specific reduction of raw batches.
///
/// A reducer holds only configuration; [`Reducer::reduce`] takes `&self` and
/// the same input always yields the same output.
#[derive(Clone)]
pub struct Reducer {
    mode: ReadoutMode,
    thresholds: Vec<f64>,
    n_ions: usize,
    detector: Option<Arc<dyn IonStateDetector>>,
    series: Vec<String>,
}

impl std::fmt::Debug for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reducer")
            .field("mode", &self.mode)
            .field("thresholds", &self.thresholds)
            .field("n_ions", &self.n_ions)
            .field("detector", &self.detector.is_some())
            .finish()
    }
}

impl Reducer {
    /// PMT reducer bucketing by `thresholds`
    pub fn pmt(mode: ReadoutMode, thresholds: Vec<f64>) -> AppResult<Self> {
        if mode.uses_camera() {
            return Err(ScanError::Configuration(format!(
                "Readout mode '{}' needs a camera reducer",
                mode
            )));
        }
        let mut series: Vec<String> = (0..=thresholds.len())
            .map(|k| format!("dark_ions:{}", k))
            .collect();
        if mode.has_parity() {
            series.push(PARITY_SERIES.to_string());
        }
        Ok(Self {
            mode,
            thresholds,
            n_ions: 0,
            detector: None,
            series,
        })
    }

    /// Camera reducer delegating to `detector`
    pub fn camera(
        mode: ReadoutMode,
        n_ions: usize,
        detector: Arc<dyn IonStateDetector>,
    ) -> AppResult<Self> {
        if !mode.uses_camera() {
            return Err(ScanError::Configuration(format!(
                "Readout mode '{}' does not use the camera",
                mode
            )));
        }
        if n_ions == 0 || n_ions > MAX_CAMERA_IONS {
            return Err(ScanError::Configuration(format!(
                "IonsOnCamera.ion_number must be between 1 and {}, got {}",
                MAX_CAMERA_IONS, n_ions
            )));
        }
        let mut series: Vec<String> = match mode {
            ReadoutMode::Camera => (0..n_ions).map(|k| format!("ion number:{}", k)).collect(),
            _ => camera_state_labels(n_ions),
        };
        if mode.has_parity() {
            series.push(PARITY_SERIES.to_string());
        }
        Ok(Self {
            mode,
            thresholds: Vec::new(),
            n_ions,
            detector: Some(detector),
            series,
        })
    }

    /// Readout mode
    pub fn mode(&self) -> ReadoutMode {
        self.mode
    }

    /// Names of the series produced, in value order
    pub fn series_names(&self) -> &[String] {
        &self.series
    }

    /// Reduce one scan index worth of raw readings
    pub fn reduce(&self, raw: &RawBatch) -> AppResult<ReducedPoint> {
        match (raw, &self.detector) {
            (RawBatch::Counts(counts), None) => {
                let mut values = threshold_occupancies(counts, &self.thresholds);
                if self.mode.has_parity() {
                    values.push(parity(&values));
                }
                Ok(ReducedPoint {
                    values,
                    confidence: None,
                })
            }
            (RawBatch::Frames(frames), Some(detector)) => {
                let estimate = detector
                    .estimate(frames, frames.len(), self.mode)
                    .map_err(|e| ScanError::Reduction(e.to_string()))?;
                if estimate.probabilities.len() < self.series.len() {
                    return Err(ScanError::Reduction(format!(
                        "Ion-state detector returned {} values, expected {}",
                        estimate.probabilities.len(),
                        self.series.len()
                    )));
                }
                let values = if self.mode.has_parity() {
                    let states = self.series.len() - 1;
                    let mut values = estimate.probabilities[..states].to_vec();
                    // the detector reports parity as its last value
                    values.push(estimate.probabilities.last().copied().unwrap_or(f64::NAN));
                    values
                } else {
                    estimate.probabilities[..self.series.len()].to_vec()
                };
                Ok(ReducedPoint {
                    values,
                    confidence: Some(estimate.mean_confidence()),
                })
            }
            _ => Err(ScanError::Reduction(format!(
                "Raw batch does not match readout mode '{}'",
                self.mode
            ))),
        }
    }
}
