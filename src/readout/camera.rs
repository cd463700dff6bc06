//! Camera frames and the ion-state detector seam.

use serde::{Deserialize, Serialize};

use super::ReadoutMode;

/// One camera exposure of the ion region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Width in binned pixels
    pub width: u32,
    /// Height in binned pixels
    pub height: u32,
    /// Row-major pixel counts
    pub pixels: Vec<u16>,
}

impl Frame {
    /// Frame of `width x height` pixels
    pub fn new(width: u32, height: u32, pixels: Vec<u16>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Sum of all pixel counts
    pub fn total_counts(&self) -> u64 {
        self.pixels.iter().map(|&p| u64::from(p)).sum()
    }
}

/// Result of ion-state detection on one kinetic series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IonStateEstimate {
    /// Per-ion excitation (`camera`), per-state occupancy (`camera_states`),
    /// or per-state occupancy followed by parity (`camera_parity`)
    pub probabilities: Vec<f64>,
    /// Per-shot detection confidence
    pub confidences: Vec<f64>,
}

impl IonStateEstimate {
    /// Mean of the per-shot confidences, NaN when none were reported
    pub fn mean_confidence(&self) -> f64 {
        if self.confidences.is_empty() {
            return f64::NAN;
        }
        self.confidences.iter().sum::<f64>() / self.confidences.len() as f64
    }
}

/// Image processing that turns frames into ion-state probabilities.
///
/// Implementations must be pure: the same frames give the same estimate.
pub trait IonStateDetector: Send + Sync {
    /// Estimate ion states from `repetitions` frames
    fn estimate(
        &self,
        frames: &[Frame],
        repetitions: usize,
        mode: ReadoutMode,
    ) -> anyhow::Result<IonStateEstimate>;
}
