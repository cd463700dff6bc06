//! Line-centre calibration and AOM drive-frequency calculation.
//!
//! The ten S-D carrier transitions drift; their current centres come from a
//! [`CalibrationSource`] and are refreshed on the same cadence results are
//! flushed. Sequences turn a transition, detuning and optional sideband into a
//! DDS drive frequency with [`FrequencyPlan::calc_frequency`].

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::config::DdsOffset;
use crate::error::{AppResult, ScanError};
use crate::parameters::ParameterSnapshot;

/// Centre frequency of the AOM chain in Hz
pub const AOM_CENTER_HZ: f64 = 220e6;

/// Collection holding secular trap frequencies in Hz
pub const TRAP_FREQUENCIES: &str = "TrapFrequencies";

/// Carrier transitions in table order.
pub const CARRIER_NAMES: [&str; 10] = [
    "S+1/2D-3/2",
    "S-1/2D-5/2",
    "S+1/2D-1/2",
    "S-1/2D-3/2",
    "S+1/2D+1/2",
    "S-1/2D-1/2",
    "S+1/2D+3/2",
    "S-1/2D+1/2",
    "S+1/2D+5/2",
    "S-1/2D+3/2",
];

/// Source of the current line-centre calibration.
#[async_trait]
pub trait CalibrationSource: Send {
    /// Current `(carrier, frequency_hz)` pairs; unknown carriers are ignored
    async fn current_lines(&mut self) -> anyhow::Result<Vec<(String, f64)>>;
}

/// Calibration that never changes.
#[derive(Debug, Clone, Default)]
pub struct StaticCalibration {
    lines: Vec<(String, f64)>,
}

impl StaticCalibration {
    /// Calibration returning `lines` on every refresh
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[async_trait]
impl CalibrationSource for StaticCalibration {
    async fn current_lines(&mut self) -> anyhow::Result<Vec<(String, f64)>> {
        Ok(self.lines.clone())
    }
}

/// Current centre of every carrier transition, 0 Hz when uncalibrated.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CarrierTable {
    values: [f64; 10],
}

impl CarrierTable {
    /// Table from calibration pairs
    pub fn from_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a (String, f64)>,
    {
        let mut values = [0.0; 10];
        for (carrier, frequency) in lines {
            if let Some(i) = Self::index_of(carrier) {
                values[i] = *frequency;
            }
        }
        Self { values }
    }

    /// Position of `carrier` in [`CARRIER_NAMES`]
    pub fn index_of(carrier: &str) -> Option<usize> {
        CARRIER_NAMES.iter().position(|name| *name == carrier)
    }

    /// Centre of `carrier` in Hz
    pub fn get(&self, carrier: &str) -> Option<f64> {
        Self::index_of(carrier).map(|i| self.values[i])
    }

    /// All centres in table order
    pub fn values(&self) -> &[f64; 10] {
        &self.values
    }

    /// Pull fresh values from `source`; on failure the table is left unchanged
    pub async fn refresh(&mut self, source: &mut dyn CalibrationSource) -> anyhow::Result<()> {
        let lines = source.current_lines().await?;
        *self = Self::from_lines(&lines);
        Ok(())
    }
}

/// Everything needed to turn a transition into a DDS drive frequency.
#[derive(Debug, Clone, Default)]
pub struct FrequencyPlan {
    /// Current carrier calibration
    pub carriers: CarrierTable,
    trap_frequencies: IndexMap<String, f64>,
    dds_offsets: IndexMap<String, DdsOffset>,
}

impl FrequencyPlan {
    /// Plan using `TrapFrequencies.*` from `params` and the configured DDS offsets
    pub fn new(
        carriers: CarrierTable,
        params: &ParameterSnapshot,
        dds_offsets: IndexMap<String, DdsOffset>,
    ) -> Self {
        let trap_frequencies = params
            .collection(TRAP_FREQUENCIES)
            .filter_map(|(name, value)| value.as_f64().map(|v| (name.to_string(), v)))
            .collect();
        Self {
            carriers,
            trap_frequencies,
            dds_offsets,
        }
    }

    /// AOM drive frequency in Hz for `line` detuned by `detuning_hz`.
    ///
    /// `sideband` adds `order` times the named trap frequency. `dds` adds that
    /// channel's offset and halves the result for a double-pass channel. The
    /// result is mirrored about [`AOM_CENTER_HZ`].
    pub fn calc_frequency(
        &self,
        line: &str,
        detuning_hz: f64,
        sideband: Option<(&str, f64)>,
        dds: Option<&str>,
    ) -> AppResult<f64> {
        let carrier = self.carriers.get(line).ok_or_else(|| {
            ScanError::Configuration(format!("Unknown carrier transition '{}'", line))
        })?;
        let mut freq = detuning_hz + carrier;

        if let Some((name, order)) = sideband {
            let trap = self.trap_frequencies.get(name).ok_or_else(|| {
                ScanError::MissingParameter(format!("{}.{}", TRAP_FREQUENCIES, name))
            })?;
            freq += trap * order;
        }

        if let Some(name) = dds {
            if let Some(offset) = self.dds_offsets.get(name) {
                freq += offset.offset_mhz * 1e6;
                if offset.double_pass {
                    freq /= 2.0;
                }
            }
        }

        Ok(AOM_CENTER_HZ - freq)
    }
}
