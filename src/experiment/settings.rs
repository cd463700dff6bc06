//! Per-run readout settings resolved from the parameter snapshot.

use crate::error::{AppResult, ScanError};
use crate::hardware::CameraSettings;
use crate::parameters::ParameterSnapshot;
use crate::readout::{ReadoutMode, MAX_CAMERA_IONS};

/// Parameter keys read when a run is prepared.
pub mod keys {
    /// Readout mode name
    pub const READOUT_MODE: &str = "StateReadout.readout_mode";
    /// Repeat count per scan index
    pub const REPEATS: &str = "StateReadout.repeat_each_measurement";
    /// PMT count thresholds
    pub const THRESHOLDS: &str = "StateReadout.threshold_list";
    /// PMT gate length in seconds
    pub const PMT_DURATION: &str = "StateReadout.pmt_readout_duration";
    /// Camera exposure in seconds
    pub const CAMERA_DURATION: &str = "StateReadout.camera_readout_duration";
    /// Number of ions imaged
    pub const ION_NUMBER: &str = "IonsOnCamera.ion_number";
    /// Camera horizontal binning
    pub const HORIZONTAL_BIN: &str = "IonsOnCamera.horizontal_bin";
    /// Camera vertical binning
    pub const VERTICAL_BIN: &str = "IonsOnCamera.vertical_bin";
    /// Synchronize each shot to the mains phase
    pub const LINE_TRIGGER_ENABLED: &str = "line_trigger_settings.enabled";
    /// Delay after the mains edge in seconds
    pub const LINE_TRIGGER_OFFSET: &str = "line_trigger_settings.offset_duration";
}

/// Mains synchronization of each shot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LineTriggerSettings {
    /// Wait for a mains edge before every shot
    pub enabled: bool,
    /// Delay after the edge in seconds
    pub offset_s: f64,
}

/// Readout configuration shared by every sub-sequence of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Readout mode
    pub mode: ReadoutMode,
    /// Shots per scan index
    pub repetitions: usize,
    /// Increasing PMT thresholds (PMT modes)
    pub thresholds: Vec<f64>,
    /// PMT gate length in seconds
    pub pmt_duration_s: f64,
    /// Number of ions imaged (camera modes)
    pub ion_number: usize,
    /// Camera settings (camera modes)
    pub camera: Option<CameraSettings>,
    /// Mains synchronization
    pub line_trigger: LineTriggerSettings,
}

impl RunSettings {
    /// Resolve and check the readout settings
    pub fn from_parameters(params: &ParameterSnapshot) -> AppResult<Self> {
        let mode: ReadoutMode = params.str(keys::READOUT_MODE)?.parse()?;
        let repetitions = count(params, keys::REPEATS)?;
        if repetitions == 0 {
            return Err(ScanError::Configuration(format!(
                "{} must be at least 1",
                keys::REPEATS
            )));
        }

        let line_trigger = LineTriggerSettings {
            enabled: match params.get(keys::LINE_TRIGGER_ENABLED) {
                Some(_) => params.bool(keys::LINE_TRIGGER_ENABLED)?,
                None => false,
            },
            offset_s: match params.get(keys::LINE_TRIGGER_OFFSET) {
                Some(_) => params.f64(keys::LINE_TRIGGER_OFFSET)?,
                None => 0.0,
            },
        };

        if mode.uses_camera() {
            let ion_number = count(params, keys::ION_NUMBER)?;
            if ion_number == 0 || ion_number > MAX_CAMERA_IONS {
                return Err(ScanError::Configuration(format!(
                    "{} must be between 1 and {}, got {}",
                    keys::ION_NUMBER,
                    MAX_CAMERA_IONS,
                    ion_number
                )));
            }
            let mut camera = CameraSettings {
                exposure_s: params.f64(keys::CAMERA_DURATION)?,
                ..CameraSettings::default()
            };
            if params.contains(keys::HORIZONTAL_BIN) {
                camera.horizontal_bin = count(params, keys::HORIZONTAL_BIN)? as u32;
            }
            if params.contains(keys::VERTICAL_BIN) {
                camera.vertical_bin = count(params, keys::VERTICAL_BIN)? as u32;
            }
            return Ok(Self {
                mode,
                repetitions,
                thresholds: Vec::new(),
                pmt_duration_s: 0.0,
                ion_number,
                camera: Some(camera),
                line_trigger,
            });
        }

        let thresholds = match params.list(keys::THRESHOLDS) {
            Ok(_) => params.f64_list(keys::THRESHOLDS)?,
            Err(ScanError::ParameterType { .. }) => vec![params.f64(keys::THRESHOLDS)?],
            Err(e) => return Err(e),
        };
        if thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ScanError::Configuration(format!(
                "{} must be strictly increasing, got {:?}",
                keys::THRESHOLDS,
                thresholds
            )));
        }

        Ok(Self {
            mode,
            repetitions,
            thresholds,
            pmt_duration_s: params.f64(keys::PMT_DURATION)?,
            ion_number: 0,
            camera: None,
            line_trigger,
        })
    }
}

fn count(params: &ParameterSnapshot, key: &str) -> AppResult<usize> {
    let value = params.f64(key)?;
    if value < 0.0 || value.fract() != 0.0 {
        return Err(ScanError::Configuration(format!(
            "{} must be a non-negative integer, got {}",
            key, value
        )));
    }
    Ok(value as usize)
}
