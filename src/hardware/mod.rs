//! Hardware handles driven by the scan engine.
//!
//! Each device is a small async trait so the engine can run against real
//! drivers or the simulated devices in [`mock`]. Every call returns
//! [`DeviceError`]; the engine treats all device failures as fatal except a
//! single retry of an underflowing initialization (see [`reinit`]).
//!
//! # Devices
//!
//! - [`RealtimeCore`] - timeline control (`reset`, `break_realtime`)
//! - [`Cpld`] / [`DdsChannel`] - RF sources restored to continuous-wave on exit
//! - [`Pmt`] - photon counter gated for a readout window
//! - [`LineTrigger`] - mains-phase edge detector
//! - [`Camera`] - kinetic-series camera readout

pub mod cw;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::DeviceError;
use crate::readout::Frame;

pub use cw::{CwChannel, CwSnapshot};

/// Timeline of the real-time controller.
#[async_trait]
pub trait RealtimeCore: Send {
    /// Clear pending events and reset the timeline
    async fn reset(&mut self) -> Result<(), DeviceError>;

    /// Move the timeline cursor far enough ahead of wall-clock to avoid underflow
    async fn break_realtime(&mut self) -> Result<(), DeviceError>;

    /// Move the timeline cursor to `t_mu` machine units
    async fn at_mu(&mut self, t_mu: i64) -> Result<(), DeviceError>;

    /// Convert seconds to machine units (1 ns)
    fn seconds_to_mu(&self, seconds: f64) -> i64 {
        (seconds * 1e9).round() as i64
    }
}

/// Anything with a named (re-)initialization step.
#[async_trait]
pub trait Initialize: Send {
    /// Device name used in logs and errors
    fn name(&self) -> &str;

    /// Bring the device into a known state
    async fn init(&mut self) -> Result<(), DeviceError>;
}

/// Clock and attenuator controller shared by a group of DDS channels.
pub trait Cpld: Initialize {}

/// Single DDS output channel.
#[async_trait]
pub trait DdsChannel: Initialize {
    /// Program frequency (Hz) and amplitude (full scale 1.0)
    async fn set(&mut self, frequency_hz: f64, amplitude: f64) -> Result<(), DeviceError>;

    /// Program the output attenuation in dB
    async fn set_att(&mut self, attenuation_db: f64) -> Result<(), DeviceError>;

    /// Open or close the RF switch
    async fn switch(&mut self, on: bool) -> Result<(), DeviceError>;
}

/// Photon counter.
#[async_trait]
pub trait Pmt: Send {
    /// Count photons for `duration_s` seconds
    async fn count(&mut self, duration_s: f64) -> Result<u32, DeviceError>;
}

/// Mains line-phase detector.
#[async_trait]
pub trait LineTrigger: Send {
    /// Open a gate for `window` and return the rising-edge timestamp in
    /// machine units, or `None` if no edge arrived
    async fn gate_rising(&mut self, window: Duration) -> Result<Option<i64>, DeviceError>;
}

/// Region and exposure applied to the camera for a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    /// Exposure per shot in seconds
    pub exposure_s: f64,
    /// Horizontal binning
    pub horizontal_bin: u32,
    /// Vertical binning
    pub vertical_bin: u32,
    /// Inclusive image region `(h_min, h_max, v_min, v_max)`
    pub region: (u32, u32, u32, u32),
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            exposure_s: 0.1,
            horizontal_bin: 1,
            vertical_bin: 1,
            region: (0, 511, 0, 511),
        }
    }
}

/// Camera used in kinetic-series mode.
#[async_trait]
pub trait Camera: Send {
    /// Apply scan settings; the previous settings are kept for [`Camera::restore`]
    async fn configure(&mut self, settings: &CameraSettings) -> Result<(), DeviceError>;

    /// Abort any acquisition, arm for `kinetics` frames and start acquiring
    async fn prepare(&mut self, kinetics: usize) -> Result<(), DeviceError>;

    /// Fire one external trigger and wait out the exposure
    async fn trigger(&mut self) -> Result<(), DeviceError>;

    /// Whether the kinetic series has completed
    async fn wait_for_kinetic(&mut self) -> Result<bool, DeviceError>;

    /// Read the last `count` frames
    async fn get_acquired_data(&mut self, count: usize) -> Result<Vec<Frame>, DeviceError>;

    /// Stop acquiring
    async fn abort_acquisition(&mut self) -> Result<(), DeviceError>;

    /// Put back the settings in force before [`Camera::configure`]
    async fn restore(&mut self) -> Result<(), DeviceError>;
}

/// Every device the engine may drive, owned by the engine for the whole run.
pub struct Hardware {
    /// Real-time controller
    pub core: Box<dyn RealtimeCore>,
    /// CPLDs, initialized before any DDS channel
    pub cplds: Vec<Box<dyn Cpld>>,
    /// DDS channels by name
    pub dds: IndexMap<String, Box<dyn DdsChannel>>,
    /// Photon counter, required for PMT readout
    pub pmt: Option<Box<dyn Pmt>>,
    /// Mains trigger, required when line triggering is enabled
    pub line_trigger: Option<Box<dyn LineTrigger>>,
    /// Camera, required for camera readout
    pub camera: Option<Box<dyn Camera>>,
}

impl Hardware {
    /// Hardware with only a real-time core
    pub fn new(core: Box<dyn RealtimeCore>) -> Self {
        Self {
            core,
            cplds: Vec::new(),
            dds: IndexMap::new(),
            pmt: None,
            line_trigger: None,
            camera: None,
        }
    }

    /// Add a CPLD
    pub fn with_cpld(mut self, cpld: Box<dyn Cpld>) -> Self {
        self.cplds.push(cpld);
        self
    }

    /// Add a DDS channel under its own name
    pub fn with_dds(mut self, dds: Box<dyn DdsChannel>) -> Self {
        self.dds.insert(dds.name().to_string(), dds);
        self
    }

    /// Attach the photon counter
    pub fn with_pmt(mut self, pmt: Box<dyn Pmt>) -> Self {
        self.pmt = Some(pmt);
        self
    }

    /// Attach the mains trigger
    pub fn with_line_trigger(mut self, trigger: Box<dyn LineTrigger>) -> Self {
        self.line_trigger = Some(trigger);
        self
    }

    /// Attach the camera
    pub fn with_camera(mut self, camera: Box<dyn Camera>) -> Self {
        self.camera = Some(camera);
        self
    }

    /// DDS channel by name
    pub fn dds_mut(&mut self, name: &str) -> Result<&mut Box<dyn DdsChannel>, DeviceError> {
        self.dds
            .get_mut(name)
            .ok_or_else(|| DeviceError::NotConfigured(name.to_string()))
    }

    /// Photon counter
    pub fn pmt_mut(&mut self) -> Result<&mut Box<dyn Pmt>, DeviceError> {
        self.pmt
            .as_mut()
            .ok_or_else(|| DeviceError::NotConfigured("pmt".to_string()))
    }

    /// Camera
    pub fn camera_mut(&mut self) -> Result<&mut Box<dyn Camera>, DeviceError> {
        self.camera
            .as_mut()
            .ok_or_else(|| DeviceError::NotConfigured("camera".to_string()))
    }
}

/// Initialize `device`, retrying once after a timeline barrier if the first
/// attempt underflows. A second failure, or any non-transient one, propagates.
pub async fn reinit<D>(core: &mut dyn RealtimeCore, device: &mut D) -> Result<(), DeviceError>
where
    D: Initialize + ?Sized,
{
    match device.init().await {
        Ok(()) => Ok(()),
        Err(e) if e.is_transient() => {
            tracing::warn!(
                device = device.name(),
                error = %e,
                "Init underflowed, retrying after break_realtime"
            );
            core.break_realtime().await?;
            device.init().await
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{CallLog, DeviceCall, MockCore, MockDds};
    use super::*;

    #[tokio::test]
    async fn test_reinit_retries_underflow_once() {
        let log = CallLog::new();
        let mut core = MockCore::new(log.clone());
        let mut dds = MockDds::new("dds_729G", log.clone()).with_init_underflows(1);

        reinit(&mut core, &mut dds).await.unwrap();

        let calls = log.calls().await;
        assert_eq!(
            calls,
            vec![
                DeviceCall::DdsInit("dds_729G".into()),
                DeviceCall::BreakRealtime,
                DeviceCall::DdsInit("dds_729G".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_reinit_second_underflow_propagates() {
        let log = CallLog::new();
        let mut core = MockCore::new(log.clone());
        let mut dds = MockDds::new("dds_397", log.clone()).with_init_underflows(2);

        let err = reinit(&mut core, &mut dds).await.unwrap_err();
        assert_eq!(err, DeviceError::Underflow("dds_397".into()));
    }

    #[tokio::test]
    async fn test_missing_devices_are_not_configured() {
        let mut hw = Hardware::new(Box::new(MockCore::new(CallLog::new())));
        assert!(matches!(hw.pmt_mut(), Err(DeviceError::NotConfigured(_))));
        assert!(hw.dds_mut("dds_854").is_err());
    }
}
