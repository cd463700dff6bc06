//! Continuous-wave state of the DDS channels.
//!
//! The state is captured once from the `dds_cw_parameters` collection when a
//! run is prepared and written back to the hardware whenever the engine exits.

use serde::Serialize;

use crate::error::{AppResult, DeviceError, ScanError};
use crate::parameters::{ParamValue, ParameterSnapshot};

use super::{reinit, Hardware};

/// Collection holding one `[freq_MHz, amplitude, state, att_dB]` entry per channel
pub const CW_COLLECTION: &str = "dds_cw_parameters";

/// Continuous-wave settings of one DDS channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CwChannel {
    /// Hardware name of the channel (`dds_<key>`)
    pub name: String,
    /// Output frequency in Hz
    pub frequency_hz: f64,
    /// Amplitude, full scale 1.0
    pub amplitude: f64,
    /// Attenuation in dB
    pub attenuation_db: f64,
    /// RF switch state
    pub enabled: bool,
}

/// CW settings of every channel, in parameter-store order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CwSnapshot {
    channels: Vec<CwChannel>,
}

impl CwSnapshot {
    /// Snapshot of explicit channel settings
    pub fn new(channels: Vec<CwChannel>) -> Self {
        Self { channels }
    }

    /// Parse the `dds_cw_parameters` collection.
    ///
    /// Each entry is either `[freq_MHz, amplitude, state, att_dB]` or a pair
    /// whose second element is that list.
    pub fn from_parameters(params: &ParameterSnapshot) -> AppResult<Self> {
        let mut channels = Vec::new();
        for (key, value) in params.collection(CW_COLLECTION) {
            let fields = cw_fields(value).ok_or_else(|| {
                ScanError::Configuration(format!(
                    "{}.{} must be [freq_MHz, amplitude, state, att_dB]",
                    CW_COLLECTION, key
                ))
            })?;
            channels.push(CwChannel {
                name: format!("dds_{}", key),
                frequency_hz: fields[0] * 1e6,
                amplitude: fields[1],
                enabled: fields[2] != 0.0,
                attenuation_db: fields[3],
            });
        }
        Ok(Self { channels })
    }

    /// Channels in restore order
    pub fn channels(&self) -> &[CwChannel] {
        &self.channels
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is captured
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Fail if a captured channel has no hardware handle
    pub fn check_against(&self, hardware: &Hardware) -> AppResult<()> {
        match self
            .channels
            .iter()
            .find(|c| !hardware.dds.contains_key(&c.name))
        {
            Some(missing) => Err(DeviceError::NotConfigured(missing.name.clone()).into()),
            None => Ok(()),
        }
    }

    /// Write the captured state back to the hardware.
    ///
    /// Order: timeline reset, CPLD init, one barrier, then per channel
    /// init, frequency/amplitude, attenuation and switch.
    pub async fn restore(&self, hardware: &mut Hardware) -> Result<(), DeviceError> {
        hardware.core.reset().await?;
        for cpld in hardware.cplds.iter_mut() {
            cpld.init().await?;
        }
        hardware.core.break_realtime().await?;

        for channel in &self.channels {
            let dds = hardware
                .dds
                .get_mut(&channel.name)
                .ok_or_else(|| DeviceError::NotConfigured(channel.name.clone()))?;
            reinit(hardware.core.as_mut(), dds.as_mut()).await?;
            dds.set(channel.frequency_hz, channel.amplitude).await?;
            dds.set_att(channel.attenuation_db).await?;
            dds.switch(channel.enabled).await?;
        }

        tracing::debug!(channels = self.channels.len(), "CW settings restored");
        Ok(())
    }
}

fn cw_fields(value: &ParamValue) -> Option<[f64; 4]> {
    let ParamValue::List(items) = value else {
        return None;
    };
    let items = match items.as_slice() {
        [_, ParamValue::List(inner)] => inner.as_slice(),
        flat => flat,
    };
    match items {
        [f, a, s, att] => Some([f.as_f64()?, a.as_f64()?, s.as_f64()?, att.as_f64()?]),
        _ => None,
    }
}
