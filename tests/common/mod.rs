//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;

use pulse_scan::config::Settings;
use pulse_scan::experiment::{PulseSequence, ScanData, ShotContext};
use pulse_scan::hardware::mock::{CallLog, DeviceCall, MockCore, MockCpld, MockDds, MockPmt};
use pulse_scan::hardware::Hardware;
use pulse_scan::parameters::StaticParameters;
use pulse_scan::{FitError, HookError};

/// Parameters for a PMT run with one threshold and two CW channels
pub fn pmt_parameters(mode: &str, repeats: f64) -> StaticParameters {
    StaticParameters::new()
        .with("StateReadout.readout_mode", mode)
        .with("StateReadout.repeat_each_measurement", repeats)
        .with("StateReadout.threshold_list", vec![5.0])
        .with_units("StateReadout.pmt_readout_duration", 1.0, "ms")
        .with("dds_cw_parameters.729G", vec![220.0, 1.0, 0.0, 5.0])
        .with("dds_cw_parameters.397", vec![78.0, 0.5, 1.0, 10.0])
}

/// Parameters for a camera run imaging `ions` ions
pub fn camera_parameters(mode: &str, repeats: f64, ions: f64) -> StaticParameters {
    StaticParameters::new()
        .with("StateReadout.readout_mode", mode)
        .with("StateReadout.repeat_each_measurement", repeats)
        .with_units("StateReadout.camera_readout_duration", 20.0, "ms")
        .with("IonsOnCamera.ion_number", ions)
        .with("dds_cw_parameters.729G", vec![220.0, 1.0, 0.0, 5.0])
        .with("dds_cw_parameters.397", vec![78.0, 0.5, 1.0, 10.0])
}

/// Core, one CPLD and the two CW channels
pub fn base_hardware(log: &CallLog) -> Hardware {
    Hardware::new(Box::new(MockCore::new(log.clone())))
        .with_cpld(Box::new(MockCpld::new("urukul0_cpld", log.clone())))
        .with_dds(Box::new(MockDds::new("dds_729G", log.clone())))
        .with_dds(Box::new(MockDds::new("dds_397", log.clone())))
}

/// Base hardware plus a scripted PMT
pub fn pmt_hardware(log: &CallLog, counts: Vec<u32>) -> Hardware {
    base_hardware(log).with_pmt(Box::new(MockPmt::scripted(counts, log.clone())))
}

/// Settings with short hardware waits
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.engine.line_trigger_window_us = 10;
    settings.engine.line_trigger_attempts = 4;
    settings.engine.kinetic_wait_attempts = 3;
    settings.engine.kinetic_wait_backoff_ms = 1;
    settings
}

/// Number of times the CW state was written back
pub async fn restore_count(log: &CallLog) -> usize {
    log.count(|c| matches!(c, DeviceCall::CoreReset)).await
}

/// What a [`RecordingSequence`] has seen
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    /// `(seq_name, index, bindings)` per `set_subsequence` call
    pub points: Arc<Mutex<Vec<(String, usize, Vec<(String, f64)>)>>>,
    /// Number of shots per sub-sequence
    pub shots: Arc<Mutex<IndexMap<String, usize>>>,
    /// Sub-sequences passed to `run_after`
    pub after: Arc<Mutex<Vec<String>>>,
    /// Sub-sequences passed to `run_finally`
    pub finally: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    /// Bound value of `axis` per processed point of `seq_name`
    pub async fn values(&self, seq_name: &str, axis: &str) -> Vec<f64> {
        self.points
            .lock()
            .await
            .iter()
            .filter(|(s, _, _)| s == seq_name)
            .filter_map(|(_, _, b)| b.iter().find(|(n, _)| n == axis).map(|(_, v)| *v))
            .collect()
    }

    /// Indices processed for `seq_name`, in order
    pub async fn indices(&self, seq_name: &str) -> Vec<usize> {
        self.points
            .lock()
            .await
            .iter()
            .filter(|(s, _, _)| s == seq_name)
            .map(|(_, i, _)| *i)
            .collect()
    }
}

/// Pulse program that records every call and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingSequence {
    pub recorder: Recorder,
    /// Post-scan fit fails for this sub-sequence
    pub fail_fit: Option<String>,
    /// Shot fails at `(seq_name, index)`
    pub fail_at: Option<(String, usize)>,
    /// Keep going after a terminated sub-sequence
    pub continue_after_terminate: bool,
    /// Leave `run_after` unimplemented
    pub no_hooks: bool,
}

impl RecordingSequence {
    pub fn new(recorder: &Recorder) -> Self {
        Self {
            recorder: recorder.clone(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PulseSequence for RecordingSequence {
    async fn set_subsequence(&mut self, ctx: &mut ShotContext<'_>) -> anyhow::Result<()> {
        let bindings = ctx
            .bindings
            .iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect();
        self.recorder
            .points
            .lock()
            .await
            .push((ctx.seq_name.to_string(), ctx.index, bindings));
        Ok(())
    }

    async fn sequence(&mut self, ctx: &mut ShotContext<'_>) -> anyhow::Result<()> {
        if let Some((seq_name, index)) = &self.fail_at {
            if seq_name == ctx.seq_name && *index == ctx.index {
                anyhow::bail!("pulse compilation failed");
            }
        }
        *self
            .recorder
            .shots
            .lock()
            .await
            .entry(ctx.seq_name.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn run_after(&mut self, seq_name: &str, data: &ScanData) -> Result<(), HookError> {
        if self.no_hooks {
            return Err(HookError::Missing);
        }
        self.recorder.after.lock().await.push(seq_name.to_string());
        if self.fail_fit.as_deref() == Some(seq_name) {
            return Err(FitError("fit did not converge".into()).into());
        }
        if data.visited().len() < data.len() && !self.continue_after_terminate {
            return Err(HookError::Other(anyhow::anyhow!("scan incomplete")));
        }
        Ok(())
    }

    async fn run_finally(&mut self, results: &IndexMap<String, ScanData>) -> Result<(), HookError> {
        let mut finally = self.recorder.finally.lock().await;
        finally.extend(results.keys().cloned());
        Ok(())
    }
}
