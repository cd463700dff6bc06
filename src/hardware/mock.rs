//! Mock Hardware Implementations
//!
//! Simulated devices for running the engine without a real-time controller.
//! Every mock appends to a shared [`CallLog`] so tests can assert on the exact
//! sequence of hardware calls.
//!
//! # Available Mocks
//!
//! - `MockCore` - timeline control
//! - `MockCpld` / `MockDds` - RF sources, with injectable init underflows
//! - `MockPmt` - scripted counts or a simulated two-level ion
//! - `MockLineTrigger` - mains edge arriving after a number of empty gates
//! - `MockCamera` - kinetic-series camera
//! - `MockIonDetector` - fixed ion-state estimate

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;

use crate::error::DeviceError;
use crate::readout::{Frame, IonStateDetector, IonStateEstimate, ReadoutMode};

use super::{Camera, CameraSettings, Cpld, DdsChannel, Initialize, LineTrigger, Pmt, RealtimeCore};

// =============================================================================
// CallLog - shared record of device calls
// =============================================================================

/// One recorded hardware call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CoreReset,
    BreakRealtime,
    AtMu(i64),
    CpldInit(String),
    DdsInit(String),
    DdsSet {
        name: String,
        frequency_hz: f64,
        amplitude: f64,
    },
    DdsSetAtt {
        name: String,
        attenuation_db: f64,
    },
    DdsSwitch {
        name: String,
        on: bool,
    },
    PmtCount,
    LineGate,
    CameraConfigure,
    CameraPrepare(usize),
    CameraTrigger,
    CameraWait,
    CameraRead(usize),
    CameraAbort,
    CameraRestore,
}

/// Ordered log shared by all mocks of one test.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<RwLock<Vec<DeviceCall>>>,
}

impl CallLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call
    pub async fn record(&self, call: DeviceCall) {
        self.calls.write().await.push(call);
    }

    /// Copy of every call so far
    pub async fn calls(&self) -> Vec<DeviceCall> {
        self.calls.read().await.clone()
    }

    /// Number of calls matching `predicate`
    pub async fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&DeviceCall) -> bool,
    {
        self.calls.read().await.iter().filter(|c| predicate(c)).count()
    }

    /// Forget every call
    pub async fn clear(&self) {
        self.calls.write().await.clear();
    }
}

// =============================================================================
// MockCore
// =============================================================================

/// Mock real-time core
pub struct MockCore {
    log: CallLog,
}

impl MockCore {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl RealtimeCore for MockCore {
    async fn reset(&mut self) -> Result<(), DeviceError> {
        self.log.record(DeviceCall::CoreReset).await;
        Ok(())
    }

    async fn break_realtime(&mut self) -> Result<(), DeviceError> {
        self.log.record(DeviceCall::BreakRealtime).await;
        Ok(())
    }

    async fn at_mu(&mut self, t_mu: i64) -> Result<(), DeviceError> {
        self.log.record(DeviceCall::AtMu(t_mu)).await;
        Ok(())
    }
}

// =============================================================================
// MockCpld / MockDds
// =============================================================================

/// Mock CPLD
pub struct MockCpld {
    name: String,
    log: CallLog,
}

impl MockCpld {
    pub fn new(name: &str, log: CallLog) -> Self {
        Self {
            name: name.to_string(),
            log,
        }
    }
}

#[async_trait]
impl Initialize for MockCpld {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&mut self) -> Result<(), DeviceError> {
        self.log.record(DeviceCall::CpldInit(self.name.clone())).await;
        Ok(())
    }
}

impl Cpld for MockCpld {}

/// Mock DDS channel
///
/// `init` underflows a configurable number of times before succeeding, or
/// always fails with a fault.
pub struct MockDds {
    name: String,
    log: CallLog,
    init_underflows: u32,
    init_fault: Option<String>,
}

impl MockDds {
    pub fn new(name: &str, log: CallLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            init_underflows: 0,
            init_fault: None,
        }
    }

    /// Underflow the next `count` init calls
    pub fn with_init_underflows(mut self, count: u32) -> Self {
        self.init_underflows = count;
        self
    }

    /// Fail every init call with a fault
    pub fn with_init_fault(mut self, message: &str) -> Self {
        self.init_fault = Some(message.to_string());
        self
    }
}

#[async_trait]
impl Initialize for MockDds {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&mut self) -> Result<(), DeviceError> {
        self.log.record(DeviceCall::DdsInit(self.name.clone())).await;
        if let Some(message) = &self.init_fault {
            return Err(DeviceError::Fault {
                device: self.name.clone(),
                message: message.clone(),
            });
        }
        if self.init_underflows > 0 {
            self.init_underflows -= 1;
            return Err(DeviceError::Underflow(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl DdsChannel for MockDds {
    async fn set(&mut self, frequency_hz: f64, amplitude: f64) -> Result<(), DeviceError> {
        self.log
            .record(DeviceCall::DdsSet {
                name: self.name.clone(),
                frequency_hz,
                amplitude,
            })
            .await;
        Ok(())
    }

    async fn set_att(&mut self, attenuation_db: f64) -> Result<(), DeviceError> {
        self.log
            .record(DeviceCall::DdsSetAtt {
                name: self.name.clone(),
                attenuation_db,
            })
            .await;
        Ok(())
    }

    async fn switch(&mut self, on: bool) -> Result<(), DeviceError> {
        self.log
            .record(DeviceCall::DdsSwitch {
                name: self.name.clone(),
                on,
            })
            .await;
        Ok(())
    }
}

// =============================================================================
// MockPmt - scripted or simulated photon counts
// =============================================================================

/// Two-level ion shared between a simulated pulse sequence and [`MockPmt`].
///
/// The sequence sets the dark-state probability for the current shot; the PMT
/// then draws Poisson counts around the dark or bright mean.
#[derive(Debug, Clone)]
pub struct SimulatedIon {
    dark_probability: Arc<RwLock<f64>>,
    /// Mean counts of a bright (fluorescing) ion
    pub bright_mean: f64,
    /// Mean counts of a dark ion (background)
    pub dark_mean: f64,
}

impl SimulatedIon {
    pub fn new(bright_mean: f64, dark_mean: f64) -> Self {
        Self {
            dark_probability: Arc::new(RwLock::new(0.0)),
            bright_mean,
            dark_mean,
        }
    }

    /// Set the probability of the ion being dark at readout
    pub async fn set_dark_probability(&self, p: f64) {
        *self.dark_probability.write().await = p.clamp(0.0, 1.0);
    }

    /// Current dark-state probability
    pub async fn dark_probability(&self) -> f64 {
        *self.dark_probability.read().await
    }
}

/// Where a [`MockPmt`] takes its counts from
#[derive(Debug, Clone)]
pub enum PmtSource {
    /// Cycle through a fixed list
    Scripted(Vec<u32>),
    /// Draw from a simulated ion
    Simulated(SimulatedIon),
}

/// Mock photon counter
pub struct MockPmt {
    source: PmtSource,
    next: usize,
    rng: StdRng,
    log: CallLog,
}

impl MockPmt {
    /// Counter cycling through `counts` (zero when empty)
    pub fn scripted(counts: Vec<u32>, log: CallLog) -> Self {
        Self {
            source: PmtSource::Scripted(counts),
            next: 0,
            rng: StdRng::seed_from_u64(0),
            log,
        }
    }

    /// Counter reading out `ion`, seeded for reproducible draws
    pub fn simulated(ion: SimulatedIon, seed: u64, log: CallLog) -> Self {
        Self {
            source: PmtSource::Simulated(ion),
            next: 0,
            rng: StdRng::seed_from_u64(seed),
            log,
        }
    }
}

fn poisson(rng: &mut StdRng, mean: f64) -> u32 {
    let limit = (-mean).exp();
    let mut k = 0u32;
    let mut p = 1.0;
    loop {
        p *= rng.gen::<f64>();
        if p <= limit {
            return k;
        }
        k += 1;
    }
}

#[async_trait]
impl Pmt for MockPmt {
    async fn count(&mut self, _duration_s: f64) -> Result<u32, DeviceError> {
        self.log.record(DeviceCall::PmtCount).await;
        let count = match &self.source {
            PmtSource::Scripted(counts) if counts.is_empty() => 0,
            PmtSource::Scripted(counts) => {
                let c = counts[self.next % counts.len()];
                self.next += 1;
                c
            }
            PmtSource::Simulated(ion) => {
                let p_dark = ion.dark_probability().await;
                let mean = if self.rng.gen_bool(p_dark) {
                    ion.dark_mean
                } else {
                    ion.bright_mean
                };
                poisson(&mut self.rng, mean)
            }
        };
        Ok(count)
    }
}

// =============================================================================
// MockLineTrigger
// =============================================================================

/// Mock mains trigger; the edge arrives after a number of empty gate windows
pub struct MockLineTrigger {
    misses: VecDeque<bool>,
    misses_per_edge: usize,
    t_mu: i64,
    log: CallLog,
}

impl MockLineTrigger {
    /// Every search misses `misses_per_edge` windows before seeing an edge
    pub fn new(misses_per_edge: usize, log: CallLog) -> Self {
        Self {
            misses: VecDeque::new(),
            misses_per_edge,
            t_mu: 0,
            log,
        }
    }

    /// Trigger that never sees an edge
    pub fn dead(log: CallLog) -> Self {
        Self::new(usize::MAX, log)
    }
}

#[async_trait]
impl LineTrigger for MockLineTrigger {
    async fn gate_rising(&mut self, window: Duration) -> Result<Option<i64>, DeviceError> {
        self.log.record(DeviceCall::LineGate).await;
        if self.misses_per_edge == usize::MAX {
            return Ok(None);
        }
        if self.misses.is_empty() {
            self.misses.extend(std::iter::repeat(true).take(self.misses_per_edge));
            self.misses.push_back(false);
        }
        self.t_mu += window.as_nanos() as i64;
        match self.misses.pop_front() {
            Some(false) => Ok(Some(self.t_mu)),
            _ => Ok(None),
        }
    }
}

// =============================================================================
// MockCamera
// =============================================================================

/// Mock kinetic-series camera producing constant frames
pub struct MockCamera {
    width: u32,
    height: u32,
    pixel_value: u16,
    armed: usize,
    triggered: usize,
    polls_before_ready: Option<u32>,
    polls: u32,
    settings: CameraSettings,
    saved: Option<CameraSettings>,
    log: CallLog,
}

impl MockCamera {
    /// Camera with a `width x height` region
    pub fn new(width: u32, height: u32, log: CallLog) -> Self {
        Self {
            width,
            height,
            pixel_value: 100,
            armed: 0,
            triggered: 0,
            polls_before_ready: Some(0),
            polls: 0,
            settings: CameraSettings::default(),
            saved: None,
            log,
        }
    }

    /// Report the series incomplete for `polls` polls after the last trigger
    pub fn with_readout_delay(mut self, polls: u32) -> Self {
        self.polls_before_ready = Some(polls);
        self
    }

    /// Never report the series complete
    pub fn stalled(mut self) -> Self {
        self.polls_before_ready = None;
        self
    }

    /// Settings currently applied
    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }
}

#[async_trait]
impl Camera for MockCamera {
    async fn configure(&mut self, settings: &CameraSettings) -> Result<(), DeviceError> {
        self.log.record(DeviceCall::CameraConfigure).await;
        self.saved = Some(std::mem::replace(&mut self.settings, settings.clone()));
        Ok(())
    }

    async fn prepare(&mut self, kinetics: usize) -> Result<(), DeviceError> {
        self.log.record(DeviceCall::CameraPrepare(kinetics)).await;
        self.armed = kinetics;
        self.triggered = 0;
        self.polls = 0;
        Ok(())
    }

    async fn trigger(&mut self) -> Result<(), DeviceError> {
        self.log.record(DeviceCall::CameraTrigger).await;
        self.triggered += 1;
        Ok(())
    }

    async fn wait_for_kinetic(&mut self) -> Result<bool, DeviceError> {
        self.log.record(DeviceCall::CameraWait).await;
        let Some(delay) = self.polls_before_ready else {
            return Ok(false);
        };
        if self.triggered < self.armed {
            return Ok(false);
        }
        self.polls += 1;
        Ok(self.polls > delay)
    }

    async fn get_acquired_data(&mut self, count: usize) -> Result<Vec<Frame>, DeviceError> {
        self.log.record(DeviceCall::CameraRead(count)).await;
        let pixels = vec![self.pixel_value; (self.width * self.height) as usize];
        Ok((0..count)
            .map(|_| Frame::new(self.width, self.height, pixels.clone()))
            .collect())
    }

    async fn abort_acquisition(&mut self) -> Result<(), DeviceError> {
        self.log.record(DeviceCall::CameraAbort).await;
        Ok(())
    }

    async fn restore(&mut self) -> Result<(), DeviceError> {
        self.log.record(DeviceCall::CameraRestore).await;
        if let Some(saved) = self.saved.take() {
            self.settings = saved;
        }
        Ok(())
    }
}

// =============================================================================
// MockIonDetector
// =============================================================================

/// Detector returning a fixed estimate, or always failing
#[derive(Debug, Clone)]
pub struct MockIonDetector {
    result: Result<IonStateEstimate, String>,
}

impl MockIonDetector {
    /// Always return `estimate`
    pub fn fixed(estimate: IonStateEstimate) -> Self {
        Self {
            result: Ok(estimate),
        }
    }

    /// Always fail with `message`
    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
        }
    }
}

impl IonStateDetector for MockIonDetector {
    fn estimate(
        &self,
        _frames: &[Frame],
        _repetitions: usize,
        _mode: ReadoutMode,
    ) -> anyhow::Result<IonStateEstimate> {
        self.result.clone().map_err(anyhow::Error::msg)
    }
}
