//! Scan engine: iteration, checkpoint/resume, batch flushing and restore-on-exit.
//!
//! # Lifecycle
//!
//! 1. [`Experiment`] collects the scan specification, hardware, pulse program
//!    and collaborators.
//! 2. [`Experiment::prepare`] loads the parameter snapshot once, validates the
//!    whole run (before any hardware is touched), captures the CW state and
//!    spawns the result dispatcher. It returns a [`ScanEngine`].
//! 3. [`ScanEngine::run_scan`] scans every sub-sequence in order and always
//!    writes the CW state back before returning.
//! 4. [`ScanEngine::analyze`] runs the final hook, restores the camera and
//!    drains pending results.
//!
//! # State machine (per sub-sequence)
//!
//! ```text
//! Running --check_pause--> PauseRequested --save cursor--> Paused
//! Paused --Resumed--> Resumed --> Running (from the saved cursor)
//! Paused --Terminated--> Terminated
//! Running --last point--> Complete
//! ```

use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use indexmap::IndexMap;

use crate::calibration::{CalibrationSource, CarrierTable, FrequencyPlan};
use crate::config::{DdsOffset, EngineConfig, Settings};
use crate::error::{AppResult, DeviceError, HookError, ScanError};
use crate::hardware::{CwSnapshot, Hardware};
use crate::parameters::{ParamValue, ParameterLoader, ParameterSnapshot};
use crate::readout::{Frame, IonStateDetector, RawBatch, Reducer};
use crate::scan::{IterationSpace, ScanCursor, ScanSpec, Scannable, VariableBindings};
use crate::scheduler::{PauseOutcome, Scheduler, Unattended};
use crate::sink::{
    new_uid, ArtifactHeader, DeliveryStats, HistogramSink, LivePlot, MemoryResultSink,
    PlotRequest, ResultDispatcher, ResultSink, SinkCommand,
};

use super::data::ScanData;
use super::program::{PulseSequence, ShotContext};
use super::settings::RunSettings;

/// Scan points per flush
pub const BATCH_SIZE: usize = 5;

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Prepared, no sub-sequence started yet
    Idle,
    /// Scanning
    Running,
    /// Scheduler asked for a pause; checkpoint being saved
    PauseRequested,
    /// Blocked in the scheduler
    Paused,
    /// Pause ended; re-entering from the checkpoint
    Resumed,
    /// Sub-sequence terminated
    Terminated,
    /// Sub-sequence scanned to the end
    Complete,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every sub-sequence was processed
    Complete,
    /// A post-scan fit failed; later sub-sequences were not started
    Stopped {
        /// Sub-sequence whose fit failed
        seq_name: String,
    },
    /// A sub-sequence was terminated and its hook did not continue the run
    Terminated {
        /// Sub-sequence that was terminated
        seq_name: String,
    },
}

/// Everything needed to prepare a run.
pub struct Experiment {
    name: String,
    spec: ScanSpec,
    hardware: Hardware,
    program: Box<dyn PulseSequence>,
    scheduler: Box<dyn Scheduler>,
    sink: Box<dyn ResultSink>,
    plot: Option<Box<dyn LivePlot>>,
    histogram: Option<Box<dyn HistogramSink>>,
    detector: Option<Arc<dyn IonStateDetector>>,
    calibration: Option<Box<dyn CalibrationSource>>,
    fixed_params: Vec<(String, ParamValue)>,
    engine: EngineConfig,
    dds_offsets: IndexMap<String, DdsOffset>,
}

impl Experiment {
    /// Experiment `name` scanning `spec` with `program` on `hardware`.
    ///
    /// Defaults: never pauses, results kept in memory, no live plot.
    pub fn new<P>(name: &str, spec: ScanSpec, hardware: Hardware, program: P) -> Self
    where
        P: PulseSequence + 'static,
    {
        Self {
            name: name.to_string(),
            spec,
            hardware,
            program: Box::new(program),
            scheduler: Box::new(Unattended),
            sink: Box::new(MemoryResultSink::new()),
            plot: None,
            histogram: None,
            detector: None,
            calibration: None,
            fixed_params: Vec::new(),
            engine: EngineConfig::default(),
            dds_offsets: IndexMap::new(),
        }
    }

    /// Pause/terminate source
    pub fn with_scheduler<S: Scheduler + 'static>(mut self, scheduler: S) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    /// Artifact storage
    pub fn with_sink<S: ResultSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Live plotting
    pub fn with_live_plot<L: LivePlot + 'static>(mut self, plot: L) -> Self {
        self.plot = Some(Box::new(plot));
        self
    }

    /// PMT histogram
    pub fn with_histogram<H: HistogramSink + 'static>(mut self, histogram: H) -> Self {
        self.histogram = Some(Box::new(histogram));
        self
    }

    /// Ion-state detector for camera readout
    pub fn with_detector(mut self, detector: Arc<dyn IonStateDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Line-centre calibration
    pub fn with_calibration<C: CalibrationSource + 'static>(mut self, source: C) -> Self {
        self.calibration = Some(Box::new(source));
        self
    }

    /// Override one parameter after the snapshot is loaded
    pub fn with_fixed_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.fixed_params.push((key.to_string(), value.into()));
        self
    }

    /// Engine bounds and DDS offsets from the application settings
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.engine = settings.engine.clone();
        self.dds_offsets = settings.dds.clone();
        self
    }

    /// Load parameters, validate the run and capture the CW state.
    ///
    /// Every configuration error is raised before any hardware call.
    pub async fn prepare(self, loader: &dyn ParameterLoader) -> AppResult<ScanEngine> {
        let Experiment {
            name,
            spec,
            mut hardware,
            mut program,
            scheduler,
            sink,
            plot,
            histogram,
            detector,
            mut calibration,
            fixed_params,
            engine,
            dds_offsets,
        } = self;

        spec.validate()?;
        let params = ParameterSnapshot::load(loader, &fixed_params).await?;
        let run = RunSettings::from_parameters(&params)?;

        let mut spaces = IndexMap::new();
        for (seq_name, scan) in spec.iter() {
            if scan.is_ndim && !run.mode.supports_ndim() {
                return Err(ScanError::Configuration(format!(
                    "Sub-sequence '{}': N-D scans are not supported with readout mode '{}'",
                    seq_name, run.mode
                )));
            }
            spaces.insert(
                seq_name.to_string(),
                IterationSpace::for_sequence(seq_name, scan)?,
            );
        }

        let reducer = if run.mode.uses_camera() {
            let detector = detector.ok_or_else(|| {
                ScanError::Configuration(format!(
                    "Readout mode '{}' requires an ion-state detector",
                    run.mode
                ))
            })?;
            if hardware.camera.is_none() {
                return Err(DeviceError::NotConfigured("camera".to_string()).into());
            }
            Reducer::camera(run.mode, run.ion_number, detector)?
        } else {
            if hardware.pmt.is_none() {
                return Err(DeviceError::NotConfigured("pmt".to_string()).into());
            }
            Reducer::pmt(run.mode, run.thresholds.clone())?
        };
        if run.line_trigger.enabled && hardware.line_trigger.is_none() {
            return Err(DeviceError::NotConfigured("line_trigger".to_string()).into());
        }

        let cw = CwSnapshot::from_parameters(&params)?;
        cw.check_against(&hardware)?;

        let mut carriers = CarrierTable::default();
        if let Some(source) = calibration.as_mut() {
            if let Err(e) = carriers.refresh(source.as_mut()).await {
                tracing::warn!(error = %e, "Initial calibration unavailable, line centres at 0 Hz");
            }
        }
        let frequencies = FrequencyPlan::new(carriers, &params, dds_offsets);

        program
            .run_initially(&params)
            .await
            .map_err(|source| ScanError::Sequence {
                seq_name: name.clone(),
                index: 0,
                source,
            })?;

        if let Some(camera) = &run.camera {
            hardware.camera_mut()?.configure(camera).await?;
        }

        tracing::info!(
            experiment = %name,
            sequences = spec.len(),
            mode = %run.mode,
            repetitions = run.repetitions,
            cw_channels = cw.len(),
            "Experiment prepared"
        );

        Ok(ScanEngine {
            name,
            spec,
            spaces,
            hardware,
            program,
            scheduler,
            calibration,
            engine,
            params,
            run,
            reducer,
            cw,
            frequencies,
            dispatcher: Some(ResultDispatcher::spawn(sink, plot, histogram)),
            results: IndexMap::new(),
            state: EngineState::Idle,
            active: None,
            finished: false,
        })
    }
}

enum LoopExit {
    Exhausted,
    Suspended,
}

/// State of the sub-sequence being scanned; dropped when its scan ends.
struct SequenceRun {
    seq_name: String,
    plot_tab: String,
    space: IterationSpace,
    cursor: ScanCursor,
    bindings: VariableBindings,
    data: ScanData,
    artifact: Option<ArtifactHeader>,
    started: Instant,
}

/// A prepared run.
pub struct ScanEngine {
    name: String,
    spec: ScanSpec,
    spaces: IndexMap<String, IterationSpace>,
    hardware: Hardware,
    program: Box<dyn PulseSequence>,
    scheduler: Box<dyn Scheduler>,
    calibration: Option<Box<dyn CalibrationSource>>,
    engine: EngineConfig,
    params: ParameterSnapshot,
    run: RunSettings,
    reducer: Reducer,
    cw: CwSnapshot,
    frequencies: FrequencyPlan,
    dispatcher: Option<ResultDispatcher>,
    results: IndexMap<String, ScanData>,
    state: EngineState,
    active: Option<String>,
    finished: bool,
}

impl ScanEngine {
    /// Current state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Experiment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter snapshot of the run
    pub fn params(&self) -> &ParameterSnapshot {
        &self.params
    }

    /// Readout settings of the run
    pub fn settings(&self) -> &RunSettings {
        &self.run
    }

    /// CW state captured at prepare time
    pub fn cw_snapshot(&self) -> &CwSnapshot {
        &self.cw
    }

    /// Results of every sub-sequence scanned so far
    pub fn results(&self) -> &IndexMap<String, ScanData> {
        &self.results
    }

    /// Sub-sequence currently being scanned
    pub fn active_sequence(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Scan every sub-sequence, then restore the CW state.
    ///
    /// The CW restore runs exactly once, whatever the outcome. A scan error
    /// takes precedence over a restore error.
    pub async fn run_scan(&mut self) -> AppResult<RunOutcome> {
        if self.finished {
            return Err(ScanError::Configuration(
                "run_scan may only be called once per prepared experiment".to_string(),
            ));
        }
        self.finished = true;

        let outcome = self.run_sequences().await;
        let restore = self.restore_on_exit().await;

        match (outcome, restore) {
            (Ok(outcome), Ok(())) => {
                tracing::info!(experiment = %self.name, outcome = ?outcome, "Run finished");
                Ok(outcome)
            }
            (Ok(_), Err(e)) => {
                tracing::error!(experiment = %self.name, error = %e, "CW restore failed");
                Err(e)
            }
            (Err(e), restore) => {
                if let Err(restore_err) = restore {
                    tracing::error!(
                        experiment = %self.name,
                        error = %restore_err,
                        "CW restore failed after scan error"
                    );
                }
                Err(e)
            }
        }
    }

    /// Run the final hook, restore the camera and deliver pending results.
    pub async fn analyze(&mut self) -> AppResult<DeliveryStats> {
        match self.program.run_finally(&self.results).await {
            Ok(()) | Err(HookError::Missing) => {}
            Err(HookError::Fit(e)) => {
                tracing::error!(experiment = %self.name, error = %e, "Final fit failed")
            }
            Err(HookError::Other(e)) => {
                tracing::warn!(experiment = %self.name, error = %e, "Final hook failed")
            }
        }

        if self.run.camera.is_some() {
            if let Some(camera) = self.hardware.camera.as_mut() {
                camera.restore().await?;
            }
        }

        let stats = match self.dispatcher.take() {
            Some(dispatcher) => dispatcher.close().await,
            None => DeliveryStats::default(),
        };
        tracing::info!(
            delivered = stats.delivered,
            failed = stats.failed,
            "Results delivered"
        );
        Ok(stats)
    }

    async fn run_sequences(&mut self) -> AppResult<RunOutcome> {
        let seq_names: Vec<String> = self.spec.iter().map(|(name, _)| name.to_string()).collect();

        for seq_name in &seq_names {
            let completed = self.run_sequence(seq_name).await?;
            let Some(data) = self.results.get(seq_name) else {
                continue;
            };

            if completed {
                match self.program.run_after(seq_name, data).await {
                    Ok(()) => tracing::debug!(seq_name = %seq_name, "Post-scan hook finished"),
                    Err(HookError::Missing) => {
                        tracing::debug!(seq_name = %seq_name, "No post-scan hook")
                    }
                    Err(HookError::Fit(e)) => {
                        tracing::error!(
                            seq_name = %seq_name,
                            error = %e,
                            "Post-scan fit failed, skipping remaining sub-sequences"
                        );
                        return Ok(RunOutcome::Stopped {
                            seq_name: seq_name.clone(),
                        });
                    }
                    Err(HookError::Other(e)) => {
                        tracing::warn!(seq_name = %seq_name, error = %e, "Post-scan hook failed")
                    }
                }
            } else {
                match self.program.run_after(seq_name, data).await {
                    Ok(()) => {
                        tracing::info!(
                            seq_name = %seq_name,
                            "Terminated, continuing with next sub-sequence"
                        )
                    }
                    Err(e) => {
                        tracing::info!(seq_name = %seq_name, reason = %e, "Run terminated");
                        return Ok(RunOutcome::Terminated {
                            seq_name: seq_name.clone(),
                        });
                    }
                }
            }
        }
        Ok(RunOutcome::Complete)
    }

    /// Scan one sub-sequence to completion or termination; true if completed
    async fn run_sequence(&mut self, seq_name: &str) -> AppResult<bool> {
        let scan = self.spec.get(seq_name).cloned().ok_or_else(|| {
            ScanError::Configuration(format!("Unknown sub-sequence '{}'", seq_name))
        })?;
        let space = self.spaces.get(seq_name).cloned().ok_or_else(|| {
            ScanError::Configuration(format!("No iteration space for '{}'", seq_name))
        })?;

        let x_is_index =
            space.is_ndim() || scan.selected_scannable().is_some_and(Scannable::is_no_scan);
        let mut run = SequenceRun {
            seq_name: seq_name.to_string(),
            plot_tab: scan.effective_plot_tab().to_string(),
            cursor: ScanCursor::new(&space),
            bindings: VariableBindings::new(&scan, &self.params),
            data: ScanData::new(
                seq_name,
                &space,
                x_is_index,
                self.reducer.series_names(),
                self.run.mode.uses_camera(),
            ),
            space,
            artifact: None,
            started: Instant::now(),
        };

        self.active = Some(seq_name.to_string());
        self.state = EngineState::Running;
        tracing::info!(
            seq_name,
            points = run.space.len(),
            ndim = run.space.is_ndim(),
            "Scan started"
        );

        let completed = loop {
            match self.scan_points(&mut run).await {
                Ok(LoopExit::Exhausted) => {
                    self.state = EngineState::Complete;
                    tracing::info!(seq_name, points = run.space.len(), "Scan complete");
                    break true;
                }
                Ok(LoopExit::Suspended) => {
                    self.state = EngineState::Paused;
                    tracing::info!(seq_name, position = %run.cursor.position(), "Scan paused");
                    match self.scheduler.pause().await {
                        PauseOutcome::Resumed => {
                            self.state = EngineState::Resumed;
                            tracing::info!(
                                seq_name,
                                position = %run.cursor.position(),
                                "Scan resumed"
                            );
                        }
                        PauseOutcome::Terminated => {
                            self.state = EngineState::Terminated;
                            tracing::info!(
                                seq_name,
                                position = %run.cursor.position(),
                                "Scan terminated"
                            );
                            run.data.discard_raw();
                            self.send(SinkCommand::DiscardRaw {
                                seq_name: seq_name.to_string(),
                            });
                            break false;
                        }
                    }
                }
                Err(e) => {
                    self.results.insert(seq_name.to_string(), run.data);
                    return Err(e);
                }
            }
        };

        self.active = None;
        self.results.insert(seq_name.to_string(), run.data);
        Ok(completed)
    }

    /// Outer loop, entered at the saved cursor
    async fn scan_points(&mut self, run: &mut SequenceRun) -> AppResult<LoopExit> {
        if run.cursor.is_exhausted() {
            return Ok(LoopExit::Exhausted);
        }
        let len = run.space.len();
        for index in run.cursor.index()..len {
            if self.scheduler.check_pause() {
                self.state = EngineState::PauseRequested;
                tracing::debug!(
                    seq_name = %run.seq_name,
                    index,
                    position = %run.space.position_of(index),
                    "Pause requested"
                );
                run.cursor.save(index);
                return Ok(LoopExit::Suspended);
            }
            self.state = EngineState::Running;

            if let Some(point) = run.space.point(index) {
                run.bindings.apply(run.space.axis_names(), point);
            }

            let raw = match self.acquire(&run.seq_name, index, &run.bindings).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!(seq_name = %run.seq_name, index, error = %e, "Scan aborted");
                    return Err(e);
                }
            };

            let counts = raw.counts().map(<[u32]>::to_vec).unwrap_or_default();
            if !counts.is_empty() {
                self.send(SinkCommand::RecordRaw {
                    seq_name: run.seq_name.clone(),
                    index,
                    counts: counts.clone(),
                });
            }

            let reduced = match self.reducer.reduce(&raw) {
                Ok(point) => Some(point),
                Err(e) => {
                    tracing::warn!(
                        seq_name = %run.seq_name,
                        index,
                        error = %e,
                        "Reduction failed, recording NaN"
                    );
                    None
                }
            };
            run.data.record(
                index,
                counts,
                reduced.as_ref(),
                run.started.elapsed().as_secs_f64(),
            );

            if (index + 1) % BATCH_SIZE == 0 || index + 1 == len {
                self.flush(run, index + 1).await;
            }
        }

        run.cursor.finish();
        Ok(LoopExit::Exhausted)
    }

    /// Inner repeat loop for one scan point
    async fn acquire(
        &mut self,
        seq_name: &str,
        index: usize,
        bindings: &VariableBindings,
    ) -> AppResult<RawBatch> {
        let repetitions = self.run.repetitions;
        let use_camera = self.run.mode.uses_camera();

        if use_camera {
            self.hardware.camera_mut()?.prepare(repetitions).await?;
        }

        let mut ctx = ShotContext {
            seq_name,
            index,
            repetition: 0,
            hardware: &mut self.hardware,
            bindings,
            params: &self.params,
            frequencies: &self.frequencies,
        };
        self.program
            .set_subsequence(&mut ctx)
            .await
            .map_err(|source| sequence_error(seq_name, index, source))?;

        let mut counts = Vec::with_capacity(if use_camera { 0 } else { repetitions });
        for repetition in 0..repetitions {
            if self.run.line_trigger.enabled {
                self.wait_for_line_trigger().await?;
            } else {
                self.hardware.core.break_realtime().await?;
            }

            let mut ctx = ShotContext {
                seq_name,
                index,
                repetition,
                hardware: &mut self.hardware,
                bindings,
                params: &self.params,
                frequencies: &self.frequencies,
            };
            self.program
                .sequence(&mut ctx)
                .await
                .map_err(|source| sequence_error(seq_name, index, source))?;

            if use_camera {
                self.hardware.camera_mut()?.trigger().await?;
            } else {
                let count = self.hardware.pmt_mut()?.count(self.run.pmt_duration_s).await?;
                counts.push(count);
            }
        }

        if use_camera {
            let frames = self.read_kinetic_series(repetitions).await?;
            return Ok(RawBatch::Frames(frames));
        }
        Ok(RawBatch::Counts(counts))
    }

    /// Align the timeline to the next mains edge plus the configured offset
    async fn wait_for_line_trigger(&mut self) -> AppResult<()> {
        let window = self.engine.line_trigger_window();
        let offset_mu = self
            .hardware
            .core
            .seconds_to_mu(self.run.line_trigger.offset_s);
        let trigger = self
            .hardware
            .line_trigger
            .as_mut()
            .ok_or_else(|| DeviceError::NotConfigured("line_trigger".to_string()))?;

        for _ in 0..self.engine.line_trigger_attempts {
            if let Some(edge_mu) = trigger.gate_rising(window).await? {
                self.hardware.core.at_mu(edge_mu + offset_mu).await?;
                return Ok(());
            }
        }
        Err(DeviceError::Timeout("line_trigger".to_string()).into())
    }

    /// Wait (bounded) for the kinetic series and read it out
    async fn read_kinetic_series(&mut self, count: usize) -> AppResult<Vec<Frame>> {
        let attempts = self.engine.kinetic_wait_attempts;
        let backoff = self.engine.kinetic_wait_backoff();
        let camera = self.hardware.camera_mut()?;

        let mut ready = false;
        for attempt in 0..attempts {
            if camera.wait_for_kinetic().await? {
                ready = true;
                break;
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(backoff).await;
            }
        }
        if !ready {
            camera.abort_acquisition().await?;
            return Err(DeviceError::Timeout("camera kinetic series".to_string()).into());
        }

        let frames = camera.get_acquired_data(count).await?;
        camera.abort_acquisition().await?;
        if frames.len() != count {
            return Err(ScanError::Camera(format!(
                "Expected {} frames, got {}",
                count,
                frames.len()
            )));
        }
        Ok(frames)
    }

    /// Push indices `flushed..end` to the sinks and refresh the calibration
    async fn flush(&mut self, run: &mut SequenceRun, end: usize) {
        let start = run.data.flushed();
        if start >= end {
            return;
        }

        if run.artifact.is_none() {
            let header = ArtifactHeader {
                run_uid: new_uid(),
                experiment: self.name.clone(),
                seq_name: run.seq_name.clone(),
                is_multi: self.spec.is_multi(),
                plot_tab: run.plot_tab.clone(),
                created_at: Local::now(),
                axes: run.data.axis_names().to_vec(),
                series: run.data.series_names().to_vec(),
                parameters: self.params.to_nested_json(),
            };
            self.send(SinkCommand::CreateArtifact(header.clone()));
            run.artifact = Some(header);
        }
        let Some(header) = run.artifact.as_ref() else {
            return;
        };

        for (dataset, values) in run.data.batch(start..end) {
            self.send(SinkCommand::Append {
                seq_name: run.seq_name.clone(),
                dataset,
                values,
            });
        }

        if !self.run.mode.uses_camera() {
            self.send(SinkCommand::Histogram(run.data.raw_batch(start..end)));
        }

        let x = run.data.x()[start..end].to_vec();
        for name in run.data.series_names() {
            if let Some(y) = run.data.series(name) {
                self.send(SinkCommand::Plot(PlotRequest {
                    x: x.clone(),
                    y: y[start..end].to_vec(),
                    tab_name: run.plot_tab.clone(),
                    plot_title: header.plot_title(name),
                    append: true,
                }));
            }
        }

        run.data.mark_flushed(end);
        tracing::debug!(seq_name = %run.seq_name, start, end, "Batch flushed");

        if let Some(source) = self.calibration.as_mut() {
            if let Err(e) = self.frequencies.carriers.refresh(source.as_mut()).await {
                tracing::warn!(
                    error = %e,
                    "Calibration refresh failed, keeping previous line centres"
                );
            }
        }
    }

    /// Clear the running marker and write the captured CW state back
    async fn restore_on_exit(&mut self) -> AppResult<()> {
        if let Some(seq_name) = self.active.take() {
            self.send(SinkCommand::DiscardRaw { seq_name });
        }
        self.cw.restore(&mut self.hardware).await?;
        tracing::info!(channels = self.cw.len(), "CW settings restored");
        Ok(())
    }

    fn send(&self, command: SinkCommand) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.send(command);
        }
    }
}

fn sequence_error(seq_name: &str, index: usize, source: anyhow::Error) -> ScanError {
    ScanError::Sequence {
        seq_name: seq_name.to_string(),
        index,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{
        CallLog, MockCamera, MockCore, MockDds, MockIonDetector, MockPmt,
    };
    use crate::parameters::StaticParameters;
    use crate::scan::SequenceScan;
    use crate::scheduler::ScriptedScheduler;
    use async_trait::async_trait;
    use tracing_test::traced_test;

    struct Idle;

    #[async_trait]
    impl PulseSequence for Idle {
        async fn sequence(&mut self, _ctx: &mut ShotContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn spec(npoints: usize) -> ScanSpec {
        let values = (0..npoints).map(|i| i as f64).collect();
        ScanSpec::new().sequence(
            "A",
            SequenceScan::new("Scan").axis("A.x", Scannable::explicit(values)),
        )
    }

    fn pmt_params() -> StaticParameters {
        StaticParameters::new()
            .with("StateReadout.readout_mode", "pmt")
            .with("StateReadout.repeat_each_measurement", 2.0)
            .with("StateReadout.threshold_list", vec![4.0])
            .with("StateReadout.pmt_readout_duration", 1e-3)
            .with("dds_cw_parameters.729G", vec![220.0, 1.0, 1.0, 5.0])
    }

    #[tokio::test]
    async fn test_prepare_captures_cw_and_settings() {
        let log = CallLog::new();
        let hardware = Hardware::new(Box::new(MockCore::new(log.clone())))
            .with_dds(Box::new(MockDds::new("dds_729G", log.clone())))
            .with_pmt(Box::new(MockPmt::scripted(vec![1], log.clone())));

        let engine = Experiment::new("Exp", spec(3), hardware, Idle)
            .with_fixed_param("StateReadout.repeat_each_measurement", 7.0)
            .prepare(&pmt_params())
            .await
            .unwrap();

        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.settings().repetitions, 7);
        assert_eq!(engine.cw_snapshot().len(), 1);
        assert!(log.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_pmt_rejected() {
        let log = CallLog::new();
        let hardware = Hardware::new(Box::new(MockCore::new(log.clone())))
            .with_dds(Box::new(MockDds::new("dds_729G", log.clone())));

        let result = Experiment::new("Exp", spec(1), hardware, Idle)
            .prepare(&pmt_params())
            .await;
        assert!(matches!(
            result,
            Err(ScanError::Device(DeviceError::NotConfigured(ref name))) if name == "pmt"
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_reduction_failure_logged_and_recorded_as_nan() {
        let log = CallLog::new();
        let hardware = Hardware::new(Box::new(MockCore::new(log.clone())))
            .with_dds(Box::new(MockDds::new("dds_729G", log.clone())))
            .with_camera(Box::new(MockCamera::new(4, 4, log.clone())));
        let params = StaticParameters::new()
            .with("StateReadout.readout_mode", "camera")
            .with("StateReadout.repeat_each_measurement", 2.0)
            .with("StateReadout.camera_readout_duration", 0.02)
            .with("IonsOnCamera.ion_number", 1.0)
            .with("dds_cw_parameters.729G", vec![220.0, 1.0, 1.0, 5.0]);

        let mut engine = Experiment::new("Exp", spec(2), hardware, Idle)
            .with_detector(Arc::new(MockIonDetector::failing("no ions found")))
            .prepare(&params)
            .await
            .unwrap();
        let outcome = engine.run_scan().await.unwrap();

        assert_eq!(outcome, RunOutcome::Complete);
        let data = &engine.results()["A"];
        assert_eq!(data.visited(), &[0, 1]);
        assert!(data.series("ion number:0").unwrap().iter().all(|v| v.is_nan()));
        assert!(logs_contain("Reduction failed"));
        assert!(logs_contain("no ions found"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_ndim_pause_checkpoint_is_inner_position() {
        let log = CallLog::new();
        let hardware = Hardware::new(Box::new(MockCore::new(log.clone())))
            .with_dds(Box::new(MockDds::new("dds_729G", log.clone())))
            .with_pmt(Box::new(MockPmt::scripted(vec![1], log.clone())));
        let spec = ScanSpec::new().sequence(
            "A",
            SequenceScan::new("Grid")
                .axis("A.a", Scannable::explicit(vec![1.0, 2.0, 3.0]))
                .axis("A.b", Scannable::explicit(vec![10.0, 20.0]))
                .ndim(),
        );

        let mut engine = Experiment::new("Exp", spec, hardware, Idle)
            .with_scheduler(ScriptedScheduler::new().pause_at(3))
            .prepare(&pmt_params())
            .await
            .unwrap();
        engine.run_scan().await.unwrap();

        assert_eq!(engine.results()["A"].visited(), &[0, 1, 2, 3, 4, 5]);
        logs_assert(|lines: &[&str]| {
            let paused: Vec<&&str> = lines.iter().filter(|l| l.contains("Scan paused")).collect();
            match paused.as_slice() {
                [line] if line.contains("position=(1, 1)") => Ok(()),
                other => Err(format!("expected one pause at (1, 1), got {:?}", other)),
            }
        });
        assert!(logs_contain("Scan resumed"));
    }
}
