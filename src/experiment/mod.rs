//! Experiment orchestration.
//!
//! An [`Experiment`] bundles a scan specification, the hardware handles and a
//! [`PulseSequence`]. Preparing it yields a [`ScanEngine`] that scans every
//! sub-sequence with pause/resume at any scan index, flushes results in
//! batches of [`BATCH_SIZE`] and restores the CW state on exit.
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use pulse_scan::experiment::{Experiment, PulseSequence, RunOutcome, ShotContext};
//! use pulse_scan::hardware::mock::{CallLog, MockCore, MockDds, MockPmt};
//! use pulse_scan::hardware::Hardware;
//! use pulse_scan::parameters::StaticParameters;
//! use pulse_scan::scan::{Scannable, ScanSpec, SequenceScan};
//!
//! struct Spectroscopy;
//!
//! #[async_trait]
//! impl PulseSequence for Spectroscopy {
//!     async fn sequence(&mut self, _ctx: &mut ShotContext<'_>) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let log = CallLog::new();
//! let hardware = Hardware::new(Box::new(MockCore::new(log.clone())))
//!     .with_dds(Box::new(MockDds::new("dds_729G", log.clone())))
//!     .with_pmt(Box::new(MockPmt::scripted(vec![3, 12], log.clone())));
//! let spec = ScanSpec::new().sequence(
//!     "Spectrum",
//!     SequenceScan::new("Spectrum").axis("Spectrum.detuning", Scannable::range(-1e3, 1e3, 11)),
//! );
//! let parameters = StaticParameters::new()
//!     .with("StateReadout.readout_mode", "pmt")
//!     .with("StateReadout.repeat_each_measurement", 10.0)
//!     .with("StateReadout.threshold_list", vec![5.0])
//!     .with("StateReadout.pmt_readout_duration", 1e-3)
//!     .with("dds_cw_parameters.729G", vec![220.0, 1.0, 1.0, 5.0]);
//!
//! let mut engine = Experiment::new("Spectrum", spec, hardware, Spectroscopy)
//!     .prepare(&parameters)
//!     .await?;
//!
//! let outcome = engine.run_scan().await?;
//! engine.analyze().await?;
//! assert_eq!(outcome, RunOutcome::Complete);
//! assert_eq!(engine.results()["Spectrum"].visited().len(), 11);
//! # Ok::<(), pulse_scan::ScanError>(())
//! # }).unwrap();
//! ```

pub mod data;
pub mod program;
pub mod run_engine;
pub mod settings;

pub use data::ScanData;
pub use program::{PulseSequence, ShotContext};
pub use run_engine::{EngineState, Experiment, RunOutcome, ScanEngine, BATCH_SIZE};
pub use settings::{LineTriggerSettings, RunSettings};
