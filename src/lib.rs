//! Scan-loop engine for trapped-ion pulse sequences.
//!
//! The crate drives a pulse program over 1-D and N-D parameter sweeps, reads
//! out ion fluorescence on a PMT or camera, reduces each scan point to
//! populations and streams the results to storage and live plots. Hardware is
//! reached through the traits in [`hardware`]; [`hardware::mock`] provides
//! simulated devices for tests and the `simulate` command.

pub mod calibration;
pub mod config;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod logging;
pub mod parameters;
pub mod readout;
pub mod scan;
pub mod scheduler;
pub mod sink;

pub use error::{AppResult, DeviceError, FitError, HookError, ScanError};
pub use experiment::{EngineState, Experiment, PulseSequence, RunOutcome, ScanEngine, ShotContext};
