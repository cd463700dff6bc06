//! The experiment author's side of a scan: the pulse program and its hooks.

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::calibration::FrequencyPlan;
use crate::error::{AppResult, HookError};
use crate::hardware::Hardware;
use crate::parameters::ParameterSnapshot;
use crate::scan::VariableBindings;

use super::data::ScanData;

/// Everything a pulse program may touch while one shot is being built.
pub struct ShotContext<'a> {
    /// Sub-sequence being scanned
    pub seq_name: &'a str,
    /// Flat scan index
    pub index: usize,
    /// Repetition within the index (0 in `set_subsequence`)
    pub repetition: usize,
    /// Hardware handles
    pub hardware: &'a mut Hardware,
    /// Swept parameter values for this index
    pub bindings: &'a VariableBindings,
    /// Parameter snapshot of the run
    pub params: &'a ParameterSnapshot,
    /// Current line calibration and DDS offsets
    pub frequencies: &'a FrequencyPlan,
}

impl ShotContext<'_> {
    /// Value of a swept parameter
    pub fn get_variable_parameter(&self, name: &str) -> AppResult<f64> {
        self.bindings.get_variable_parameter(name)
    }

    /// Swept value if `name` is swept, otherwise the snapshot value
    pub fn value(&self, name: &str) -> AppResult<f64> {
        if self.bindings.is_variable(name) {
            self.bindings.get_variable_parameter(name)
        } else {
            self.params.f64(name)
        }
    }
}

/// A pulse sequence driven by the scan engine.
///
/// Only [`PulseSequence::sequence`] is required. Hooks that are not
/// overridden report [`HookError::Missing`], which the engine treats as
/// nothing to do.
#[async_trait]
pub trait PulseSequence: Send {
    /// Called once after the parameter snapshot is loaded
    async fn run_initially(&mut self, _params: &ParameterSnapshot) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once per scan point, before the repeats
    async fn set_subsequence(&mut self, _ctx: &mut ShotContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// One shot of the pulse program
    async fn sequence(&mut self, ctx: &mut ShotContext<'_>) -> anyhow::Result<()>;

    /// Post-scan hook for `seq_name`, e.g. a fit on the collected series.
    ///
    /// Also consulted when a sub-sequence is terminated: `Ok` continues with
    /// the next sub-sequence, anything else ends the run.
    async fn run_after(&mut self, _seq_name: &str, _data: &ScanData) -> Result<(), HookError> {
        Err(HookError::Missing)
    }

    /// Called from `analyze` with the results of every scanned sub-sequence
    async fn run_finally(
        &mut self,
        _results: &IndexMap<String, ScanData>,
    ) -> Result<(), HookError> {
        Err(HookError::Missing)
    }
}
