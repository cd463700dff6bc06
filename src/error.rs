//! Custom error types for the scan engine.
//!
//! This module defines the primary error type, `ScanError`, together with the
//! narrower error types that the engine grades differently when deciding
//! whether a failure is fatal.
//!
//! ## Error Hierarchy
//!
//! - **`ScanError`**: everything that can end a run. Configuration problems are
//!   raised before any hardware is touched; device failures always propagate
//!   because a misconfigured device is unsafe to keep driving.
//! - **`DeviceError`**: raised by hardware handles. `Underflow` is the one
//!   transient case: the engine retries it exactly once after forcing a
//!   synchronization barrier.
//! - **`HookError`**: outcome of a post-scan hook. `Missing` is not a failure,
//!   `Fit` stops the remaining sub-sequences, `Other` is logged and ignored.
//!
//! By using `#[from]`, `ScanError` can be created from the underlying error
//! types with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Parameter '{0}' not found in parameter snapshot")]
    MissingParameter(String),

    #[error("Parameter '{name}' has wrong type: expected {expected}")]
    ParameterType { name: String, expected: &'static str },

    #[error("{0} is not a scannable parameter")]
    NotScannable(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Sequence '{seq_name}' failed at scan index {index}: {source}")]
    Sequence {
        seq_name: String,
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Reduction error: {0}")]
    Reduction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

/// Errors raised by hardware device handles.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Real-time buffer underflow: the event was scheduled in the past.
    #[error("RTIO underflow on '{0}'")]
    Underflow(String),

    #[error("Device '{device}' fault: {message}")]
    Fault { device: String, message: String },

    #[error("Timed out waiting for '{0}'")]
    Timeout(String),

    #[error("Device '{0}' is not configured")]
    NotConfigured(String),
}

impl DeviceError {
    /// Whether a single retry after a synchronization barrier may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::Underflow(_))
    }
}

/// Curve fit failed on collected scan data.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Fit failed: {0}")]
pub struct FitError(pub String);

/// Outcome of a user-supplied post-scan or post-run hook.
#[derive(Error, Debug)]
pub enum HookError {
    /// No hook registered for the sub-sequence.
    #[error("no hook registered")]
    Missing,

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::NotScannable("Rabi.duration".to_string());
        assert_eq!(err.to_string(), "Rabi.duration is not a scannable parameter");
    }

    #[test]
    fn test_only_underflow_is_transient() {
        assert!(DeviceError::Underflow("dds_729G".into()).is_transient());
        assert!(!DeviceError::Timeout("camera".into()).is_transient());
        assert!(!DeviceError::Fault {
            device: "urukul0_cpld".into(),
            message: "no response".into(),
        }
        .is_transient());
    }

    #[test]
    fn test_hook_error_from_fit_error() {
        let err: HookError = FitError("singular matrix".into()).into();
        assert!(matches!(err, HookError::Fit(_)));
        assert_eq!(err.to_string(), "Fit failed: singular matrix");
    }
}
