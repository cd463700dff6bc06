//! Engine configuration using Figment
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `PULSESCAN_`
//! 2. TOML configuration file (default: `config/pulse_scan.toml`)
//! 3. Built-in defaults
//!
//! Nested keys are separated by a double underscore in environment variables:
//!
//! ```text
//! PULSESCAN_APPLICATION__LOG_LEVEL=debug
//! PULSESCAN_STORAGE__DATA_ROOT=/data
//! PULSESCAN_ENGINE__KINETIC_WAIT_ATTEMPTS=20
//! ```
//!
//! Experiment physics parameters (repeat count, thresholds, readout mode) are
//! not part of this file. They come from the parameter snapshot, see
//! [`crate::parameters`].

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, ScanError};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Result storage settings
    pub storage: StorageConfig,
    /// Bounds for blocking hardware waits
    pub engine: EngineConfig,
    /// Per-channel DDS frequency offsets, keyed by channel name
    pub dds: IndexMap<String, DdsOffset>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

/// Result storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; artifacts land in `<data_root>/<date>/<experiment>/`
    pub data_root: PathBuf,
    /// Write artifacts to disk. When false results are kept in memory only.
    pub write_artifacts: bool,
}

/// Bounds applied to blocking hardware waits inside the repeat loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Gate window for a single line-trigger edge search, in microseconds
    pub line_trigger_window_us: u64,
    /// Number of gate windows searched before giving up on the mains edge
    pub line_trigger_attempts: u32,
    /// Number of polls for a completed kinetic series
    pub kinetic_wait_attempts: u32,
    /// Back-off between kinetic-series polls, in milliseconds
    pub kinetic_wait_backoff_ms: u64,
}

/// Static offset of one DDS channel relative to the transition it drives
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DdsOffset {
    /// Offset in MHz added before the AOM conversion
    pub offset_mhz: f64,
    /// Double-pass AOM: the drive frequency is halved
    #[serde(default)]
    pub double_pass: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "pulse_scan".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            write_artifacts: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            line_trigger_window_us: 1000,
            line_trigger_attempts: 200,
            kinetic_wait_attempts: 50,
            kinetic_wait_backoff_ms: 10,
        }
    }
}

fn default_data_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("data")
}

impl EngineConfig {
    /// Line-trigger gate window as a duration
    pub fn line_trigger_window(&self) -> Duration {
        Duration::from_micros(self.line_trigger_window_us)
    }

    /// Back-off between kinetic-series polls as a duration
    pub fn kinetic_wait_backoff(&self) -> Duration {
        Duration::from_millis(self.kinetic_wait_backoff_ms)
    }
}

impl Settings {
    /// Load configuration from `config/pulse_scan.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/pulse_scan.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply. The result is validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PULSESCAN_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.engine.line_trigger_attempts == 0 {
            return Err(ScanError::Configuration(
                "engine.line_trigger_attempts must be > 0".to_string(),
            ));
        }
        if self.engine.kinetic_wait_attempts == 0 {
            return Err(ScanError::Configuration(
                "engine.kinetic_wait_attempts must be > 0".to_string(),
            ));
        }

        for (name, offset) in &self.dds {
            if !offset.offset_mhz.is_finite() {
                return Err(ScanError::Configuration(format!(
                    "dds.{}: offset_mhz must be finite",
                    name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.engine.line_trigger_window(), Duration::from_micros(1000));
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[engine]
kinetic_wait_attempts = 7

[dds.729G]
offset_mhz = -80.0
double_pass = true
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.engine.kinetic_wait_attempts, 7);
        // untouched sections keep their defaults
        assert_eq!(settings.engine.line_trigger_attempts, 200);
        let dds = settings.dds.get("729G").unwrap();
        assert!(dds.double_pass);
        assert_eq!(dds.offset_mhz, -80.0);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load_from("/nonexistent/pulse_scan.toml").unwrap();
        assert_eq!(settings.application.name, "pulse_scan");
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level"));
    }
}
