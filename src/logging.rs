//! Tracing subscriber setup.
//!
//! The default filter directive comes from `application.log_level`; `RUST_LOG`
//! directives are layered on top so a single module can be turned up without
//! touching the config file.

use tracing_subscriber::EnvFilter;

use crate::config::ApplicationConfig;

/// Install the global tracing subscriber.
///
/// Calling this twice is harmless: the second installation attempt is ignored,
/// which keeps test binaries that initialise logging per test working.
pub fn init(app: &ApplicationConfig) {
    let filter = EnvFilter::from_default_env().add_directive(
        app.log_level
            .parse()
            .unwrap_or_else(|_| tracing::Level::INFO.into()),
    );

    let result = if app.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if result.is_ok() {
        tracing::debug!(level = %app.log_level, json = app.json_logs, "Logging initialised");
    }
}
