//! Structured logging setup.
//!
//! Logs go to stderr so stdout stays reserved for the invocation result.
//! `RUST_LOG`, when set, wins over the configured level.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber once; later calls are no-ops.
pub fn init_logging(level: &str, format: LogFormat) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let (text, json) = match format {
            LogFormat::Text => (
                Some(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_level(true),
                ),
                None,
            ),
            LogFormat::Json => (
                None,
                Some(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .json()
                        .with_current_span(true),
                ),
            ),
        };

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(text)
            .with(json);

        // A subscriber may already be installed, e.g. by a test harness.
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already set, keeping it");
        }
    });
}
