//! Tracing subscriber setup.
//!
//! Logs always go to stderr so that stdout carries only the report.
//! `RUST_LOG` wins over the configured level.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: the configured level for this crate,
/// warnings for dependencies.
pub fn default_filter(level: &str) -> String {
    format!("marlin_harness={level},warn")
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    let base = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let result = match config.format {
        LogFormat::Json => registry.with(base.json().with_current_span(true)).try_init(),
        LogFormat::Pretty => registry.with(base.pretty()).try_init(),
        LogFormat::Compact => registry
            .with(base.with_thread_ids(false).with_file(false).compact())
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
