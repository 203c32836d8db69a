//! Subscriber installation.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use super::config::{DEFAULT_FILTER, LogFormat, TracingConfig};

/// Installs a global `tracing` subscriber for pipeline diagnostics.
///
/// Hosts that already install their own subscriber should skip this; the
/// pipeline only emits events and never requires a particular subscriber.
/// Installing twice returns an error instead of panicking. Invalid filter
/// directives fall back to [`DEFAULT_FILTER`].
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_new(config.filter()).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi())
        .with_file(config.location())
        .with_line_number(config.location());

    let registry = tracing_subscriber::registry().with(filter);
    match config.format() {
        LogFormat::Json => registry.with(layer.json().flatten_event(true)).try_init(),
        LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
    }
    .context("Failed to install the vigil log subscriber")
}
