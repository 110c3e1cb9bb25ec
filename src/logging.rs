// src/logging.rs

//! Installs the `tracing` subscriber used by applications embedding the client.

use std::sync::Arc;
use tracing_subscriber::{Registry, filter::EnvFilter, prelude::*, reload};

/// A handle for changing the active log filter at runtime.
pub type LogReloadHandle = Arc<reload::Handle<EnvFilter, Registry>>;

/// Installs a global subscriber filtered at `level`, unless `RUST_LOG` is set.
///
/// # Errors
///
/// Fails if a global subscriber has already been installed.
pub fn init(level: &str) -> anyhow::Result<LogReloadHandle> {
    // Get initial log level from env var or the configured level.
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());

    // Create a reloadable filter layer.
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true),
        )
        .try_init()?;

    Ok(Arc::new(reload_handle))
}

/// Replaces the active filter, e.g. `"debug"` or `"info,ferrocms::core::session=trace"`.
pub fn set_level(handle: &LogReloadHandle, level: &str) -> anyhow::Result<()> {
    handle.reload(EnvFilter::new(level))?;
    Ok(())
}

/// Routes log output through the test harness. Safe to call from every test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
