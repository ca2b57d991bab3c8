//! Logging bootstrap for sheetkit binaries and tests.
//!
//! Library crates only emit `tracing` events; installing a subscriber is left
//! to the process entry point.

use tracing_subscriber::{EnvFilter, fmt};

/// Default filter when `RUST_LOG` is unset.
pub const C_LOG_FILTER_DEFAULT: &str = "info";

/// Install the global subscriber.
///
/// # Environment
/// - `RUST_LOG`: filter directives (default `info`),
///   e.g. `RUST_LOG=sheetkit_io_xlsx=debug`
///
/// # Panics
/// If a global subscriber is already installed.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(C_LOG_FILTER_DEFAULT));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .init();
    tracing::debug!("logging initialized");
}

/// Install a debug-level subscriber routed through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
