//! Structured logging setup.
//!
//! A thin wrapper around `tracing-subscriber`'s env-filtered console
//! formatter. `RUST_LOG` controls verbosity the usual way
//! (`RUST_LOG=taskflow=debug`); with nothing set, `info` and above print.

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. Safe to call once at process
/// startup; calling it twice panics, same as `tracing_subscriber::fmt().init()`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
