//! Diagnostics of greeting programs go to stderr, so stdout carries only greetings.

use ignore_result::Ignore;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter if `RUST_LOG` is absent or invalid.
pub const DEFAULT_FILTER: &str = "warn";

/// Installs a global subscriber writing to stderr filtered by `RUST_LOG`.
///
/// Installing more than once is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init()
        .ignore();
}
