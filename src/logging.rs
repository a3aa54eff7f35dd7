//! Tracing subscriber setup
//!
//! The library only emits `tracing` events; nothing is printed unless the
//! application installs a subscriber. [`init`] is a convenience for binaries
//! and tests.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"trueno_automl=info"`).
///
/// Returns `false` if a global subscriber was already installed; calling it
/// twice is harmless.
pub fn init(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .is_ok()
}
