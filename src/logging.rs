//! Tracing subscriber setup for the operator binary.
//!
//! The library only emits `tracing` events; embedding processes bring their
//! own subscriber. Filter with e.g. `RUST_LOG=clusterlock=debug`.

use tracing_subscriber::EnvFilter;

/// Target prefix of every clusterlock span and event.
pub const TARGET_PREFIX: &str = "clusterlock";

/// Default filter when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("{}={}", TARGET_PREFIX, level)
}

/// Install a stderr subscriber. Returns `false` if one was already set.
pub fn init_tracing(verbose: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
