//! Configuration constants and defaults for clusterlock.

/// Environment variable that overrides the configured node identity.
pub const NODE_ID_ENV: &str = "CLUSTERLOCK_NODE_ID";

// Default value functions for serde
pub(crate) fn default_timeout_secs() -> u64 {
    300
}
pub(crate) fn default_reaper_interval_secs() -> u64 {
    30
}
pub(crate) fn default_corrupt_row_grace_secs() -> u64 {
    60
}
