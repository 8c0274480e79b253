//! LockConfig struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a lock manager instance.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    // =========================================================================
    // Identity
    // =========================================================================
    /// Cluster-node identity written into every row this manager claims.
    /// Falls back to `user@host:pid` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    // =========================================================================
    // Lease settings
    // =========================================================================
    /// Lease applied by `lock()` when the caller gives no explicit timeout.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Seconds between background reaper passes.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    // =========================================================================
    // Store settings
    // =========================================================================
    /// Shared directory backing the directory store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,

    /// Age after which an unparsable row is treated as an abandoned claim.
    #[serde(default = "default_corrupt_row_grace_secs")]
    pub corrupt_row_grace_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            default_timeout_secs: default_timeout_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            store_dir: None,
            corrupt_row_grace_secs: default_corrupt_row_grace_secs(),
        }
    }
}
