//! Shared lock store: the cluster-wide arbiter of lock ownership.
//!
//! A store holds at most one [`LockRow`] per key. Its atomic
//! insert-if-absent ([`LockStore::try_claim`]) is the only coordination
//! point between cluster nodes; everything a manager remembers in memory is
//! derived from rows it managed to insert.
//!
//! # Backends
//!
//! - [`DirectoryStore`]: one `<key>.lock` file per row in a directory shared
//!   by all nodes. Uniqueness comes from exclusive publication of the file.
//! - [`MemoryStore`]: a mutex-protected map. Several managers may share one
//!   instance through an `Arc` to model a cluster inside one process.

mod directory;
mod memory;
mod row;


// Re-export public API
pub use directory::DirectoryStore;
pub use memory::MemoryStore;
pub use row::{LockRow, lease_expiry};

use crate::error::{LockError, Result};
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::time::Duration;

/// Result of an atomic claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The row was inserted; the caller now owns the key cluster-wide.
    Claimed(LockRow),
    /// A live row already exists. `None` when the row could not be read.
    Held(Option<LockRow>),
}

/// Operations every shared store must provide.
///
/// Each method is one self-contained operation: any file handle or
/// connection it opens is released before it returns, on success or error.
pub trait LockStore: Send + Sync + Debug {
    /// Atomically insert a row for `key`, lapsing after `timeout`.
    ///
    /// Under concurrent claims for one key exactly one caller gets
    /// `Claimed`. An expired row found in the way is reaped and the insert
    /// retried once.
    fn try_claim(
        &self,
        key: &str,
        owner: &NodeId,
        lease: u64,
        timeout: Duration,
    ) -> Result<ClaimOutcome>;

    /// Remove the row iff it belongs to `owner`/`lease`.
    ///
    /// Returns `false` (and leaves the row alone) when someone else holds it
    /// or it is already gone.
    fn release(&self, key: &str, owner: &NodeId, lease: u64) -> Result<bool>;

    /// Push the row's expiry to `now + timeout`.
    ///
    /// Fails with [`LockError::Expired`] if the row is gone, expired, or
    /// belongs to another claim.
    fn refresh(&self, key: &str, owner: &NodeId, lease: u64, timeout: Duration)
    -> Result<LockRow>;

    /// The current row for `key`, expired or not.
    fn get(&self, key: &str) -> Result<Option<LockRow>>;

    /// Every row in the store, sorted by key.
    fn list(&self) -> Result<Vec<LockRow>>;

    /// Remove every row that expired before `now`, whoever owns it.
    fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<LockRow>>;

    /// Unconditionally remove the row for `key` (operator override).
    fn remove(&self, key: &str) -> Result<Option<LockRow>>;
}

/// Reject keys no backend can store.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(LockError::InvalidKey("lock key must not be empty".to_string()));
    }
    Ok(())
}

/// Encode a key as a filesystem-safe name.
///
/// `[A-Za-z0-9_-]` pass through; every other byte becomes `%XX`. The result
/// never starts with `.`, so it cannot collide with temp files.
pub(crate) fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}
