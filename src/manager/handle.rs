//! Lease handles returned by `LockManager::lock`.

use super::Inner;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// Proof of one claim on a key.
///
/// A handle stays valid while its claim is held, across reentrant
/// lock/unlock pairs. Once the claim is fully released, expires, or is
/// reclaimed, `refresh` fails with [`LockError::Expired`](crate::LockError::Expired).
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub(super) inner: Arc<Inner>,
    pub(super) key: String,
    pub(super) lease: u64,
    pub(super) timeout: Duration,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Claim id recorded in the shared store.
    pub fn lease(&self) -> u64 {
        self.lease
    }

    /// Lease length applied on acquisition and on each refresh.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Extend the lease by the lock's timeout, starting now.
    ///
    /// An error means exclusivity is gone: whatever the lock protected must
    /// be abandoned.
    pub fn refresh(&self) -> Result<()> {
        self.inner.refresh(&self.key, self.lease)
    }

    /// Approximate lease time left; zero once the lock is lost.
    ///
    /// Measured against this process's monotonic clock; the shared store's
    /// own clock may disagree by the skew between nodes.
    pub fn remaining(&self) -> Duration {
        self.inner.remaining(&self.key, self.lease)
    }

    pub fn seconds_remaining(&self) -> u64 {
        self.remaining().as_secs()
    }

    /// Whether this claim is still live in this process.
    pub fn is_valid(&self) -> bool {
        !self.remaining().is_zero()
    }
}
