//! RAII lock guard implementation.

use super::handle::LockHandle;
use crate::error::Result;

/// RAII guard for one level of a lock.
///
/// When dropped, the guard performs one `unlock`. If that fails (the lease
/// expired, the manager shut down), a warning is logged but no panic occurs.
#[derive(Debug)]
pub struct LockGuard {
    handle: LockHandle,

    /// Whether the lock has been released manually.
    released: bool,
}

impl LockGuard {
    pub(super) fn new(handle: LockHandle) -> Self {
        Self {
            handle,
            released: false,
        }
    }

    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }

    pub fn key(&self) -> &str {
        self.handle.key()
    }

    /// Manually release the lock.
    ///
    /// This is useful when you want to release the lock before the guard
    /// goes out of scope, and want to handle errors explicitly.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.handle.inner.unlock(&self.handle.key)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.handle.inner.unlock(&self.handle.key)
        {
            tracing::warn!(key = %self.handle.key, error = %e, "failed to release lock guard");
        }
    }
}
