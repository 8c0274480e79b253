//! Cluster-aware lock manager.
//!
//! # Lock Model
//!
//! Each key is held by at most one thread in the cluster:
//! - Within a process, an in-memory table records the owning thread, a
//!   reentrant hold count, and the lease expiry.
//! - Across processes, a row in the shared [`LockStore`] proves ownership.
//!   A key enters the table only after the store accepted the claim.
//!
//! Contention fails fast with [`LockError::AlreadyLocked`]; there is no
//! waiting or queueing.
//!
//! # Leases
//!
//! Every lock carries a timeout. Once it elapses the lock is logically
//! released: the next `lock` call (or the reaper) reclaims it, and the old
//! owner's `unlock`/`refresh` fail with [`LockError::Expired`]. A thread
//! that exits without unlocking is only reported; its lock is reclaimed
//! when the lease runs out.
//!
//! # Lifecycle
//!
//! Managers are constructed explicitly and handed to whoever needs them.
//! `init()` starts the reaper; `destroy()` (also run on drop) releases
//! exactly the rows this manager claimed and leaves other nodes' rows alone.

mod guard;
mod handle;
mod info;
mod reaper;
mod table;

#[cfg(test)]
mod tests;

// Re-export public API
pub use guard::LockGuard;
pub use handle::LockHandle;
pub use info::{LockInfo, SweepReport};

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::node::NodeId;
use crate::store::{ClaimOutcome, DirectoryStore, LockRow, LockStore, validate_key};
use chrono::Utc;
use reaper::Reaper;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use table::{LockRecord, LockTable};

/// Per-key exclusive locks shared by the threads of one process and
/// coordinated with other nodes through a [`LockStore`].
#[derive(Debug)]
pub struct LockManager {
    inner: Arc<Inner>,
    reaper: Mutex<Option<Reaper>>,
}

/// State shared between the manager, its handles, and the reaper.
#[derive(Debug)]
pub(crate) struct Inner {
    node: NodeId,
    config: LockConfig,
    store: Arc<dyn LockStore>,
    table: Mutex<LockTable>,
    next_lease: AtomicU64,
    shut_down: AtomicBool,
}

impl LockManager {
    /// Create a manager over `store`. The reaper is not started until
    /// [`init`](Self::init).
    pub fn new(config: LockConfig, store: Arc<dyn LockStore>) -> Result<Self> {
        config.validate()?;
        let node = config.node_id();

        // Seeded from the clock so a restarted node never reuses lease ids.
        let first_lease = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(1);

        tracing::debug!(node = %node, "created lock manager");
        Ok(Self {
            inner: Arc::new(Inner {
                node,
                config,
                store,
                table: Mutex::new(LockTable::default()),
                next_lease: AtomicU64::new(first_lease),
                shut_down: AtomicBool::new(false),
            }),
            reaper: Mutex::new(None),
        })
    }

    /// Create a manager over the directory store named by `config.store_dir`.
    pub fn with_directory_store(config: LockConfig) -> Result<Self> {
        let dir = config.store_dir.clone().ok_or_else(|| {
            LockError::Config("store_dir must be set to use the directory store".to_string())
        })?;
        let store =
            DirectoryStore::open(dir)?.with_corrupt_row_grace(config.corrupt_row_grace());
        Self::new(config, Arc::new(store))
    }

    /// Start the background reaper. Calling it again is a no-op.
    pub fn init(&self) -> Result<()> {
        self.inner.ensure_running()?;

        let mut reaper = self.reaper.lock().unwrap_or_else(|p| p.into_inner());
        if reaper.is_none() {
            let interval = self.inner.config.reaper_interval();
            *reaper = Some(Reaper::spawn(Arc::downgrade(&self.inner), interval)?);
            tracing::info!(
                node = %self.inner.node,
                interval_secs = interval.as_secs(),
                "lock reaper started"
            );
        }
        Ok(())
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node
    }

    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    /// Lock `key` for the calling thread with the configured default timeout.
    pub fn lock(&self, key: &str) -> Result<LockHandle> {
        self.inner.lock(key, self.inner.config.default_timeout())
    }

    /// Lock `key` for the calling thread, lapsing after `timeout`.
    ///
    /// Re-locking a key the thread already holds increments its hold count
    /// and returns a handle to the same claim; the lease is not extended.
    pub fn lock_with_timeout(&self, key: &str, timeout: Duration) -> Result<LockHandle> {
        self.inner.lock(key, timeout)
    }

    /// Like [`lock`](Self::lock), but unlocks once when the guard drops.
    pub fn guard(&self, key: &str) -> Result<LockGuard> {
        self.lock(key).map(LockGuard::new)
    }

    pub fn guard_with_timeout(&self, key: &str, timeout: Duration) -> Result<LockGuard> {
        self.lock_with_timeout(key, timeout).map(LockGuard::new)
    }

    /// Undo one `lock` by the calling thread; the last one frees the key.
    pub fn unlock(&self, key: &str) -> Result<()> {
        self.inner.unlock(key)
    }

    /// Whether anyone in the cluster currently holds `key`.
    pub fn is_locked(&self, key: &str) -> Result<bool> {
        self.inner.is_locked(key)
    }

    /// Whether the calling thread holds `key`.
    pub fn holds_lock(&self, key: &str) -> bool {
        self.inner.holds_lock(key)
    }

    /// Locks held in this process, sorted by key.
    pub fn get_locks(&self) -> Vec<LockInfo> {
        self.inner.get_locks()
    }

    /// Rows in the shared store, from every node.
    pub fn store_locks(&self) -> Result<Vec<LockRow>> {
        self.inner.store.list()
    }

    /// Run one reaper pass now.
    pub fn sweep(&self) -> SweepReport {
        self.inner.sweep()
    }

    /// Stop the reaper and release every row this manager claimed.
    ///
    /// Rows owned by other nodes are untouched. Afterwards `lock`, `unlock`
    /// and `refresh` fail with [`LockError::Shutdown`]. Idempotent.
    pub fn destroy(&self) {
        if let Some(reaper) = self
            .reaper
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            reaper.stop();
        }
        self.inner.destroy();
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, LockTable> {
        // Records are replaced whole under the guard, so a poisoned table is
        // still consistent.
        self.table.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(LockError::Shutdown);
        }
        Ok(())
    }

    fn next_lease(&self) -> u64 {
        self.next_lease.fetch_add(1, Ordering::Relaxed)
    }

    fn handle(self: &Arc<Self>, key: &str, lease: u64, timeout: Duration) -> LockHandle {
        LockHandle {
            inner: Arc::clone(self),
            key: key.to_string(),
            lease,
            timeout,
        }
    }

    fn lock(self: &Arc<Self>, key: &str, timeout: Duration) -> Result<LockHandle> {
        validate_key(key)?;
        if timeout.is_zero() {
            return Err(LockError::InvalidTimeout);
        }
        self.ensure_running()?;

        let mut table = self.table();
        let now = Instant::now();

        let existing = table
            .get(key)
            .map(|r| (r.is_expired_at(now), r.is_held_by_current_thread()));

        match existing {
            Some((true, _)) => {
                if let Some(stale) = table.remove(key) {
                    self.reclaim(&stale, "lease expired");
                }
            }
            Some((false, true)) => {
                if let Some(record) = table.get_mut(key) {
                    record.hold_count += 1;
                    tracing::debug!(key, hold_count = record.hold_count, "reentered lock");
                    return Ok(self.handle(key, record.lease, record.timeout));
                }
            }
            Some((false, false)) => {
                if let Some(record) = table.get_mut(key) {
                    if !record.owner_alive() && !record.dead_owner_reported {
                        record.dead_owner_reported = true;
                        tracing::warn!(
                            key,
                            holder = %record.holder(),
                            "lock is held by a thread that exited without unlocking"
                        );
                    }
                    return Err(LockError::AlreadyLocked {
                        key: key.to_string(),
                        holder: format!("{} on {}", record.holder(), self.node),
                    });
                }
            }
            None => {}
        }

        let lease = self.next_lease();
        // Taken before the claim so the local lease never outlives the row.
        let started = Instant::now();

        match self.store.try_claim(key, &self.node, lease, timeout)? {
            ClaimOutcome::Claimed(row) => {
                table.insert(LockRecord::for_current_thread(
                    key,
                    lease,
                    timeout,
                    row.created_at,
                    started + timeout,
                ));
                tracing::debug!(key, lease, timeout_secs = timeout.as_secs(), "acquired lock");
                Ok(self.handle(key, lease, timeout))
            }
            ClaimOutcome::Held(holder) => Err(LockError::AlreadyLocked {
                key: key.to_string(),
                holder: holder
                    .map(|row| row.owner.to_string())
                    .unwrap_or_else(|| "an unknown owner".to_string()),
            }),
        }
    }

    fn unlock(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.ensure_running()?;

        let mut table = self.table();
        let now = Instant::now();

        let existing = table
            .get(key)
            .map(|r| (r.is_held_by_current_thread(), r.is_expired_at(now)));

        match existing {
            None => Err(LockError::NotOwner(key.to_string())),
            Some((false, _)) => {
                tracing::warn!(key, "unlock attempted by a thread that does not hold the lock");
                Err(LockError::NotOwner(key.to_string()))
            }
            Some((true, true)) => {
                if let Some(stale) = table.remove(key) {
                    self.reclaim(&stale, "lease expired before unlock");
                }
                Err(LockError::Expired(key.to_string()))
            }
            Some((true, false)) => {
                let released = match table.get_mut(key) {
                    Some(record) if record.hold_count > 1 => {
                        record.hold_count -= 1;
                        tracing::debug!(key, hold_count = record.hold_count, "exited lock");
                        None
                    }
                    _ => table.remove(key),
                };

                if let Some(record) = released
                    && !self.store.release(key, &self.node, record.lease)?
                {
                    tracing::warn!(
                        key,
                        lease = record.lease,
                        "lock row was already gone when unlocking"
                    );
                }
                Ok(())
            }
        }
    }

    fn refresh(&self, key: &str, lease: u64) -> Result<()> {
        self.ensure_running()?;

        let mut table = self.table();
        let now = Instant::now();

        let existing = table.get(key).filter(|r| r.lease == lease).map(|r| {
            (
                r.is_held_by_current_thread(),
                r.is_expired_at(now),
                r.timeout,
            )
        });

        let timeout = match existing {
            None => return Err(LockError::Expired(key.to_string())),
            Some((false, _, _)) => return Err(LockError::NotOwner(key.to_string())),
            Some((true, true, _)) => {
                if let Some(stale) = table.remove(key) {
                    self.reclaim(&stale, "lease expired before refresh");
                }
                return Err(LockError::Expired(key.to_string()));
            }
            Some((true, false, timeout)) => timeout,
        };

        let started = Instant::now();
        match self.store.refresh(key, &self.node, lease, timeout) {
            Ok(_) => {
                if let Some(record) = table.get_mut(key) {
                    record.expires_at = started + timeout;
                }
                tracing::debug!(key, lease, "refreshed lock");
                Ok(())
            }
            Err(LockError::Expired(_)) => {
                table.remove(key);
                tracing::warn!(key, lease, "lock row was lost before refresh");
                Err(LockError::Expired(key.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn remaining(&self, key: &str, lease: u64) -> Duration {
        let now = Instant::now();
        self.table()
            .get(key)
            .filter(|r| r.lease == lease)
            .map(|r| r.remaining(now))
            .unwrap_or(Duration::ZERO)
    }

    fn is_locked(&self, key: &str) -> Result<bool> {
        validate_key(key)?;

        let expired_lease = match self.table().get(key) {
            Some(record) if !record.is_expired_at(Instant::now()) => return Ok(true),
            Some(record) => Some(record.lease),
            None => None,
        };

        // Our own lapsed row may still be on disk for a moment; it does not count.
        let own_lapsed_row =
            |row: &LockRow| expired_lease.is_some_and(|lease| row.is_owned_by(&self.node, lease));
        Ok(self
            .store
            .get(key)?
            .is_some_and(|row| !row.is_expired() && !own_lapsed_row(&row)))
    }

    fn holds_lock(&self, key: &str) -> bool {
        let now = Instant::now();
        self.table()
            .get(key)
            .is_some_and(|r| r.is_held_by_current_thread() && !r.is_expired_at(now))
    }

    fn get_locks(&self) -> Vec<LockInfo> {
        let now = Instant::now();
        let mut locks: Vec<LockInfo> = self
            .table()
            .records()
            .filter(|r| !r.is_expired_at(now))
            .map(|r| LockInfo {
                key: r.key.clone(),
                thread: r.thread,
                thread_name: r.thread_name.clone(),
                lock_time: r.created_at,
                hold_count: r.hold_count,
                expires_in: r.remaining(now),
                reclaimable: !r.owner_alive(),
            })
            .collect();

        locks.sort_by(|a, b| a.key.cmp(&b.key));
        locks
    }

    /// Drop the row behind a record that is no longer held. Failures are
    /// left for the store-side reap of a later pass.
    fn reclaim(&self, record: &LockRecord, reason: &str) {
        tracing::warn!(
            key = %record.key,
            lease = record.lease,
            holder = %record.holder(),
            reason,
            "reclaiming lock"
        );

        if let Err(e) = self.store.release(&record.key, &self.node, record.lease) {
            tracing::warn!(
                key = %record.key,
                error = %e,
                "failed to release reclaimed lock row; retrying on a later pass"
            );
        }
    }

    fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        {
            let mut table = self.table();

            for record in table.drain_expired(Instant::now()) {
                self.reclaim(&record, "lease expired");
                report.expired_records.push(record.key);
            }

            for record in table.records_mut() {
                if record.owner_alive() {
                    continue;
                }
                if !record.dead_owner_reported {
                    record.dead_owner_reported = true;
                    tracing::warn!(
                        key = %record.key,
                        holder = %record.holder(),
                        expires_in_secs = record.remaining(Instant::now()).as_secs(),
                        "thread exited without unlocking; lock is reclaimed when its lease expires"
                    );
                }
                report.dead_owner_records.push(record.key.clone());
            }
        }

        match self.store.reap_expired(Utc::now()) {
            Ok(rows) => {
                for row in &rows {
                    tracing::warn!(
                        key = %row.key,
                        owner = %row.owner,
                        lease = row.lease,
                        "reaped expired lock row"
                    );
                }
                report.reaped_rows = rows;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to reap lock store; retrying on the next pass");
            }
        }

        report.expired_records.sort();
        report.dead_owner_records.sort();
        report
    }

    fn destroy(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let records = self.table().drain();
        let mut released = 0usize;

        for record in &records {
            match self.store.release(&record.key, &self.node, record.lease) {
                Ok(true) => released += 1,
                Ok(false) => {
                    tracing::debug!(key = %record.key, "lock row already gone at shutdown");
                }
                Err(e) => {
                    tracing::warn!(
                        key = %record.key,
                        error = %e,
                        "failed to release lock row at shutdown"
                    );
                }
            }
        }

        tracing::info!(node = %self.node, released, "lock manager destroyed");
    }
}
