//! Diagnostic view of held locks.

use chrono::{DateTime, Utc};
use std::thread::ThreadId;
use std::time::Duration;

/// Snapshot of one lock held by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    /// The lock key.
    pub key: String,

    /// The thread holding the lock.
    pub thread: ThreadId,

    /// The holding thread's name, if it has one.
    pub thread_name: Option<String>,

    /// When the lock was first acquired.
    pub lock_time: DateTime<Utc>,

    /// Reentrant hold count.
    pub hold_count: u32,

    /// Lease time left at snapshot time.
    pub expires_in: Duration,

    /// The owning thread exited without unlocking; the lock will be
    /// reclaimed once its lease runs out.
    pub reclaimable: bool,
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let thread = match &self.thread_name {
            Some(name) => name.clone(),
            None => format!("{:?}", self.thread),
        };
        write!(
            f,
            "{} (thread: {}, held: {}, expires in {}s{})",
            self.key,
            thread,
            self.hold_count,
            self.expires_in.as_secs(),
            if self.reclaimable { ", RECLAIMABLE" } else { "" }
        )
    }
}

/// Outcome of one reaper pass.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Keys whose in-process lease ran out and were reclaimed.
    pub expired_records: Vec<String>,

    /// Keys still held by a thread that has exited.
    pub dead_owner_records: Vec<String>,

    /// Expired rows removed from the shared store, any owner.
    pub reaped_rows: Vec<crate::store::LockRow>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_records.is_empty()
            && self.dead_owner_records.is_empty()
            && self.reaped_rows.is_empty()
    }
}
