//! In-process lock records.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

thread_local! {
    // Dropped when the thread exits, which is how records notice a dead owner.
    static LIVENESS: Arc<()> = Arc::new(());
}

/// Liveness probe for the calling thread.
fn current_liveness() -> Weak<()> {
    LIVENESS.with(Arc::downgrade)
}

/// A lock held by one thread of this process.
#[derive(Debug)]
pub(crate) struct LockRecord {
    pub(crate) key: String,
    pub(crate) thread: ThreadId,
    pub(crate) thread_name: Option<String>,
    liveness: Weak<()>,
    pub(crate) hold_count: u32,
    pub(crate) lease: u64,
    pub(crate) timeout: Duration,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) expires_at: Instant,
    pub(crate) dead_owner_reported: bool,
}

impl LockRecord {
    /// Record a fresh claim by the calling thread.
    pub(crate) fn for_current_thread(
        key: &str,
        lease: u64,
        timeout: Duration,
        created_at: DateTime<Utc>,
        expires_at: Instant,
    ) -> Self {
        let current = thread::current();
        Self {
            key: key.to_string(),
            thread: current.id(),
            thread_name: current.name().map(str::to_string),
            liveness: current_liveness(),
            hold_count: 1,
            lease,
            timeout,
            created_at,
            expires_at,
            dead_owner_reported: false,
        }
    }

    pub(crate) fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub(crate) fn is_held_by_current_thread(&self) -> bool {
        self.thread == thread::current().id()
    }

    /// False once the owning thread has exited.
    pub(crate) fn owner_alive(&self) -> bool {
        self.liveness.strong_count() > 0
    }

    pub(crate) fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Human-readable owner, used in contention errors and logs.
    pub(crate) fn holder(&self) -> String {
        match &self.thread_name {
            Some(name) => format!("thread '{}'", name),
            None => format!("thread {:?}", self.thread),
        }
    }
}

/// All locks held by this process, keyed by lock key.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    records: HashMap<String, LockRecord>,
}

impl LockTable {
    pub(crate) fn get(&self, key: &str) -> Option<&LockRecord> {
        self.records.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut LockRecord> {
        self.records.get_mut(key)
    }

    pub(crate) fn insert(&mut self, record: LockRecord) {
        self.records.insert(record.key.clone(), record);
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<LockRecord> {
        self.records.remove(key)
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &LockRecord> {
        self.records.values()
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut LockRecord> {
        self.records.values_mut()
    }

    /// Remove and return every record whose lease ran out.
    pub(crate) fn drain_expired(&mut self, now: Instant) -> Vec<LockRecord> {
        let expired: Vec<String> = self
            .records
            .values()
            .filter(|record| record.is_expired_at(now))
            .map(|record| record.key.clone())
            .collect();

        expired
            .iter()
            .filter_map(|key| self.records.remove(key))
            .collect()
    }

    /// Remove and return every record.
    pub(crate) fn drain(&mut self) -> Vec<LockRecord> {
        self.records.drain().map(|(_, record)| record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, ttl: Duration) -> LockRecord {
        LockRecord::for_current_thread(key, 1, ttl, Utc::now(), Instant::now() + ttl)
    }

    #[test]
    fn record_belongs_to_creating_thread() {
        let rec = record("k", Duration::from_secs(5));

        assert!(rec.is_held_by_current_thread());
        assert!(rec.owner_alive());
        assert_eq!(rec.hold_count, 1);

        let other = std::thread::spawn(move || rec.is_held_by_current_thread())
            .join()
            .unwrap();
        assert!(!other);
    }

    #[test]
    fn record_detects_exited_owner() {
        let rec = std::thread::spawn(|| record("k", Duration::from_secs(5)))
            .join()
            .unwrap();

        assert!(!rec.owner_alive());
    }

    #[test]
    fn holder_uses_thread_name() {
        let rec = std::thread::Builder::new()
            .name("worker-7".to_string())
            .spawn(|| record("k", Duration::from_secs(5)))
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(rec.holder(), "thread 'worker-7'");
    }

    #[test]
    fn drain_expired_keeps_live_records() {
        let mut table = LockTable::default();
        table.insert(record("live", Duration::from_secs(60)));
        table.insert(record("gone", Duration::from_millis(1)));

        let later = Instant::now() + Duration::from_millis(10);
        let drained = table.drain_expired(later);

        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].key, "gone");
        assert!(table.get("live").is_some());
        assert!(table.get("gone").is_none());
    }
}
