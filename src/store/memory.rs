//! In-memory lock store.

use super::{ClaimOutcome, LockRow, LockStore, lease_expiry, validate_key};
use crate::error::{LockError, Result};
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Lock store backed by a map behind one mutex.
///
/// Share a single instance between managers (`Arc<MemoryStore>`) to give
/// them a common arbiter, e.g. several "nodes" in one test process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<String, LockRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<String, LockRow>> {
        // A panic elsewhere never leaves a half-updated map: every mutation
        // below is a single insert/remove.
        self.rows.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl LockStore for MemoryStore {
    fn try_claim(
        &self,
        key: &str,
        owner: &NodeId,
        lease: u64,
        timeout: Duration,
    ) -> Result<ClaimOutcome> {
        validate_key(key)?;
        let row = LockRow::new(key, owner, lease, timeout)?;
        let mut rows = self.rows();

        if let Some(existing) = rows.get(key) {
            if !existing.is_expired() {
                return Ok(ClaimOutcome::Held(Some(existing.clone())));
            }
            tracing::warn!(
                key,
                owner = %existing.owner,
                lease = existing.lease,
                "reclaimed expired lock row"
            );
        }

        rows.insert(key.to_string(), row.clone());
        tracing::debug!(key, owner = %owner, lease, "claimed lock row");
        Ok(ClaimOutcome::Claimed(row))
    }

    fn release(&self, key: &str, owner: &NodeId, lease: u64) -> Result<bool> {
        validate_key(key)?;
        let mut rows = self.rows();

        match rows.get(key) {
            Some(row) if row.is_owned_by(owner, lease) => {
                rows.remove(key);
                tracing::debug!(key, owner = %owner, lease, "released lock row");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn refresh(
        &self,
        key: &str,
        owner: &NodeId,
        lease: u64,
        timeout: Duration,
    ) -> Result<LockRow> {
        validate_key(key)?;
        let expires_at = lease_expiry(Utc::now(), timeout)?;
        let mut rows = self.rows();

        match rows.get_mut(key) {
            Some(row) if row.is_owned_by(owner, lease) && !row.is_expired() => {
                row.expires_at = expires_at;
                Ok(row.clone())
            }
            _ => Err(LockError::Expired(key.to_string())),
        }
    }

    fn get(&self, key: &str) -> Result<Option<LockRow>> {
        validate_key(key)?;
        Ok(self.rows().get(key).cloned())
    }

    fn list(&self) -> Result<Vec<LockRow>> {
        Ok(self.rows().values().cloned().collect())
    }

    fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<LockRow>> {
        let mut rows = self.rows();
        let expired: Vec<String> = rows
            .values()
            .filter(|row| row.is_expired_at(now))
            .map(|row| row.key.clone())
            .collect();

        Ok(expired
            .iter()
            .filter_map(|key| rows.remove(key))
            .collect())
    }

    fn remove(&self, key: &str) -> Result<Option<LockRow>> {
        validate_key(key)?;
        Ok(self.rows().remove(key))
    }
}
