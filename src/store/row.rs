//! Persisted lock rows and lease arithmetic.

use crate::error::{LockError, Result};
use crate::node::NodeId;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One row of the shared lock store: proof that `owner` holds `key`.
///
/// A row whose `expires_at` has passed is logically unlocked even while it
/// is still physically present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRow {
    /// The protected resource.
    pub key: String,

    /// Node that claimed the key.
    pub owner: NodeId,

    /// Claim id, unique per owner; distinguishes successive claims of one key.
    pub lease: u64,

    /// When the claim was made (RFC3339).
    pub created_at: DateTime<Utc>,

    /// When the claim lapses unless refreshed (RFC3339).
    pub expires_at: DateTime<Utc>,
}

impl LockRow {
    /// Create a row claimed now, lapsing after `timeout`.
    pub fn new(key: &str, owner: &NodeId, lease: u64, timeout: Duration) -> Result<Self> {
        let created_at = Utc::now();
        Ok(Self {
            key: key.to_string(),
            owner: owner.clone(),
            lease,
            created_at,
            expires_at: lease_expiry(created_at, timeout)?,
        })
    }

    /// Parse a row from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| LockError::Store(format!("failed to parse lock row: {}", e)))
    }

    /// Serialize the row to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LockError::Store(format!("failed to serialize lock row: {}", e)))
    }

    pub fn is_owned_by(&self, owner: &NodeId, lease: u64) -> bool {
        self.owner == *owner && self.lease == lease
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left on the lease; zero once expired.
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Calculate the age of the claim.
    pub fn age(&self) -> TimeDelta {
        Utc::now().signed_duration_since(self.created_at)
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        let age = self.age();
        let seconds = age.num_seconds();
        let minutes = age.num_minutes();
        let hours = age.num_hours();
        let days = age.num_days();

        if days > 0 {
            format!("{}d {}h", days, hours % 24)
        } else if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds % 60)
        } else {
            format!("{}s", seconds.max(0))
        }
    }
}

impl std::fmt::Display for LockRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (owner: {}, lease: {}, age: {}{})",
            self.key,
            self.owner,
            self.lease,
            self.age_string(),
            if self.is_expired() {
                ", EXPIRED".to_string()
            } else {
                format!(", expires in {}s", self.remaining().as_secs())
            }
        )
    }
}

/// `now + timeout`, rejecting zero and unrepresentable timeouts.
pub fn lease_expiry(now: DateTime<Utc>, timeout: Duration) -> Result<DateTime<Utc>> {
    if timeout.is_zero() {
        return Err(LockError::InvalidTimeout);
    }
    TimeDelta::from_std(timeout)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or(LockError::InvalidTimeout)
}
