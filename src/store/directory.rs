//! Directory-backed lock store.
//!
//! # Lock Files
//!
//! Each row lives in `<dir>/<encoded key>.lock` as pretty JSON:
//! - `key`: the caller's key, unencoded
//! - `owner`: node id of the claimant
//! - `lease`: claim id, unique per owner
//! - `created_at` / `expires_at`: RFC3339 timestamps
//!
//! Claims publish a fully written temp file with a hard link, so a row is
//! either absent or complete. Conditional removals first rename the row to a
//! private tombstone, inspect it there, and link it back if it was not the
//! row they meant to remove. Only rows that already match on a first read
//! are detached, so a live row is never taken out of its slot by anyone but
//! its owner. Refreshes replace the owner's live row with an atomic rename.

use super::{ClaimOutcome, LockRow, LockStore, encode_key, lease_expiry, validate_key};
use crate::error::{LockError, Result};
use crate::fs::atomic::generate_temp_path;
use crate::fs::{atomic_write, publish_exclusive, write_private};
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const LOCK_EXTENSION: &str = "lock";

/// What a lock file currently holds.
#[derive(Debug)]
enum RowFile {
    Missing,
    Row(LockRow),
    /// Present but unparsable; `modified` dates the write.
    Corrupt { modified: SystemTime },
}

/// Lock store keeping one file per row in a shared directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
    corrupt_row_grace: Duration,
}

impl DirectoryStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            LockError::io(
                format!("failed to create locks directory '{}'", dir.display()),
                e,
            )
        })?;

        Ok(Self {
            dir,
            corrupt_row_grace: Duration::from_secs(60),
        })
    }

    /// Age after which an unparsable row is treated as abandoned.
    pub fn with_corrupt_row_grace(mut self, grace: Duration) -> Self {
        self.corrupt_row_grace = grace;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the lock file for `key`.
    pub fn row_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_key(key), LOCK_EXTENSION))
    }

    fn read_row(&self, path: &Path) -> Result<RowFile> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RowFile::Missing),
            Err(e) => {
                return Err(LockError::io(
                    format!("failed to read lock file '{}'", path.display()),
                    e,
                ));
            }
        };

        match LockRow::from_json(&content) {
            Ok(row) => Ok(RowFile::Row(row)),
            Err(_) => {
                let modified = fs::metadata(path)
                    .and_then(|m| m.modified())
                    .unwrap_or_else(|_| SystemTime::now());
                Ok(RowFile::Corrupt { modified })
            }
        }
    }

    fn corrupt_row_abandoned(&self, modified: SystemTime) -> bool {
        modified
            .elapsed()
            .map(|age| age >= self.corrupt_row_grace)
            .unwrap_or(false)
    }

    /// Remove the file at `path` iff `should_remove` accepts its content.
    ///
    /// Returns what was removed, or `None` if the file was missing or kept.
    /// The slot is only emptied for content that already matched on a read.
    fn remove_if<F>(&self, path: &Path, should_remove: F) -> Result<Option<RowFile>>
    where
        F: Fn(&RowFile) -> bool,
    {
        if !should_remove(&self.read_row(path)?) {
            return Ok(None);
        }

        let tombstone = generate_temp_path(path, "tomb")?;

        match fs::rename(path, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LockError::io(
                    format!("failed to detach lock file '{}'", path.display()),
                    e,
                ));
            }
        }

        let state = self.read_row(&tombstone)?;
        if should_remove(&state) {
            fs::remove_file(&tombstone).map_err(|e| {
                LockError::io(
                    format!("failed to remove lock tombstone '{}'", tombstone.display()),
                    e,
                )
            })?;
            return Ok(Some(state));
        }

        // Replaced between the read and the detach: put it back unless a new
        // claim already took the slot.
        match fs::hard_link(&tombstone, path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::warn!(
                    path = %path.display(),
                    "lock row was replaced while being inspected; the displaced claim is lost"
                );
            }
            Err(e) => {
                return Err(LockError::io(
                    format!("failed to restore lock file '{}'", path.display()),
                    e,
                ));
            }
        }
        let _ = fs::remove_file(&tombstone);
        Ok(None)
    }

    /// Lock files currently in the directory.
    fn lock_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LockError::io(
                    format!("failed to read locks directory '{}'", self.dir.display()),
                    e,
                ));
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| LockError::io("failed to read locks directory entry", e))?;
            let path = entry.path();

            if is_hidden(&path) {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(LOCK_EXTENSION) {
                continue;
            }
            paths.push(path);
        }
        Ok(paths)
    }

    /// Remove temp files and tombstones left behind by crashed writers.
    fn sweep_leftovers(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !is_hidden(&path) {
                continue;
            }
            let leftover = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("tmp") | Some("tomb")
            );
            let abandoned = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| self.corrupt_row_abandoned(modified))
                .unwrap_or(false);

            if leftover && abandoned && fs::remove_file(&path).is_ok() {
                tracing::debug!(path = %path.display(), "removed leftover lock temp file");
            }
        }
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

impl LockStore for DirectoryStore {
    fn try_claim(
        &self,
        key: &str,
        owner: &NodeId,
        lease: u64,
        timeout: Duration,
    ) -> Result<ClaimOutcome> {
        validate_key(key)?;
        let path = self.row_path(key);

        let mut reclaimed = false;
        loop {
            let row = LockRow::new(key, owner, lease, timeout)?;
            let temp = write_private(&path, row.to_json()?.as_bytes())?;

            if publish_exclusive(&temp, &path)? {
                tracing::debug!(key, owner = %owner, lease, "claimed lock row");
                return Ok(ClaimOutcome::Claimed(row));
            }

            match self.read_row(&path)? {
                // Released between our link attempt and the read.
                RowFile::Missing => continue,
                RowFile::Row(existing) if !reclaimed && existing.is_expired() => {
                    reclaimed = true;
                    let stale_lease = existing.lease;
                    let stale_owner = existing.owner.clone();
                    let removed = self.remove_if(&path, |state| {
                        matches!(state, RowFile::Row(r)
                            if r.is_owned_by(&stale_owner, stale_lease) && r.is_expired())
                    })?;
                    if removed.is_some() {
                        tracing::warn!(
                            key,
                            owner = %existing.owner,
                            lease = existing.lease,
                            "reclaimed expired lock row"
                        );
                    }
                }
                RowFile::Row(existing) => return Ok(ClaimOutcome::Held(Some(existing))),
                RowFile::Corrupt { modified }
                    if !reclaimed && self.corrupt_row_abandoned(modified) =>
                {
                    reclaimed = true;
                    let removed = self
                        .remove_if(&path, |state| matches!(state, RowFile::Corrupt { .. }))?;
                    if removed.is_some() {
                        tracing::warn!(key, "reclaimed unreadable lock row");
                    }
                }
                RowFile::Corrupt { .. } => return Ok(ClaimOutcome::Held(None)),
            }
        }
    }

    fn release(&self, key: &str, owner: &NodeId, lease: u64) -> Result<bool> {
        validate_key(key)?;
        let path = self.row_path(key);

        let removed = self.remove_if(&path, |state| {
            matches!(state, RowFile::Row(r) if r.is_owned_by(owner, lease))
        })?;

        if removed.is_some() {
            tracing::debug!(key, owner = %owner, lease, "released lock row");
        }
        Ok(removed.is_some())
    }

    fn refresh(
        &self,
        key: &str,
        owner: &NodeId,
        lease: u64,
        timeout: Duration,
    ) -> Result<LockRow> {
        validate_key(key)?;
        let path = self.row_path(key);

        let mut row = match self.read_row(&path)? {
            RowFile::Row(row) if row.is_owned_by(owner, lease) && !row.is_expired() => row,
            _ => return Err(LockError::Expired(key.to_string())),
        };
        row.expires_at = lease_expiry(Utc::now(), timeout)?;

        // A live row is only ever replaced by its owner; the slot never empties.
        atomic_write(&path, row.to_json()?.as_bytes())?;
        tracing::debug!(key, owner = %owner, lease, "refreshed lock row");
        Ok(row)
    }

    fn get(&self, key: &str) -> Result<Option<LockRow>> {
        validate_key(key)?;
        let path = self.row_path(key);

        match self.read_row(&path)? {
            RowFile::Missing => Ok(None),
            RowFile::Row(row) => Ok(Some(row)),
            RowFile::Corrupt { .. } => Err(LockError::Store(format!(
                "lock file '{}' is unreadable",
                path.display()
            ))),
        }
    }

    fn list(&self) -> Result<Vec<LockRow>> {
        let mut rows = Vec::new();

        for path in self.lock_files()? {
            match self.read_row(&path)? {
                RowFile::Row(row) => rows.push(row),
                RowFile::Missing => {}
                RowFile::Corrupt { .. } => {
                    tracing::warn!(path = %path.display(), "skipping unreadable lock file");
                }
            }
        }

        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }

    fn reap_expired(&self, now: DateTime<Utc>) -> Result<Vec<LockRow>> {
        let mut reaped = Vec::new();

        for path in self.lock_files()? {
            match self.read_row(&path)? {
                RowFile::Row(row) if row.is_expired_at(now) => {
                    let removed = self.remove_if(&path, |state| {
                        matches!(state, RowFile::Row(r)
                            if r.is_owned_by(&row.owner, row.lease) && r.is_expired_at(now))
                    })?;
                    if removed.is_some() {
                        reaped.push(row);
                    }
                }
                RowFile::Corrupt { modified } if self.corrupt_row_abandoned(modified) => {
                    let removed =
                        self.remove_if(&path, |state| matches!(state, RowFile::Corrupt { .. }))?;
                    if removed.is_some() {
                        tracing::warn!(path = %path.display(), "removed unreadable lock file");
                    }
                }
                _ => {}
            }
        }

        self.sweep_leftovers();
        reaped.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(reaped)
    }

    fn remove(&self, key: &str) -> Result<Option<LockRow>> {
        validate_key(key)?;
        let path = self.row_path(key);

        match self.remove_if(&path, |_| true)? {
            Some(RowFile::Row(row)) => Ok(Some(row)),
            _ => Ok(None),
        }
    }
}
