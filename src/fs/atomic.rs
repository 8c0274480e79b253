//! Atomic filesystem operations for the directory lock store.
//!
//! # Implementation Strategy
//!
//! Every write follows the same pattern:
//! 1. Write content to a uniquely named temporary file in the same directory
//! 2. Sync the file to disk (fsync)
//! 3. Either hard-link it to the target (exclusive, fails if the target
//!    exists) or rename it over the target (replace)
//!
//! Hard links give the store an atomic "insert if absent" that never exposes
//! a half-written row to readers, unlike `create_new` followed by a write.
//!
//! # Important Notes
//!
//! - Source and target must be on the same filesystem for link/rename
//! - On crash, a temporary file may remain (named `.{filename}.{pid}.{n}.tmp`)

use crate::error::{LockError, Result};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Atomically replace `path` with `content`.
///
/// Readers see either the old bytes or the new bytes, and `path` exists
/// throughout if it existed before.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let temp_path = write_private(path, content)?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        LockError::io(
            format!("failed to atomically replace '{}'", path.display()),
            e,
        )
    })?;

    sync_parent(path);
    Ok(())
}

/// Publish `temp_path` at `target` only if `target` does not exist yet.
///
/// Returns `Ok(true)` when published, `Ok(false)` when `target` already
/// existed. The temp file is removed in both cases.
pub fn publish_exclusive(temp_path: &Path, target: &Path) -> Result<bool> {
    let result = fs::hard_link(temp_path, target);
    let _ = fs::remove_file(temp_path);

    match result {
        Ok(()) => {
            sync_parent(target);
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(LockError::io(
            format!("failed to publish '{}'", target.display()),
            e,
        )),
    }
}

/// Write `content` to a fresh temp file next to `target` and sync it.
///
/// Returns the temp path; the caller is responsible for publishing or
/// removing it.
pub fn write_private(target: &Path, content: &[u8]) -> Result<PathBuf> {
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            LockError::io(
                format!("failed to create directory '{}'", parent.display()),
                e,
            )
        })?;
    }

    let temp_path = generate_temp_path(target, "tmp")?;
    write_and_sync(&temp_path, content)?;
    Ok(temp_path)
}

/// Generate a hidden sibling path of `target` ending in `.{suffix}`.
///
/// The name embeds the pid and a process-wide counter so concurrent writers
/// never share a temp file.
pub(crate) fn generate_temp_path(target: &Path, suffix: &str) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| LockError::Store(format!("invalid file path '{}'", target.display())))?;

    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_name = format!(".{}.{}.{}.{}", filename, std::process::id(), n, suffix);
    Ok(parent.join(temp_name))
}

/// Write content to a new file and sync to disk.
fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create_new(path).map_err(|e| {
        LockError::io(
            format!("failed to create temporary file '{}'", path.display()),
            e,
        )
    })?;

    file.write_all(content).map_err(|e| {
        let _ = fs::remove_file(path);
        LockError::io("failed to write temporary file", e)
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(path);
        LockError::io("failed to sync temporary file to disk", e)
    })?;

    Ok(())
}

/// Best-effort sync of the directory entry.
fn sync_parent(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
    #[cfg(not(unix))]
    let _ = path;
}
