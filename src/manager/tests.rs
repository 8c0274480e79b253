//! Tests for the lock manager.
//!
//! Tests are `#[serial]`: node ids resolve through the process environment,
//! which the config tests modify.

use super::*;
use crate::store::MemoryStore;
use serial_test::serial;
use std::thread;
use tempfile::TempDir;

fn config(node: &str) -> LockConfig {
    LockConfig {
        node_id: Some(node.to_string()),
        default_timeout_secs: 60,
        reaper_interval_secs: 1,
        ..LockConfig::default()
    }
}

fn manager(node: &str) -> LockManager {
    LockManager::new(config(node), Arc::new(MemoryStore::new())).unwrap()
}

/// Two managers ("nodes") arbitrated by one shared store.
fn cluster() -> (LockManager, LockManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let a = LockManager::new(config("node-a"), store.clone()).unwrap();
    let b = LockManager::new(config("node-b"), store.clone()).unwrap();
    (a, b, store)
}

fn hold_count(manager: &LockManager, key: &str) -> Option<u32> {
    manager
        .get_locks()
        .into_iter()
        .find(|info| info.key == key)
        .map(|info| info.hold_count)
}

// ============================================================================
// Reentrancy and exclusivity
// ============================================================================

#[test]
#[serial]
fn test_reentrant_lock_needs_matching_unlocks() {
    let manager = manager("node-a");

    manager.lock("123").unwrap();
    manager.lock("123").unwrap();
    assert_eq!(hold_count(&manager, "123"), Some(2));

    manager.unlock("123").unwrap();
    assert_eq!(hold_count(&manager, "123"), Some(1));
    assert!(manager.is_locked("123").unwrap());
    assert!(manager.holds_lock("123"));

    manager.unlock("123").unwrap();
    assert_eq!(hold_count(&manager, "123"), None);
    assert!(!manager.is_locked("123").unwrap());
    assert!(!manager.holds_lock("123"));
    assert!(manager.store_locks().unwrap().is_empty());
}

#[test]
#[serial]
fn test_reentrant_lock_shares_claim_and_lease() {
    let manager = manager("node-a");

    let first = manager.lock_with_timeout("k", Duration::from_secs(30)).unwrap();
    let second = manager.lock_with_timeout("k", Duration::from_secs(90)).unwrap();

    assert_eq!(first.lease(), second.lease());
    assert_eq!(second.timeout(), Duration::from_secs(30));
    assert!(second.remaining() <= Duration::from_secs(30));
    assert_eq!(manager.store_locks().unwrap().len(), 1);
}

#[test]
#[serial]
fn test_other_thread_cannot_lock_held_key() {
    let manager = Arc::new(manager("node-a"));
    manager.lock("k").unwrap();

    let contender = Arc::clone(&manager);
    let err = thread::spawn(move || contender.lock("k").unwrap_err())
        .join()
        .unwrap();

    assert!(err.is_contention());
    assert!(err.to_string().contains("node-a"));
    assert!(manager.holds_lock("k"));
    assert_eq!(hold_count(&manager, "k"), Some(1));
}

#[test]
#[serial]
fn test_unlock_by_non_owner_fails_and_keeps_lock() {
    let manager = Arc::new(manager("node-a"));
    manager.lock("k").unwrap();

    let intruder = Arc::clone(&manager);
    let err = thread::spawn(move || intruder.unlock("k").unwrap_err())
        .join()
        .unwrap();

    assert!(matches!(err, LockError::NotOwner(_)));
    assert!(manager.holds_lock("k"));
    assert!(manager.is_locked("k").unwrap());
}

#[test]
#[serial]
fn test_unlock_without_lock_fails() {
    let manager = manager("node-a");
    let err = manager.unlock("never-locked").unwrap_err();
    assert!(matches!(err, LockError::NotOwner(_)));
}

#[test]
#[serial]
fn test_holds_lock_is_per_thread() {
    let manager = Arc::new(manager("node-a"));
    manager.lock("k").unwrap();

    let other = Arc::clone(&manager);
    let holds = thread::spawn(move || other.holds_lock("k")).join().unwrap();

    assert!(!holds);
    assert!(manager.holds_lock("k"));
}

#[test]
#[serial]
fn test_invalid_key_and_timeout_are_rejected() {
    let manager = manager("node-a");

    assert!(matches!(
        manager.lock("").unwrap_err(),
        LockError::InvalidKey(_)
    ));
    assert!(matches!(
        manager.lock_with_timeout("k", Duration::ZERO).unwrap_err(),
        LockError::InvalidTimeout
    ));
    assert!(manager.get_locks().is_empty());
}

// ============================================================================
// Leases
// ============================================================================

#[test]
#[serial]
fn test_lock_expires_after_timeout() {
    let manager = Arc::new(manager("node-a"));
    manager
        .lock_with_timeout("k", Duration::from_millis(200))
        .unwrap();

    thread::sleep(Duration::from_millis(400));
    assert!(!manager.is_locked("k").unwrap());
    assert!(!manager.holds_lock("k"));
    assert!(manager.get_locks().is_empty());

    let other = Arc::clone(&manager);
    thread::spawn(move || {
        other.lock("k").unwrap();
        assert!(other.holds_lock("k"));
    })
    .join()
    .unwrap();
}

#[test]
#[serial]
fn test_refresh_extends_lease() {
    let manager = manager("node-a");
    let handle = manager
        .lock_with_timeout("k", Duration::from_millis(1000))
        .unwrap();

    thread::sleep(Duration::from_millis(600));
    handle.refresh().unwrap();
    thread::sleep(Duration::from_millis(600));

    assert!(manager.is_locked("k").unwrap());
    assert!(manager.holds_lock("k"));
    assert!(handle.is_valid());
    manager.unlock("k").unwrap();
}

#[test]
#[serial]
fn test_unlock_after_expiry_fails_with_expired() {
    let manager = manager("node-a");
    manager
        .lock_with_timeout("k", Duration::from_millis(100))
        .unwrap();

    thread::sleep(Duration::from_millis(250));
    let err = manager.unlock("k").unwrap_err();
    assert!(matches!(err, LockError::Expired(_)));
    assert!(manager.store_locks().unwrap().is_empty());
}

#[test]
#[serial]
fn test_stale_handle_cannot_refresh_new_claim() {
    let manager = Arc::new(manager("node-a"));
    let stale = manager
        .lock_with_timeout("k", Duration::from_millis(100))
        .unwrap();
    thread::sleep(Duration::from_millis(250));

    let other = Arc::clone(&manager);
    let (fresh_lease, done) = std::sync::mpsc::channel();
    let (finish, finished) = std::sync::mpsc::channel::<()>();
    let holder = thread::spawn(move || {
        let handle = other.lock("k").unwrap();
        fresh_lease.send(handle.lease()).unwrap();
        finished.recv().unwrap();
        other.unlock("k").unwrap();
    });

    let fresh = done.recv().unwrap();
    assert_ne!(fresh, stale.lease());

    let err = stale.refresh().unwrap_err();
    assert!(matches!(err, LockError::Expired(_)));
    assert_eq!(stale.seconds_remaining(), 0);
    assert!(manager.is_locked("k").unwrap());

    finish.send(()).unwrap();
    holder.join().unwrap();
}

#[test]
#[serial]
fn test_refresh_by_other_thread_fails() {
    let manager = manager("node-a");
    let handle = manager.lock("k").unwrap();

    let err = thread::spawn(move || handle.refresh().unwrap_err())
        .join()
        .unwrap();
    assert!(matches!(err, LockError::NotOwner(_)));
    assert!(manager.holds_lock("k"));
}

#[test]
#[serial]
fn test_handle_is_invalid_after_full_unlock() {
    let manager = manager("node-a");
    let handle = manager.lock("k").unwrap();
    assert!(handle.seconds_remaining() > 0);

    manager.unlock("k").unwrap();

    assert!(!handle.is_valid());
    assert_eq!(handle.seconds_remaining(), 0);
    assert!(matches!(
        handle.refresh().unwrap_err(),
        LockError::Expired(_)
    ));
}

#[test]
#[serial]
fn test_refresh_fails_when_row_was_stolen() {
    let (a, _b, store) = cluster();
    let handle = a.lock("k").unwrap();

    // Operator force-removes the row behind our back.
    store.remove("k").unwrap();

    let err = handle.refresh().unwrap_err();
    assert!(matches!(err, LockError::Expired(_)));
    assert!(!a.holds_lock("k"));
}

// ============================================================================
// Reclamation
// ============================================================================

#[test]
#[serial]
fn test_dead_holder_is_reported_then_reclaimed() {
    let manager = Arc::new(manager("node-a"));

    let holder = Arc::clone(&manager);
    thread::spawn(move || {
        holder
            .lock_with_timeout("k", Duration::from_millis(300))
            .unwrap();
    })
    .join()
    .unwrap();

    let locks = manager.get_locks();
    assert_eq!(locks.len(), 1);
    assert!(locks[0].reclaimable);

    let report = manager.sweep();
    assert_eq!(report.dead_owner_records, vec!["k".to_string()]);
    assert!(report.expired_records.is_empty());

    thread::sleep(Duration::from_millis(450));
    let report = manager.sweep();
    assert_eq!(report.expired_records, vec!["k".to_string()]);
    assert!(manager.get_locks().is_empty());
    assert!(manager.store_locks().unwrap().is_empty());

    manager.lock("k").unwrap();
    assert!(manager.holds_lock("k"));
}

#[test]
#[serial]
fn test_background_reaper_reclaims_dead_holder() {
    let manager = Arc::new(manager("node-a"));
    manager.init().unwrap();
    manager.init().unwrap();

    let holder = Arc::clone(&manager);
    thread::spawn(move || {
        holder
            .lock_with_timeout("k", Duration::from_millis(200))
            .unwrap();
    })
    .join()
    .unwrap();

    // One reaper interval plus margin.
    thread::sleep(Duration::from_millis(2500));
    assert!(manager.get_locks().is_empty());
    assert!(manager.store_locks().unwrap().is_empty());
    manager.lock("k").unwrap();
}

#[test]
#[serial]
fn test_sweep_reaps_expired_rows_of_other_nodes() {
    let (a, b, _store) = cluster();

    let holder = thread::spawn(move || {
        b.lock_with_timeout("b-key", Duration::from_millis(100))
            .unwrap();
        // Simulate a crashed node: never unlocks, never destroys.
        std::mem::forget(b);
    });
    holder.join().unwrap();

    thread::sleep(Duration::from_millis(250));
    let report = a.sweep();
    assert_eq!(report.reaped_rows.len(), 1);
    assert_eq!(report.reaped_rows[0].owner.as_str(), "node-b");
    assert!(a.store_locks().unwrap().is_empty());
}

// ============================================================================
// Cluster behaviour
// ============================================================================

#[test]
#[serial]
fn test_key_held_by_other_node_is_contended() {
    let (a, b, _store) = cluster();
    a.lock("shared").unwrap();

    let err = b.lock("shared").unwrap_err();
    assert!(err.is_contention());
    assert!(err.to_string().contains("node-a"));
    assert!(b.is_locked("shared").unwrap());
    assert!(!b.holds_lock("shared"));

    a.unlock("shared").unwrap();
    b.lock("shared").unwrap();
    assert!(a.is_locked("shared").unwrap());
}

#[test]
#[serial]
fn test_destroy_releases_only_own_rows() {
    let (a, b, _store) = cluster();
    a.lock("a-1").unwrap();
    a.lock("a-2").unwrap();
    b.lock("b-1").unwrap();

    a.destroy();

    assert!(a.get_locks().is_empty());
    let rows = b.store_locks().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, "b-1");
    assert_eq!(rows[0].owner.as_str(), "node-b");
    assert!(b.holds_lock("b-1"));

    // Destroyed managers refuse new work; destroy is idempotent.
    assert!(matches!(a.lock("a-3").unwrap_err(), LockError::Shutdown));
    assert!(matches!(a.unlock("a-1").unwrap_err(), LockError::Shutdown));
    a.destroy();

    b.lock("a-1").unwrap();
}

#[test]
#[serial]
fn test_drop_releases_rows() {
    let store = Arc::new(MemoryStore::new());
    {
        let manager = LockManager::new(config("node-a"), store.clone()).unwrap();
        manager.lock("k").unwrap();
    }
    assert!(store.list().unwrap().is_empty());
}

#[test]
#[serial]
fn test_directory_store_cluster() {
    let temp_dir = TempDir::new().unwrap();
    let with_dir = |node: &str| LockConfig {
        store_dir: Some(temp_dir.path().to_path_buf()),
        ..config(node)
    };

    let a = LockManager::with_directory_store(with_dir("node-a")).unwrap();
    let b = LockManager::with_directory_store(with_dir("node-b")).unwrap();

    a.lock("/content/documents/news").unwrap();
    b.lock("/content/documents/events").unwrap();
    assert!(b.lock("/content/documents/news").unwrap_err().is_contention());

    a.destroy();
    let rows = b.store_locks().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, "/content/documents/events");

    b.lock("/content/documents/news").unwrap();
}

#[test]
#[serial]
fn test_directory_store_requires_store_dir() {
    let err = LockManager::with_directory_store(config("node-a")).unwrap_err();
    assert!(matches!(err, LockError::Config(_)));
}

// ============================================================================
// Guards
// ============================================================================

#[test]
#[serial]
fn test_guard_unlocks_one_level_on_drop() {
    let manager = manager("node-a");
    manager.lock("k").unwrap();

    {
        let guard = manager.guard("k").unwrap();
        assert_eq!(guard.key(), "k");
        assert_eq!(hold_count(&manager, "k"), Some(2));
    }

    assert_eq!(hold_count(&manager, "k"), Some(1));
    manager.unlock("k").unwrap();
    assert!(!manager.is_locked("k").unwrap());
}

#[test]
#[serial]
fn test_guard_release_surfaces_errors() {
    let manager = manager("node-a");

    let guard = manager.guard("k").unwrap();
    guard.release().unwrap();
    assert!(!manager.is_locked("k").unwrap());

    let guard = manager
        .guard_with_timeout("k", Duration::from_millis(100))
        .unwrap();
    thread::sleep(Duration::from_millis(250));
    assert!(matches!(guard.release().unwrap_err(), LockError::Expired(_)));
}

#[test]
#[serial]
fn test_get_locks_snapshot_is_sorted() {
    let manager = manager("node-a");
    manager.lock("b").unwrap();
    manager.lock("a").unwrap();
    manager.lock("c").unwrap();

    let keys: Vec<String> = manager.get_locks().into_iter().map(|i| i.key).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
    assert!(manager.get_locks().iter().all(|i| !i.reclaimable));
}
