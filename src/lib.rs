//! clusterlock: cluster-aware, reentrant, lease-based key locks.
//!
//! A [`LockManager`] gives threads of one process exclusive, reentrant
//! locks on string keys and coordinates with other processes through a
//! shared [`LockStore`]. Every lock carries a lease; expired locks are
//! reclaimed lazily on the next `lock` call and by a background reaper.
//!
//! ```no_run
//! use clusterlock::{LockConfig, LockManager, MemoryStore};
//! use std::sync::Arc;
//!
//! let manager = LockManager::new(LockConfig::default(), Arc::new(MemoryStore::new()))?;
//! manager.init()?;
//!
//! let handle = manager.lock("/content/documents/news")?;
//! // ... protected work, calling handle.refresh() for long jobs ...
//! manager.unlock(handle.key())?;
//!
//! manager.destroy();
//! # Ok::<(), clusterlock::LockError>(())
//! ```

pub mod config;
pub mod error;
pub mod exit_codes;
pub mod fs;
pub mod logging;
pub mod manager;
pub mod node;
pub mod store;

pub use config::LockConfig;
pub use error::{LockError, Result};
pub use manager::{LockGuard, LockHandle, LockInfo, LockManager, SweepReport};
pub use node::NodeId;
pub use store::{ClaimOutcome, DirectoryStore, LockRow, LockStore, MemoryStore};
