//! Error types for clusterlock.
//!
//! Uses thiserror for derive macros. Contention and ownership mistakes are
//! ordinary `Err` values; store failures get their own variants so callers
//! can tell "somebody else holds it" apart from "the store is broken".

use crate::exit_codes;
use thiserror::Error;

/// Main error type for lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another thread or cluster node currently holds the key.
    #[error("'{key}' is already locked by {holder}")]
    AlreadyLocked { key: String, holder: String },

    /// The caller tried to unlock or refresh a lock it does not hold.
    #[error("'{0}' is not locked by the current thread")]
    NotOwner(String),

    /// The lease on the lock ran out or the lock was reclaimed.
    #[error("lock on '{0}' has expired or was reclaimed")]
    Expired(String),

    /// No row exists for the key.
    #[error("no lock exists for '{0}'")]
    NotFound(String),

    /// Lock keys must be non-empty.
    #[error("invalid lock key: {0}")]
    InvalidKey(String),

    /// Every lock carries a lease; a zero timeout is rejected.
    #[error("lock timeout must be greater than zero")]
    InvalidTimeout,

    /// The shared store returned something unusable.
    #[error("lock store failure: {0}")]
    Store(String),

    /// Filesystem access to the shared store failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(String),

    /// The manager has been destroyed.
    #[error("lock manager has been shut down")]
    Shutdown,
}

impl LockError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LockError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for expected contention on a key held by someone else.
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::AlreadyLocked { .. })
    }

    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LockError::AlreadyLocked { .. }
            | LockError::NotOwner(_)
            | LockError::Expired(_) => exit_codes::LOCK_FAILURE,
            LockError::Store(_) | LockError::Io { .. } => exit_codes::STORE_FAILURE,
            LockError::NotFound(_)
            | LockError::InvalidKey(_)
            | LockError::InvalidTimeout
            | LockError::Config(_)
            | LockError::Shutdown => exit_codes::USER_ERROR,
        }
    }
}

/// Result type alias for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;
