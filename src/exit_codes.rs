//! Exit code constants for the clusterlock operator tool.
//!
//! - 0: Success
//! - 1: User error (bad args, bad config, invalid key)
//! - 2: Lock store failure (I/O, corrupt rows)
//! - 4: Lock contention or ownership failure

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid configuration or key.
pub const USER_ERROR: i32 = 1;

/// Lock store failure: unreadable directory, corrupt row, I/O error.
pub const STORE_FAILURE: i32 = 2;

/// Lock failure: key held elsewhere, not owner, or lease lost.
pub const LOCK_FAILURE: i32 = 4;
