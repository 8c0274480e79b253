//! Filesystem primitives for the directory lock store.
//!
//! Rows are never written in place: content goes to a private temp file
//! first, then is either published exclusively (claims) or swapped in with
//! an atomic rename (refreshes).

pub mod atomic;

pub use atomic::{atomic_write, publish_exclusive, write_private};
