//! Configuration model for clusterlock.
//!
//! This module defines the `LockConfig` struct, usually read from a
//! `clusterlock.yaml` supplied by the hosting process. It supports
//! forward-compatible YAML parsing (unknown fields are ignored),
//! sensible defaults for optional fields, and validation of config values.

mod model;
mod operations;
pub mod types;


// Re-export public API
pub use model::LockConfig;
pub use types::NODE_ID_ENV;
