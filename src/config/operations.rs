//! Config loading, validation, and utility operations.

use super::model::LockConfig;
use super::types::NODE_ID_ENV;
use crate::error::{LockError, Result};
use crate::node::NodeId;
use std::path::Path;
use std::time::Duration;

impl LockConfig {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(LockConfig)` - Successfully loaded and validated config
    /// * `Err(LockError::Config)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LockError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LockConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LockError::Config(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LockError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `default_timeout_secs` must be positive
    /// - `reaper_interval_secs` must be positive
    /// - `node_id`, when set, must be non-blank
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_secs == 0 {
            return Err(LockError::Config(
                "config validation failed: default_timeout_secs must be greater than 0"
                    .to_string(),
            ));
        }

        if self.reaper_interval_secs == 0 {
            return Err(LockError::Config(
                "config validation failed: reaper_interval_secs must be greater than 0"
                    .to_string(),
            ));
        }

        if let Some(node) = &self.node_id
            && node.trim().is_empty()
        {
            return Err(LockError::Config(
                "config validation failed: node_id must not be blank".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the node identity: environment override, then config, then
    /// the `user@host:pid` default.
    pub fn node_id(&self) -> NodeId {
        if let Ok(from_env) = std::env::var(NODE_ID_ENV)
            && !from_env.trim().is_empty()
        {
            return NodeId::new(from_env.trim());
        }

        match &self.node_id {
            Some(node) => NodeId::new(node.trim()),
            None => NodeId::local(),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn corrupt_row_grace(&self) -> Duration {
        Duration::from_secs(self.corrupt_row_grace_secs)
    }
}
