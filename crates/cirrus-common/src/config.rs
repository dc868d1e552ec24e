//! Stack configuration model.
//!
//! A [`StackConfig`] carries every literal scalar a stack needs (region,
//! instance sizes, domain names) and is passed explicitly into graph
//! construction and the engine. Nothing here reads ambient process state.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PARALLELISM, DEFAULT_REGION};
use crate::error::{CirrusError, Result};

/// Configuration for one stack instance (e.g. `web-dev`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct StackConfig {
    /// Project the stack belongs to.
    pub project: String,
    /// Stack instance name; also names the state file.
    pub stack: String,
    /// Cloud region resources are placed in.
    pub region: String,
    /// Maximum number of resources provisioned concurrently.
    pub parallelism: usize,
    /// Free-form configuration values consumed by resource inputs.
    pub values: BTreeMap<String, serde_json::Value>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            project: crate::constants::APP_NAME.to_string(),
            stack: "dev".to_string(),
            region: DEFAULT_REGION.to_string(),
            parallelism: DEFAULT_PARALLELISM,
            values: BTreeMap::new(),
        }
    }
}

impl StackConfig {
    /// Creates a configuration for the given project and stack names.
    #[must_use]
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
            ..Self::default()
        }
    }

    /// Sets the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Sets a configuration value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let _ = self.values.insert(key.into(), value.into());
        self
    }

    /// Loads a configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML,
    /// or declares a parallelism of zero.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading stack configuration");
        let content = std::fs::read_to_string(path).map_err(|e| CirrusError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses a configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        if config.parallelism == 0 {
            return Err(CirrusError::Config {
                message: "parallelism must be at least 1".into(),
            });
        }
        Ok(config)
    }

    /// Returns a configuration value, if set.
    ///
    /// `region`, `project` and `stack` are also reachable by key.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        if let Some(value) = self.values.get(key) {
            return Some(value.clone());
        }
        match key {
            "region" => Some(self.region.clone().into()),
            "project" => Some(self.project.clone().into()),
            "stack" => Some(self.stack.clone().into()),
            _ => None,
        }
    }

    /// Returns a configuration value or `default` when unset.
    pub fn get_or(&self, key: &str, default: impl Into<serde_json::Value>) -> serde_json::Value {
        self.get(key).unwrap_or_else(|| default.into())
    }

    /// Returns a required configuration value.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::MissingConfig`] if the key has no value.
    pub fn require(&self, key: &str) -> Result<serde_json::Value> {
        self.get(key).ok_or_else(|| CirrusError::MissingConfig {
            key: key.to_string(),
        })
    }

    /// Returns a required string configuration value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing or not a string.
    pub fn require_str(&self, key: &str) -> Result<String> {
        match self.require(key)? {
            serde_json::Value::String(s) => Ok(s),
            other => Err(CirrusError::Config {
                message: format!("configuration value `{key}` must be a string, got {other}"),
            }),
        }
    }
}
