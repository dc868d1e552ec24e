//! Persistent stack state.
//!
//! After every apply the engine's report is folded into a [`StackState`]
//! and written as JSON next to the stack file. Destroy and `outputs` read
//! it back.
//!
//! A record only disappears once its resource was deleted: a resource that
//! resolved in an earlier run keeps its record when a later run fails it or
//! the stack file stops declaring it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cirrus_common::error::{CirrusError, Result};
use cirrus_common::types::{Attributes, ResourceState};
use cirrus_graph::Stack;
use cirrus_graph::resource::Declaration;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::report::ApplyReport;

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

/// Persisted record of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    /// Resource type tag.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Last known state.
    pub state: ResourceState,
    /// Whether destroy must be forced.
    #[serde(default)]
    pub protect: bool,
    /// Outputs reported by the provider.
    #[serde(default)]
    pub outputs: Attributes,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Resources this one read from or waited on when it was provisioned.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// Persisted state of one stack instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackState {
    /// File format version.
    pub version: u32,
    /// Project name.
    pub project: String,
    /// Stack instance name.
    pub stack: String,
    /// Identifier of the run that wrote this state.
    pub run_id: String,
    /// When the state was written.
    pub updated_at: DateTime<Utc>,
    /// Resources by name.
    pub resources: BTreeMap<String, ResourceRecord>,
    /// Stack outputs that resolved.
    pub outputs: BTreeMap<String, Value>,
}

impl StackState {
    /// Folds an apply report into a state snapshot.
    ///
    /// Lookups create nothing and are not recorded.
    pub fn from_report(stack: &Stack, report: &ApplyReport) -> Self {
        let resources = report
            .resources
            .iter()
            .filter(|r| !stack.declaration(&r.name).is_some_and(Declaration::is_lookup))
            .map(|r| {
                let protect = stack
                    .declaration(&r.name)
                    .is_some_and(|d| d.options.protect);
                let record = ResourceRecord {
                    resource_type: r.resource_type.clone(),
                    state: r.state,
                    protect,
                    outputs: r.outputs.clone(),
                    error: r.error.as_ref().map(ToString::to_string),
                    dependencies: stack
                        .dependencies(&r.name)
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                };
                (r.name.clone(), record)
            })
            .collect();
        Self {
            version: STATE_VERSION,
            project: stack.config().project.clone(),
            stack: stack.name().to_string(),
            run_id: report.run_id.clone(),
            updated_at: Utc::now(),
            resources,
            outputs: report.outputs.clone(),
        }
    }

    /// Carries forward the resources `previous` provisioned that this run
    /// did not.
    ///
    /// A resource that resolved before but failed or was cancelled now, or
    /// that is no longer declared, still exists at the provider. Its earlier
    /// record is kept, with the new failure attached, so destroy can reach it.
    #[must_use]
    pub fn merged(mut self, previous: Option<Self>) -> Self {
        let Some(previous) = previous else {
            return self;
        };
        for (name, record) in previous.resources {
            if record.state != ResourceState::Resolved {
                continue;
            }
            match self.resources.get_mut(&name) {
                Some(current) if current.state == ResourceState::Resolved => {}
                Some(current) => {
                    tracing::debug!(resource = %name, state = ?current.state, "keeping earlier provisioned record");
                    let error = current.error.take();
                    *current = ResourceRecord { error, ..record };
                }
                None => {
                    tracing::debug!(resource = %name, "keeping record of resource no longer declared");
                    let _ = self.resources.insert(name, record);
                }
            }
        }
        self
    }

    /// Returns the state file path of `stack` inside `state_dir`.
    pub fn path(state_dir: &Path, stack: &str) -> PathBuf {
        cirrus_common::constants::state_file(state_dir, stack)
    }

    /// Loads state from `path`; a missing file yields `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        tracing::debug!(path = %path.display(), "loading stack state");
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CirrusError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        let state: Self = serde_json::from_str(&content)?;
        if state.version != STATE_VERSION {
            return Err(CirrusError::Config {
                message: format!(
                    "state file {} has version {}, expected {STATE_VERSION}",
                    path.display(),
                    state.version
                ),
            });
        }
        Ok(Some(state))
    }

    /// Persists state to `path` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::debug!(path = %path.display(), resources = self.resources.len(), "saving stack state");
        let io_err = |source| CirrusError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }

    /// Looks up a resource record.
    pub fn record(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Names of resources that exist at the provider.
    pub fn provisioned(&self) -> impl Iterator<Item = &str> {
        self.resources
            .iter()
            .filter(|(_, r)| r.state == ResourceState::Resolved)
            .map(|(name, _)| name.as_str())
    }

    /// Drops the records of deleted resources.
    ///
    /// Stack outputs are cleared since they may read deleted resources.
    pub fn forget(&mut self, names: &[String]) {
        for name in names {
            let _ = self.resources.remove(name);
        }
        if !names.is_empty() {
            self.outputs.clear();
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> StackState {
        StackState {
            version: STATE_VERSION,
            project: "web".into(),
            stack: "dev".into(),
            run_id: "run-1".into(),
            updated_at: Utc::now(),
            resources: BTreeMap::from([
                (
                    "vpc".to_string(),
                    ResourceRecord {
                        resource_type: "aws:ec2:Vpc".into(),
                        state: ResourceState::Resolved,
                        protect: true,
                        outputs: Attributes::from([("id".to_string(), json!("vpc-1"))]),
                        error: None,
                        dependencies: Vec::new(),
                    },
                ),
                (
                    "subnet".to_string(),
                    ResourceRecord {
                        resource_type: "aws:ec2:Subnet".into(),
                        state: ResourceState::Failed,
                        protect: false,
                        outputs: Attributes::new(),
                        error: Some("boom".into()),
                        dependencies: vec!["vpc".into()],
                    },
                ),
            ]),
            outputs: BTreeMap::from([("vpcId".to_string(), json!("vpc-1"))]),
        }
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = StackState::path(&dir.path().join(".cirrus"), "dev");
        let state = sample();
        state.save(&path).expect("save");

        let loaded = StackState::load(&path).expect("load").expect("present");
        assert_eq!(loaded, state);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = StackState::load(&dir.path().join("nope.state.json")).expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dev.state.json");
        let mut state = sample();
        state.version = 99;
        state.save(&path).expect("save");
        assert!(StackState::load(&path).is_err());
    }

    #[test]
    fn merge_keeps_earlier_provisioned_records() {
        let mut previous = sample();
        let subnet = previous.resources.get_mut("subnet").expect("subnet");
        subnet.state = ResourceState::Resolved;
        subnet.error = None;
        subnet.outputs = Attributes::from([("id".to_string(), json!("subnet-1"))]);

        let mut current = sample();
        current.run_id = "run-2".into();
        let _ = current.resources.remove("vpc");
        let merged = current.merged(Some(previous));

        assert_eq!(merged.run_id, "run-2");
        assert_eq!(merged.provisioned().collect::<Vec<_>>(), vec!["subnet", "vpc"]);
        let subnet = merged.record("subnet").expect("subnet");
        assert_eq!(subnet.outputs["id"], json!("subnet-1"));
        assert_eq!(subnet.error.as_deref(), Some("boom"));
        assert_eq!(subnet.dependencies, vec!["vpc"]);
    }

    #[test]
    fn merge_without_previous_is_identity() {
        let state = sample();
        assert_eq!(state.clone().merged(None), state);
    }

    #[test]
    fn provisioned_lists_resolved_only() {
        let mut state = sample();
        assert_eq!(state.provisioned().collect::<Vec<_>>(), vec!["vpc"]);
        state.forget(&["vpc".to_string()]);
        assert!(state.record("vpc").is_none());
    }
}
