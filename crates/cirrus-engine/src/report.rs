//! Results of applying and destroying stacks.

use std::collections::BTreeMap;
use std::time::Duration;

use cirrus_common::types::{Attributes, ResourceState};
use cirrus_graph::ResolutionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one resource in an apply run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReport {
    /// Resource name.
    pub name: String,
    /// Resource type tag.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Final state.
    pub state: ResourceState,
    /// Outputs, when resolved.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: Attributes,
    /// Failure, when failed or cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResolutionError>,
    /// Wall time spent on this resource.
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Outcome of an apply run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    /// Run identifier.
    pub run_id: String,
    /// Stack name.
    pub stack: String,
    /// Per-resource outcomes in dependency order.
    pub resources: Vec<ResourceReport>,
    /// Stack outputs that resolved.
    pub outputs: BTreeMap<String, Value>,
    /// Stack outputs that could not be resolved.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_errors: BTreeMap<String, ResolutionError>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl ApplyReport {
    /// Looks up the report of one resource.
    pub fn resource(&self, name: &str) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Returns the state of one resource.
    pub fn state(&self, name: &str) -> Option<ResourceState> {
        self.resource(name).map(|r| r.state)
    }

    /// Number of resources that ended in `state`.
    pub fn count(&self, state: ResourceState) -> usize {
        self.resources.iter().filter(|r| r.state == state).count()
    }

    /// Returns `true` if every resource resolved.
    pub fn is_success(&self) -> bool {
        self.resources.iter().all(|r| r.state == ResourceState::Resolved)
    }

    /// Resources that failed, in dependency order.
    pub fn failures(&self) -> impl Iterator<Item = &ResourceReport> {
        self.resources
            .iter()
            .filter(|r| r.state == ResourceState::Failed)
    }
}

/// Outcome of a destroy run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyReport {
    /// Resources deleted, in deletion order.
    pub deleted: Vec<String>,
    /// Resources skipped because they were never provisioned.
    pub skipped: Vec<String>,
    /// Resources whose deletion failed, with the reason.
    pub failed: BTreeMap<String, String>,
}

impl DestroyReport {
    /// Returns `true` if no deletion failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}
