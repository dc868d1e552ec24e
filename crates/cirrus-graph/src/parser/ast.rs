//! Document model for YAML stack files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root of a parsed stack file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StackDocument {
    /// Program name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Configuration keys the program reads, with optional defaults.
    #[serde(default)]
    pub config: BTreeMap<String, ConfigDecl>,
    /// Provider lookups; declared before every resource.
    #[serde(default)]
    pub lookups: Vec<LookupDecl>,
    /// Resource declarations, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    /// Stack outputs.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

/// A configuration key declared by the program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigDecl {
    /// Value used when the stack configuration does not set the key.
    #[serde(default)]
    pub default: Option<Value>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A resource block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceDecl {
    /// Logical name; may interpolate `${config.*}`.
    pub name: String,
    /// Type tag such as `aws:ec2:Vpc`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Inputs; strings may contain `${...}` references.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Management options.
    #[serde(default)]
    pub options: OptionsDecl,
}

/// A lookup block: data read through a provider function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LookupDecl {
    /// Logical name, shared with resources; may interpolate `${config.*}`.
    pub name: String,
    /// Provider function such as `aws:ec2:getAmi`.
    pub function: String,
    /// Function arguments; strings may contain `${...}` references.
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
}

/// `options:` block of a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OptionsDecl {
    /// Refuse to destroy the resource unless forced.
    #[serde(default)]
    pub protect: bool,
    /// Additional ordering dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
}
