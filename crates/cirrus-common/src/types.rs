//! Domain primitive types used across the Cirrus workspace.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_RESOURCE_NAME_LEN;
use crate::error::{CirrusError, Result};

/// Resolved output attributes of a resource, ordered by attribute name.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Logical name of a resource, unique within a stack.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    /// Validates and wraps a resource name.
    ///
    /// Names are non-empty, at most 128 characters, and consist of ASCII
    /// letters, digits, `-`, `_` and `.`.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::MalformedName`] if the name is rejected.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.len() > MAX_RESOURCE_NAME_LEN {
            Some("longer than 128 characters")
        } else if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            Some("only ASCII letters, digits, '-', '_' and '.' are allowed")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(CirrusError::MalformedName {
                kind: "resource name",
                value: name,
                reason,
            }),
            None => Ok(Self(name)),
        }
    }

    /// Returns the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type tag of a resource, e.g. `aws:ec2:Vpc`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(String);

impl ResourceType {
    /// Validates and wraps a resource type tag.
    ///
    /// A type has at least two non-empty segments separated by `:`.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::MalformedName`] if the tag is rejected.
    pub fn parse(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        let segments: Vec<&str> = tag.split(':').collect();
        if segments.len() < 2 || segments.iter().any(|s| s.trim().is_empty()) {
            return Err(CirrusError::MalformedName {
                kind: "resource type",
                value: tag,
                reason: "expected `provider:module:Kind`",
            });
        }
        Ok(Self(tag))
    }

    /// Returns the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the provider segment (`aws` in `aws:ec2:Vpc`).
    pub fn provider(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// Returns the last segment (`Vpc` in `aws:ec2:Vpc`).
    pub fn kind(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or_default()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of an input or output attribute of a resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeName(String);

impl AttributeName {
    /// Validates and wraps an attribute name.
    ///
    /// Attribute names start with an ASCII letter followed by ASCII
    /// letters, digits or `_`.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::MalformedName`] if the name is rejected.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut chars = name.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(CirrusError::MalformedName {
                kind: "attribute name",
                value: name,
                reason: "must start with a letter and contain only letters, digits or '_'",
            });
        }
        Ok(Self(name))
    }

    /// Returns the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolution state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    /// Declared, outputs not yet known.
    Pending,
    /// Outputs were supplied by the provider.
    Resolved,
    /// The resource or one of its dependencies failed.
    Failed,
    /// Resolution was aborted before the resource settled.
    Cancelled,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolved => write!(f, "resolved"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_name_accepts_original_style_names() {
        for name in ["vpc", "sxsyd-listener-443", "test-web-dev", "myKeyPair", "a.b_c"] {
            assert!(ResourceName::parse(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn resource_name_rejects_bad_input() {
        for name in ["", "has space", "slash/name", "${env}"] {
            let err = ResourceName::parse(name).unwrap_err();
            assert!(err.to_string().contains("resource name"), "got: {err}");
        }
        assert!(ResourceName::parse("x".repeat(129)).is_err());
    }

    #[test]
    fn resource_type_splits_segments() {
        let ty = ResourceType::parse("aws:ec2:Vpc").expect("valid");
        assert_eq!(ty.provider(), "aws");
        assert_eq!(ty.kind(), "Vpc");
    }

    #[test]
    fn resource_type_requires_two_segments() {
        assert!(ResourceType::parse("Vpc").is_err());
        assert!(ResourceType::parse("aws::Vpc").is_err());
        assert!(ResourceType::parse("aws:Vpc").is_ok());
    }

    #[test]
    fn attribute_name_validation() {
        assert!(AttributeName::parse("publicDns").is_ok());
        assert!(AttributeName::parse("zone_id2").is_ok());
        assert!(AttributeName::parse("2fast").is_err());
        assert!(AttributeName::parse("").is_err());
        assert!(AttributeName::parse("dns-name").is_err());
        assert!(AttributeName::parse("a.b").is_err());
    }

    #[test]
    fn resource_state_serializes_lowercase() {
        let json = serde_json::to_string(&ResourceState::Cancelled).expect("serialize");
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(ResourceState::Resolved.to_string(), "resolved");
    }
}
