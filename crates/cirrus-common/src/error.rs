//! Unified error types for the Cirrus workspace.
//!
//! Construction and configuration failures are reported through
//! [`CirrusError`]. Per-resource resolution failures are not errors of the
//! whole stack and live in `cirrus-graph` as `ResolutionError`.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CirrusError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required configuration value was not supplied.
    #[error("missing required configuration value `{key}`")]
    MissingConfig {
        /// Configuration key that has no value and no default.
        key: String,
    },

    /// A required item was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing item.
        kind: &'static str,
        /// Identifier of the missing item.
        id: String,
    },

    /// Two resources were declared with the same logical name.
    #[error("duplicate resource name: `{name}`")]
    DuplicateResource {
        /// The name declared twice.
        name: String,
    },

    /// A deferred reference points at a resource that was never declared.
    #[error("`{referenced_by}` references undeclared resource `{name}`")]
    UndeclaredResource {
        /// Name of the missing resource.
        name: String,
        /// Resource or stack output holding the reference.
        referenced_by: String,
    },

    /// A resource name, type, or attribute name is malformed.
    #[error("malformed {kind} `{value}`: {reason}")]
    MalformedName {
        /// What was being validated (`resource name`, `attribute name`, ...).
        kind: &'static str,
        /// The offending value.
        value: String,
        /// Why the value was rejected.
        reason: &'static str,
    },

    /// An interpolation or reference expression could not be parsed.
    #[error("malformed reference in `{input}`: {reason}")]
    MalformedReference {
        /// The raw text containing the reference.
        input: String,
        /// Why the reference was rejected.
        reason: String,
    },

    /// The implied dependency graph contains a cycle.
    #[error("cyclic dependency detected: {}", .path.join(" -> "))]
    Cycle {
        /// Resources along the cycle; the first entry is repeated at the end.
        path: Vec<String>,
    },

    /// A protected resource would be destroyed.
    #[error("resource `{name}` is protected; destroy it with --force")]
    ProtectedResource {
        /// Name of the protected resource.
        name: String,
    },

    /// The stack's resources have already been resolved once.
    #[error("stack `{stack}` has already been applied; rebuild it to apply again")]
    AlreadyApplied {
        /// Stack name.
        stack: String,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// YAML parsing failed.
    #[error("YAML error: {source}")]
    Yaml {
        /// Underlying YAML error.
        #[from]
        source: serde_yaml::Error,
    },
}

impl CirrusError {
    /// Returns `true` for errors raised while constructing a resource graph.
    ///
    /// These abort the whole graph before any provisioning is attempted.
    pub const fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateResource { .. }
                | Self::UndeclaredResource { .. }
                | Self::MalformedName { .. }
                | Self::MalformedReference { .. }
                | Self::Cycle { .. }
                | Self::MissingConfig { .. }
        )
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CirrusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = CirrusError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency detected: a -> b -> a");
    }

    #[test]
    fn construction_errors_are_classified() {
        assert!(
            CirrusError::UndeclaredResource {
                name: "vpc".into(),
                referenced_by: "subnet".into(),
            }
            .is_construction_error()
        );
        assert!(
            !CirrusError::ProtectedResource { name: "vpc".into() }.is_construction_error()
        );
    }
}
