//! Provider abstraction: the component that actually creates resources.
//!
//! The engine decides *when* a resource is provisioned; a [`Provider`]
//! decides *how*. Providers receive fully resolved inputs and answer with
//! the resource's output attributes. Lookups go through
//! [`Provider::invoke`], which reads data without creating anything.

pub mod local;

use cirrus_common::types::{Attributes, ResourceType};
use thiserror::Error;

pub use self::local::LocalProvider;

/// Failure reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider refused or failed to create the resource.
    #[error("{resource_type} `{resource}` was rejected: {reason}")]
    Rejected {
        /// Resource name.
        resource: String,
        /// Resource type tag.
        resource_type: String,
        /// Provider-supplied reason.
        reason: String,
    },

    /// The provider does not know this resource type or function.
    #[error("unsupported resource type or function `{0}`")]
    Unsupported(String),

    /// The resource to delete does not exist.
    #[error("resource `{0}` not found")]
    NotFound(String),
}

/// Everything a provider needs to create one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    /// Stack the resource belongs to.
    pub stack: String,
    /// Region from the stack configuration.
    pub region: String,
    /// Logical resource name.
    pub name: String,
    /// Type tag.
    pub resource_type: ResourceType,
    /// Fully resolved inputs.
    pub inputs: Attributes,
    /// Output attributes other resources or stack outputs will read.
    pub referenced_attributes: Vec<String>,
    /// Whether the resource is protected from destruction.
    pub protect: bool,
}

/// Everything a provider needs to answer one lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    /// Stack the lookup belongs to.
    pub stack: String,
    /// Region from the stack configuration.
    pub region: String,
    /// Logical lookup name.
    pub name: String,
    /// Provider function, such as `aws:ec2:getAmi`.
    pub function: ResourceType,
    /// Fully resolved arguments.
    pub arguments: Attributes,
    /// Result attributes other resources or stack outputs will read.
    pub referenced_attributes: Vec<String>,
}

/// Everything a provider needs to delete one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    /// Stack the resource belongs to.
    pub stack: String,
    /// Logical resource name.
    pub name: String,
    /// Type tag.
    pub resource_type: ResourceType,
    /// Outputs recorded when the resource was provisioned.
    pub outputs: Attributes,
}

/// Creates and deletes resources.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    /// Creates a resource and returns its output attributes.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the resource cannot be created.
    async fn provision(&self, request: &ProvisionRequest) -> Result<Attributes, ProviderError>;

    /// Deletes a previously provisioned resource.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the resource cannot be deleted.
    async fn delete(&self, request: &DeleteRequest) -> Result<(), ProviderError>;

    /// Calls a provider function and returns its result attributes.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the call fails. Providers without
    /// functions keep the default, which rejects every call as unsupported.
    async fn invoke(&self, request: &InvokeRequest) -> Result<Attributes, ProviderError> {
        Err(ProviderError::Unsupported(request.function.to_string()))
    }
}
