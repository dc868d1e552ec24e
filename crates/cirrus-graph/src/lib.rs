//! # cirrus-graph
//!
//! Construction and validation of resource graphs.
//!
//! Handles:
//! - **Output**: Deferred values with `map`/`then`/`all` composition.
//! - **Resource**: Declarations whose inputs mix literals and deferred values.
//! - **Builder**: `declare(spec) -> handle`, forward references, stack outputs.
//! - **Graph**: Dependency graph reification and cycle detection via `petgraph`.
//! - **Stack**: The validated graph handed to the engine.
//! - **Plan**: Deterministic preview of a stack.
//! - **Parser**: YAML stack files with `${resource.attr}` interpolation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod graph;
pub mod output;
pub mod parser;
pub mod plan;
pub mod resource;
pub mod slot;
pub mod stack;
pub mod template;

pub use builder::StackBuilder;
pub use output::{Output, Reference, ResolutionError};
pub use resource::{DeclarationKind, Input, ResourceHandle, ResourceOptions, ResourceSpec};
pub use stack::Stack;
