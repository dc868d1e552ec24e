//! # cirrus-engine
//!
//! Applies validated stacks.
//!
//! Handles:
//! - **Engine**: Concurrent resolution with partial failure and cancellation.
//! - **Provider**: The collaborator that creates and deletes resources.
//! - **Events**: Progress notifications for CLIs and embedders.
//! - **State**: JSON state file written after every run.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod engine;
pub mod events;
pub mod provider;
pub mod report;
pub mod state;

pub use engine::Engine;
pub use events::{ChannelNotifier, EngineEvent, EventNotifier, NoopNotifier, TracingNotifier};
pub use provider::{LocalProvider, Provider, ProviderError};
pub use report::{ApplyReport, DestroyReport, ResourceReport};
pub use state::StackState;
