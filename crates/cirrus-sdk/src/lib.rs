//! # cirrus-sdk
//!
//! Public SDK for using Cirrus as a Rust library.
//!
//! Provides three main entry points:
//! - [`StackLoader`](loader::StackLoader): Reads YAML stack files and compiles them against a configuration.
//! - [`StackRunner`](runner::StackRunner): Preview, apply, outputs and destroy with persisted state.
//! - [`EventListener`](event::EventListener): Follows engine events while a run is in progress.
//!
//! Stacks can also be declared in code with [`StackBuilder`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cirrus_sdk::loader::StackLoader;
//! use cirrus_sdk::runner::StackRunner;
//! use cirrus_sdk::LocalProvider;
//!
//! # async fn run() -> cirrus_sdk::Result<()> {
//! let runner = StackRunner::new(StackLoader::new("cirrus.yaml"), Arc::new(LocalProvider::new()));
//! println!("{}", runner.preview()?);
//! let report = runner.up(Default::default()).await?;
//! println!("{:?}", report.outputs);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod event;
pub mod loader;
pub mod runner;

pub use cirrus_common::config::StackConfig;
pub use cirrus_common::error::{CirrusError, Result};
pub use cirrus_engine::{ApplyReport, DestroyReport, Engine, LocalProvider, Provider};
pub use cirrus_graph::{Output, ResourceSpec, Stack, StackBuilder, interpolate};
