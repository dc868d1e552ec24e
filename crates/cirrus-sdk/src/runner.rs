//! Preview, apply, outputs and destroy for one stack file.
//!
//! A [`StackRunner`] ties a [`StackLoader`] to an [`Engine`] and a state
//! directory. Every operation rebuilds the stack from the file, so runs are
//! independent of each other; the state file is what carries results from
//! `up` to `outputs` and `destroy`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cirrus_common::error::{CirrusError, Result};
use cirrus_engine::events::EventNotifier;
use cirrus_engine::{ApplyReport, DestroyReport, Engine, Provider, StackState};
use cirrus_graph::plan::Plan;
use cirrus_graph::resource::Declaration;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::loader::StackLoader;

/// Runs lifecycle operations for one stack.
#[derive(Debug, Clone)]
pub struct StackRunner {
    loader: StackLoader,
    engine: Engine,
    state_dir: PathBuf,
}

impl StackRunner {
    /// Creates a runner keeping state next to the stack file.
    pub fn new(loader: StackLoader, provider: Arc<dyn Provider>) -> Self {
        let state_dir = cirrus_common::constants::project_dir(loader.path());
        Self {
            loader,
            engine: Engine::new(provider),
            state_dir,
        }
    }

    /// Keeps state in `dir` instead.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Sends engine events to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.engine = self.engine.with_notifier(notifier);
        self
    }

    /// Returns the state directory.
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Returns the loader.
    pub const fn loader(&self) -> &StackLoader {
        &self.loader
    }

    /// Builds the stack and returns its plan without provisioning anything.
    ///
    /// # Errors
    ///
    /// Returns any construction error.
    pub fn preview(&self) -> Result<Plan> {
        Ok(self.loader.load()?.plan())
    }

    /// Renders the dependency graph in DOT format.
    ///
    /// # Errors
    ///
    /// Returns any construction error.
    pub fn graph(&self) -> Result<String> {
        Ok(self.loader.load()?.to_dot())
    }

    /// Applies the stack and persists the resulting state.
    ///
    /// The state is written even when resources failed or the run was
    /// cancelled, so resolved resources can still be destroyed later.
    /// Resources an earlier `up` provisioned keep their records until a
    /// `destroy` deletes them.
    ///
    /// # Errors
    ///
    /// Returns construction errors and state read or write failures.
    pub async fn up(&self, cancel: CancellationToken) -> Result<ApplyReport> {
        let stack = self.loader.load()?;
        let path = StackState::path(&self.state_dir, stack.name());
        let previous = StackState::load(&path)?;
        let report = self.engine.apply(&stack, cancel).await?;
        StackState::from_report(&stack, &report)
            .merged(previous)
            .save(&path)?;
        tracing::info!(path = %path.display(), "stack state saved");
        Ok(report)
    }

    /// Reads the persisted state, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack file or the state file is invalid.
    pub fn state(&self) -> Result<Option<StackState>> {
        let doc = self.loader.document()?;
        let config = self.loader.config_for(&doc);
        StackState::load(&StackState::path(&self.state_dir, &config.stack))
    }

    /// Stack outputs recorded by the last `up`.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::NotFound`] if the stack was never applied.
    pub fn outputs(&self) -> Result<BTreeMap<String, Value>> {
        let doc = self.loader.document()?;
        let config = self.loader.config_for(&doc);
        let path = StackState::path(&self.state_dir, &config.stack);
        StackState::load(&path)?
            .map(|state| state.outputs)
            .ok_or_else(|| CirrusError::NotFound {
                kind: "stack state",
                id: path.display().to_string(),
            })
    }

    /// Deletes every provisioned resource and updates the state file.
    ///
    /// A stack that was never applied destroys nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::ProtectedResource`] if a protected resource
    /// would be deleted without `force`, and construction or state errors.
    pub async fn destroy(&self, force: bool) -> Result<DestroyReport> {
        let stack = self.loader.load()?;
        let path = StackState::path(&self.state_dir, stack.name());
        let Some(mut state) = StackState::load(&path)? else {
            tracing::info!(stack = stack.name(), "no state recorded, nothing to destroy");
            return Ok(DestroyReport {
                skipped: stack
                    .order()
                    .iter()
                    .filter(|name| !stack.declaration(name.as_str()).is_some_and(Declaration::is_lookup))
                    .map(ToString::to_string)
                    .collect(),
                ..DestroyReport::default()
            });
        };
        let report = self.engine.destroy(&stack, &mut state, force).await?;
        state.save(&path)?;
        Ok(report)
    }
}
