//! Concurrent apply and ordered destroy of a validated [`Stack`].
//!
//! Every resource gets its own task. A task waits for its resolved inputs
//! and `depends_on` resources, takes a permit from the parallelism
//! semaphore, calls the [`Provider`] and publishes the outcome into the
//! resource's slot. Lookups run the same way through
//! [`Provider::invoke`] and are never deleted. Publishing wakes every dependent task, so independent
//! branches progress without coordination and a failure only reaches the
//! subtree that reads from it.
//!
//! Values chained with `then` can read resources that add no dependency
//! edge. When every unfinished task waits on such a value and nothing else
//! is running, the run has stalled: the waiting tasks fail with
//! [`ResolutionError::Stalled`] instead of waiting forever.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use cirrus_common::error::{CirrusError, Result};
use cirrus_common::types::{Attributes, ResourceState, ResourceType};
use cirrus_graph::slot::{ResourceSlot, SlotState};
use cirrus_graph::output::Resolution;
use cirrus_graph::resource::Declaration;
use cirrus_graph::{DeclarationKind, Output, ResolutionError, Stack};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::{EngineEvent, EventNotifier, TracingNotifier};
use crate::provider::{DeleteRequest, InvokeRequest, Provider, ProviderError, ProvisionRequest};
use crate::report::{ApplyReport, DestroyReport, ResourceReport};
use crate::state::StackState;

/// How long a stall must persist before the waiting tasks are failed.
const STALL_GRACE: Duration = Duration::from_millis(25);

/// Drives stacks through a [`Provider`].
#[derive(Clone)]
pub struct Engine {
    provider: Arc<dyn Provider>,
    notifier: Arc<dyn EventNotifier>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine that logs its events through `tracing`.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Replaces the event notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Returns the provider.
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Provisions every resource of `stack`.
    ///
    /// Failed resources do not abort the run: their dependents fail with
    /// the root cause and independent branches keep going. Cancelling
    /// `cancel` stops resources that have not resolved yet; they end up
    /// `Cancelled` in the report.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::AlreadyApplied`] if any resource of `stack`
    /// was already published. Resolution failures are reported per
    /// resource, not as an error.
    pub async fn apply(&self, stack: &Stack, cancel: CancellationToken) -> Result<ApplyReport> {
        if !stack.is_pristine() {
            return Err(CirrusError::AlreadyApplied {
                stack: stack.name().to_string(),
            });
        }

        let run_id = Uuid::new_v4().to_string();
        let parallelism = stack.config().parallelism.max(1);
        tracing::info!(
            stack = stack.name(),
            %run_id,
            resources = stack.len(),
            parallelism,
            provider = self.provider.name(),
            "apply started"
        );
        self.notifier.notify(EngineEvent::ApplyStarted {
            run_id: run_id.clone(),
            stack: stack.name().to_string(),
            resources: stack.len(),
        });

        let semaphore = Arc::new(Semaphore::new(parallelism));
        let stall = Arc::new(Stall::default());
        let mut tasks = JoinSet::new();
        let mut names = HashMap::with_capacity(stack.len());
        let mut unfinished: Vec<(String, Output<Attributes>)> = Vec::with_capacity(stack.len());
        for name in stack.order() {
            match self.prepare(stack, name.as_str(), &run_id, &semaphore, &cancel, &stall) {
                Some(task) => {
                    unfinished.push((task.name.clone(), task.readiness.clone()));
                    let handle = tasks.spawn(task.run());
                    let _ = names.insert(handle.id(), name.as_str().to_string());
                }
                None => tracing::warn!(resource = %name, "resource has no slot"),
            }
        }

        let mut reports: HashMap<String, ResourceReport> = HashMap::with_capacity(stack.len());
        let mut cancel_seen = false;
        let mut suspect = stalled(&unfinished).is_some();
        loop {
            tokio::select! {
                joined = tasks.join_next_with_id() => match joined {
                    None => break,
                    Some(Ok((_, report))) => {
                        unfinished.retain(|(name, _)| *name != report.name);
                        let _ = reports.insert(report.name.clone(), report);
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "resource task aborted");
                        if let Some(name) = names.remove(&e.id()) {
                            unfinished.retain(|(n, _)| *n != name);
                            let report = settle_orphan(stack, &name);
                            let _ = reports.insert(name, report);
                        }
                    }
                },
                () = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    tracing::warn!(%run_id, "cancellation requested");
                    self.notifier.notify(EngineEvent::CancelRequested {
                        run_id: run_id.clone(),
                    });
                }
                () = tokio::time::sleep(STALL_GRACE), if suspect => {
                    if let Some(waiting) = stalled(&unfinished) {
                        tracing::warn!(%run_id, ?waiting, "no resource can make progress");
                        stall.fire(waiting);
                    }
                }
            }
            suspect = !cancel_seen && !stall.is_fired() && stalled(&unfinished).is_some();
        }

        let resources: Vec<ResourceReport> = stack
            .order()
            .iter()
            .map(|name| {
                reports
                    .remove(name.as_str())
                    .unwrap_or_else(|| settle_orphan(stack, name.as_str()))
            })
            .collect();
        release_unreachable(stack);

        let mut outputs = BTreeMap::new();
        let mut output_errors = BTreeMap::new();
        // Every slot is settled here; only values chained to resources
        // outside the stack can still be pending.
        for output in stack.outputs() {
            let resolved = output.value().peek().unwrap_or_else(|| {
                Err(ResolutionError::Stalled {
                    resource: output.name().to_string(),
                    waiting: output.value().dependencies().into_iter().collect(),
                })
            });
            match resolved {
                Ok(value) => {
                    let _ = outputs.insert(output.name().to_string(), value);
                }
                Err(e) => {
                    tracing::warn!(output = output.name(), error = %e, "stack output unresolved");
                    let _ = output_errors.insert(output.name().to_string(), e);
                }
            }
        }

        let report = ApplyReport {
            run_id: run_id.clone(),
            stack: stack.name().to_string(),
            resources,
            outputs,
            output_errors,
            cancelled: cancel.is_cancelled(),
        };
        let resolved = report.count(ResourceState::Resolved);
        let failed = report.count(ResourceState::Failed);
        let cancelled = report.count(ResourceState::Cancelled);
        tracing::info!(%run_id, resolved, failed, cancelled, "apply finished");
        self.notifier.notify(EngineEvent::ApplyFinished {
            run_id,
            resolved,
            failed,
            cancelled,
        });
        Ok(report)
    }

    fn prepare(
        &self,
        stack: &Stack,
        name: &str,
        run_id: &str,
        semaphore: &Arc<Semaphore>,
        cancel: &CancellationToken,
        stall: &Arc<Stall>,
    ) -> Option<ResourceTask> {
        let declaration = stack.declaration(name)?;
        Some(ResourceTask {
            run_id: run_id.to_string(),
            stack: stack.name().to_string(),
            region: stack.config().region.clone(),
            name: name.to_string(),
            resource_type: declaration.resource_type.clone(),
            kind: declaration.kind,
            protect: declaration.options.protect,
            referenced_attributes: stack.referenced_attributes(name),
            readiness: stack.readiness(name)?,
            slot: Arc::clone(stack.slot(name)?),
            provider: Arc::clone(&self.provider),
            notifier: Arc::clone(&self.notifier),
            semaphore: Arc::clone(semaphore),
            cancel: cancel.clone(),
            stall: Arc::clone(stall),
        })
    }

    /// Deletes every resource `state` records as provisioned and drops it
    /// from `state`.
    ///
    /// Records drive the teardown, so resources that resolved in an earlier
    /// run or are no longer declared by `stack` are deleted too. A resource
    /// is only deleted once everything depending on it is gone; when a
    /// deletion fails, the resources it depends on are kept.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::ProtectedResource`] before deleting anything
    /// if a protected resource would be deleted and `force` is false.
    pub async fn destroy(&self, stack: &Stack, state: &mut StackState, force: bool) -> Result<DestroyReport> {
        let targets = destroy_targets(stack, state);

        if !force {
            if let Some(name) = targets
                .iter()
                .find(|name| state.record(name).is_some_and(|r| r.protect))
            {
                return Err(CirrusError::ProtectedResource { name: name.clone() });
            }
        }

        tracing::info!(stack = stack.name(), resources = targets.len(), force, "destroy started");
        let mut report = DestroyReport {
            skipped: managed(stack)
                .filter(|name| !targets.contains(name))
                .collect(),
            ..DestroyReport::default()
        };
        // Dependency name -> the dependent that was not deleted.
        let mut kept: BTreeMap<String, String> = BTreeMap::new();

        for name in &targets {
            if let Some(blocker) = kept.get(name) {
                let reason = format!("dependent resource `{blocker}` was not deleted");
                tracing::warn!(resource = %name, %reason, "deletion skipped");
                let _ = report.failed.insert(name.clone(), reason);
                keep_dependencies(stack, state, name, &mut kept);
                continue;
            }

            let Some(record) = state.record(name) else {
                continue;
            };
            let request = DeleteRequest {
                stack: stack.name().to_string(),
                name: name.clone(),
                resource_type: ResourceType::parse(record.resource_type.as_str())?,
                outputs: record.outputs.clone(),
            };
            match self.provider.delete(&request).await {
                Ok(()) => {
                    tracing::info!(resource = %name, "resource deleted");
                    self.notifier.notify(EngineEvent::ResourceDeleted {
                        resource: name.clone(),
                    });
                    report.deleted.push(name.clone());
                }
                Err(e) => {
                    tracing::error!(resource = %name, error = %e, "deletion failed");
                    let _ = report.failed.insert(name.clone(), e.to_string());
                    keep_dependencies(stack, state, name, &mut kept);
                }
            }
        }

        state.forget(&report.deleted);
        tracing::info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "destroy finished"
        );
        Ok(report)
    }
}

/// Names of the resources `stack` creates, in dependency order.
fn managed(stack: &Stack) -> impl Iterator<Item = String> + '_ {
    stack
        .order()
        .iter()
        .filter(|name| !stack.declaration(name.as_str()).is_some_and(Declaration::is_lookup))
        .map(ToString::to_string)
}

/// Direct dependencies of `name` according to both the stack and its record.
fn recorded_dependencies(stack: &Stack, state: &StackState, name: &str) -> BTreeSet<String> {
    let mut dependencies: BTreeSet<String> = stack
        .dependencies(name)
        .into_iter()
        .map(str::to_string)
        .collect();
    if let Some(record) = state.record(name) {
        dependencies.extend(record.dependencies.iter().cloned());
    }
    dependencies
}

/// Provisioned resources of `state` in deletion order: every resource comes
/// before the resources it depends on.
///
/// Ties follow the reverse declaration order of `stack`, then resources it
/// no longer declares in reverse name order.
fn destroy_targets(stack: &Stack, state: &StackState) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut remaining: Vec<String> = stack
        .destroy_order()
        .into_iter()
        .map(|name| name.as_str().to_string())
        .chain(state.resources.keys().rev().cloned())
        .filter(|name| {
            state
                .record(name)
                .is_some_and(|r| r.state == ResourceState::Resolved)
        })
        .filter(|name| seen.insert(name.clone()))
        .collect();

    let dependencies: HashMap<String, BTreeSet<String>> = remaining
        .iter()
        .map(|name| (name.clone(), recorded_dependencies(stack, state, name)))
        .collect();
    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .position(|name| {
                !remaining
                    .iter()
                    .any(|other| other != name && dependencies.get(other).is_some_and(|d| d.contains(name)))
            })
            .unwrap_or(0);
        order.push(remaining.remove(next));
    }
    order
}

/// Marks everything `name` transitively depends on as kept because of it.
fn keep_dependencies(stack: &Stack, state: &StackState, name: &str, kept: &mut BTreeMap<String, String>) {
    let mut queue: Vec<String> = recorded_dependencies(stack, state, name).into_iter().collect();
    while let Some(dependency) = queue.pop() {
        if kept.contains_key(&dependency) {
            continue;
        }
        queue.extend(recorded_dependencies(stack, state, &dependency));
        let _ = kept.insert(dependency, name.to_string());
    }
}

/// Everything one spawned resource task owns.
struct ResourceTask {
    run_id: String,
    stack: String,
    region: String,
    name: String,
    resource_type: ResourceType,
    kind: DeclarationKind,
    protect: bool,
    referenced_attributes: Vec<String>,
    readiness: Output<Attributes>,
    slot: Arc<ResourceSlot>,
    provider: Arc<dyn Provider>,
    notifier: Arc<dyn EventNotifier>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    stall: Arc<Stall>,
}

impl ResourceTask {
    async fn run(self) -> ResourceReport {
        let started = Instant::now();
        let outcome = self.provision().await;

        let published = match &outcome {
            Ok(attributes) => self.slot.resolve(attributes.clone()),
            Err(e) if e.is_cancelled() => self.slot.cancel(),
            Err(e) => self.slot.fail(e.clone()),
        };
        if let Err(e) = published {
            tracing::error!(resource = %self.name, error = %e, "second publication rejected");
        }

        let state = self.slot.state();
        self.notifier.notify(EngineEvent::ResourceSettled {
            run_id: self.run_id.clone(),
            resource: self.name.clone(),
            state,
            error: outcome.as_ref().err().map(ToString::to_string),
        });

        let (outputs, error) = match outcome {
            Ok(attributes) => (attributes, None),
            Err(e) => (Attributes::new(), Some(e)),
        };
        ResourceReport {
            name: self.name,
            resource_type: self.resource_type.to_string(),
            state,
            outputs,
            error,
            elapsed: started.elapsed(),
        }
    }

    async fn provision(&self) -> Resolution<Attributes> {
        let cancelled = || ResolutionError::Cancelled {
            resource: self.name.clone(),
        };

        let inputs = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(cancelled()),
            () = self.stall.token.cancelled() => return Err(self.stall.error(&self.name)),
            inputs = self.readiness.resolve() => inputs.map_err(|e| e.propagate(&self.name))?,
        };

        let _permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(cancelled()),
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.map_err(|_| cancelled())?,
        };

        self.notifier.notify(EngineEvent::ResourceStarted {
            run_id: self.run_id.clone(),
            resource: self.name.clone(),
        });
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(cancelled()),
            result = self.call_provider(inputs) => result.map_err(|e| {
                ResolutionError::ProvisionFailed {
                    resource: self.name.clone(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    async fn call_provider(&self, inputs: Attributes) -> std::result::Result<Attributes, ProviderError> {
        match self.kind {
            DeclarationKind::Resource => {
                tracing::info!(resource = %self.name, r#type = %self.resource_type, "provisioning");
                let request = ProvisionRequest {
                    stack: self.stack.clone(),
                    region: self.region.clone(),
                    name: self.name.clone(),
                    resource_type: self.resource_type.clone(),
                    inputs,
                    referenced_attributes: self.referenced_attributes.clone(),
                    protect: self.protect,
                };
                self.provider.provision(&request).await
            }
            DeclarationKind::Lookup => {
                tracing::info!(lookup = %self.name, function = %self.resource_type, "invoking");
                let request = InvokeRequest {
                    stack: self.stack.clone(),
                    region: self.region.clone(),
                    name: self.name.clone(),
                    function: self.resource_type.clone(),
                    arguments: inputs,
                    referenced_attributes: self.referenced_attributes.clone(),
                };
                self.provider.invoke(&request).await
            }
        }
    }
}

/// Shared by the tasks of one run; fired when none of them can progress.
#[derive(Debug, Default)]
struct Stall {
    token: CancellationToken,
    waiting: OnceLock<Vec<String>>,
}

impl Stall {
    fn fire(&self, waiting: Vec<String>) {
        let _ = self.waiting.set(waiting);
        self.token.cancel();
    }

    fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    fn error(&self, resource: &str) -> ResolutionError {
        ResolutionError::Stalled {
            resource: resource.to_string(),
            waiting: self.waiting.get().cloned().unwrap_or_default(),
        }
    }
}

/// Returns the names of `unfinished` if none of them has its inputs.
///
/// A task whose inputs are known is running or about to run, so the run
/// is not stalled while any readiness can be produced without waiting.
fn stalled(unfinished: &[(String, Output<Attributes>)]) -> Option<Vec<String>> {
    if unfinished.is_empty() || unfinished.iter().any(|(_, readiness)| readiness.peek().is_some()) {
        return None;
    }
    Some(unfinished.iter().map(|(name, _)| name.clone()).collect())
}

/// Builds the report of a resource whose task never returned.
///
/// The slot is failed if it is still pending, so dependents and stack
/// outputs do not wait on it forever.
fn settle_orphan(stack: &Stack, name: &str) -> ResourceReport {
    let resource_type = stack
        .declaration(name)
        .map(|d| d.resource_type.to_string())
        .unwrap_or_default();
    let aborted = ResolutionError::ProvisionFailed {
        resource: name.to_string(),
        reason: "resource task aborted".to_string(),
    };
    let Some(slot) = stack.slot(name) else {
        return ResourceReport {
            name: name.to_string(),
            resource_type,
            state: ResourceState::Failed,
            outputs: Attributes::new(),
            error: Some(aborted),
            elapsed: std::time::Duration::ZERO,
        };
    };
    let _ = slot.fail(aborted);
    let (state, outputs, error) = match slot.snapshot() {
        SlotState::Resolved(attributes) => (ResourceState::Resolved, (*attributes).clone(), None),
        SlotState::Failed(e) => (ResourceState::Failed, Attributes::new(), Some(e)),
        SlotState::Cancelled => (
            ResourceState::Cancelled,
            Attributes::new(),
            Some(ResolutionError::Cancelled {
                resource: name.to_string(),
            }),
        ),
        SlotState::Pending => (ResourceState::Pending, Attributes::new(), None),
    };
    ResourceReport {
        name: name.to_string(),
        resource_type,
        state,
        outputs,
        error,
        elapsed: std::time::Duration::ZERO,
    }
}

/// Cancels slots no task will ever publish.
fn release_unreachable(stack: &Stack) {
    for slot in stack.slots().filter(|slot| !slot.is_settled()) {
        tracing::debug!(resource = slot.name(), "releasing unpublished slot");
        let _ = slot.cancel();
    }
}
