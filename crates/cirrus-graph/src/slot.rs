//! Per-resource publication slots.
//!
//! A [`ResourceSlot`] holds the eventual outcome of one resource. It starts
//! `Pending` and transitions exactly once to `Resolved`, `Failed` or
//! `Cancelled`. Deferred outputs subscribe to the slot and wake when it
//! settles.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use cirrus_common::types::{Attributes, ResourceState};
use thiserror::Error;
use tokio::sync::watch;

use crate::output::{Resolution, ResolutionError};

/// Current content of a slot.
#[derive(Debug, Clone)]
pub enum SlotState {
    /// Not settled yet.
    Pending,
    /// Outputs supplied by the provider.
    Resolved(Arc<Attributes>),
    /// The resource or a dependency failed.
    Failed(ResolutionError),
    /// Resolution was aborted.
    Cancelled,
}

impl SlotState {
    /// Returns the coarse state of this slot content.
    pub const fn state(&self) -> ResourceState {
        match self {
            Self::Pending => ResourceState::Pending,
            Self::Resolved(_) => ResourceState::Resolved,
            Self::Failed(_) => ResourceState::Failed,
            Self::Cancelled => ResourceState::Cancelled,
        }
    }

    fn outcome(&self, resource: &str) -> Option<Resolution<Arc<Attributes>>> {
        match self {
            Self::Pending => None,
            Self::Resolved(attributes) => Some(Ok(Arc::clone(attributes))),
            Self::Failed(error) => Some(Err(error.clone())),
            Self::Cancelled => Some(Err(ResolutionError::Cancelled {
                resource: resource.to_string(),
            })),
        }
    }
}

/// A second publication was attempted on a settled slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resource `{resource}` was already published as {state}")]
pub struct AlreadySettled {
    /// Resource whose slot was settled.
    pub resource: String,
    /// State it was settled in.
    pub state: ResourceState,
}

/// Process-unique identity of a slot.
///
/// Two slots for resources with the same name in different builders have
/// different ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u64);

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

impl SlotId {
    fn next() -> Self {
        Self(NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Single-assignment outcome cell for one resource.
#[derive(Debug)]
pub struct ResourceSlot {
    id: SlotId,
    name: String,
    state: watch::Sender<SlotState>,
    publications: AtomicUsize,
}

impl ResourceSlot {
    /// Creates a pending slot.
    pub fn new(name: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SlotState::Pending);
        Self {
            id: SlotId::next(),
            name: name.into(),
            state,
            publications: AtomicUsize::new(0),
        }
    }

    /// Returns the identity of this slot.
    pub const fn id(&self) -> SlotId {
        self.id
    }

    /// Returns the resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current resolution state.
    pub fn state(&self) -> ResourceState {
        self.state.borrow().state()
    }

    /// Returns a copy of the current slot content.
    pub fn snapshot(&self) -> SlotState {
        self.state.borrow().clone()
    }

    /// Returns `true` once the slot left `Pending`.
    pub fn is_settled(&self) -> bool {
        self.state() != ResourceState::Pending
    }

    /// Number of successful publications; never exceeds one.
    pub fn publication_count(&self) -> usize {
        self.publications.load(Ordering::Acquire)
    }

    /// Settles the slot.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadySettled`] if the slot already left `Pending`; the
    /// existing outcome is kept.
    pub fn publish(&self, next: SlotState) -> Result<(), AlreadySettled> {
        let mut previous = ResourceState::Pending;
        let accepted = self.state.send_if_modified(|current| {
            if matches!(current, SlotState::Pending) && !matches!(next, SlotState::Pending) {
                *current = next;
                true
            } else {
                previous = current.state();
                false
            }
        });
        if !accepted {
            return Err(AlreadySettled {
                resource: self.name.clone(),
                state: previous,
            });
        }
        let _ = self.publications.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(resource = %self.name, state = %self.state(), "slot published");
        Ok(())
    }

    /// Publishes resolved outputs.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadySettled`] if the slot was already published.
    pub fn resolve(&self, attributes: Attributes) -> Result<(), AlreadySettled> {
        self.publish(SlotState::Resolved(Arc::new(attributes)))
    }

    /// Publishes a failure.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadySettled`] if the slot was already published.
    pub fn fail(&self, error: ResolutionError) -> Result<(), AlreadySettled> {
        self.publish(SlotState::Failed(error))
    }

    /// Publishes cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadySettled`] if the slot was already published.
    pub fn cancel(&self) -> Result<(), AlreadySettled> {
        self.publish(SlotState::Cancelled)
    }

    /// Waits until the slot settles.
    ///
    /// # Errors
    ///
    /// Returns the published failure, or cancellation.
    pub async fn wait(&self) -> Resolution<Arc<Attributes>> {
        let mut updates = self.state.subscribe();
        loop {
            let outcome = updates.borrow_and_update().outcome(&self.name);
            if let Some(outcome) = outcome {
                return outcome;
            }
            if updates.changed().await.is_err() {
                return Err(ResolutionError::Cancelled {
                    resource: self.name.clone(),
                });
            }
        }
    }
}
