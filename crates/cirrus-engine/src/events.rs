//! Apply events and notifiers.
//!
//! The engine reports progress through an [`EventNotifier`]. Consumers
//! decide what to do with events: print them, persist them, or ignore them.

use cirrus_common::types::ResourceState;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while applying or destroying a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// An apply run has started.
    ApplyStarted {
        /// Run identifier.
        run_id: String,
        /// Stack name.
        stack: String,
        /// Number of resources in the stack.
        resources: usize,
    },

    /// A resource's inputs are resolved and the provider was called.
    ResourceStarted {
        /// Run identifier.
        run_id: String,
        /// Resource name.
        resource: String,
    },

    /// A resource settled.
    ResourceSettled {
        /// Run identifier.
        run_id: String,
        /// Resource name.
        resource: String,
        /// Final state.
        state: ResourceState,
        /// Failure description for failed or cancelled resources.
        error: Option<String>,
    },

    /// Cancellation was requested.
    CancelRequested {
        /// Run identifier.
        run_id: String,
    },

    /// An apply run has finished.
    ApplyFinished {
        /// Run identifier.
        run_id: String,
        /// Resources that resolved.
        resolved: usize,
        /// Resources that failed.
        failed: usize,
        /// Resources that were cancelled.
        cancelled: usize,
    },

    /// A resource was deleted.
    ResourceDeleted {
        /// Resource name.
        resource: String,
    },
}

/// Receives engine events.
///
/// `notify` is called from engine tasks and must not block.
pub trait EventNotifier: Send + Sync {
    /// Called when an event occurs.
    fn notify(&self, event: EngineEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl EventNotifier for NoopNotifier {
    fn notify(&self, _event: EngineEvent) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl EventNotifier for TracingNotifier {
    fn notify(&self, event: EngineEvent) {
        match &event {
            EngineEvent::ResourceSettled {
                resource,
                state,
                error: Some(error),
                ..
            } => tracing::warn!(%resource, %state, %error, "resource settled"),
            EngineEvent::ResourceSettled {
                resource, state, ..
            } => tracing::info!(%resource, %state, "resource settled"),
            other => tracing::debug!(event = ?other, "engine event"),
        }
    }
}

/// Forwards events to an unbounded channel.
///
/// Send errors are ignored; the receiver may have been dropped.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelNotifier {
    /// Creates a notifier sending into `sender`.
    pub const fn new(sender: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { sender }
    }

    /// Creates a notifier together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl EventNotifier for ChannelNotifier {
    fn notify(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}
