//! Engine event streaming.
//!
//! Provides an async listener for following an apply or destroy run
//! programmatically.

use std::sync::Arc;

use cirrus_engine::events::{ChannelNotifier, EngineEvent, EventNotifier};
use tokio::sync::mpsc;

/// Receives the events of the runs it was attached to.
#[derive(Debug)]
pub struct EventListener {
    receiver: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EventListener {
    /// Creates a listener and the notifier that feeds it.
    pub fn channel() -> (Arc<dyn EventNotifier>, Self) {
        let (notifier, receiver) = ChannelNotifier::channel();
        (Arc::new(notifier), Self { receiver })
    }

    /// Waits for the next event; `None` once every notifier is dropped.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        self.receiver.recv().await
    }

    /// Returns every event received so far without waiting.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_the_listener() {
        let (notifier, mut listener) = EventListener::channel();
        notifier.notify(EngineEvent::ResourceDeleted {
            resource: "vpc".into(),
        });
        assert_eq!(
            listener.next().await,
            Some(EngineEvent::ResourceDeleted {
                resource: "vpc".into()
            })
        );
        drop(notifier);
        assert!(listener.drain().is_empty());
        assert_eq!(listener.next().await, None);
    }
}
