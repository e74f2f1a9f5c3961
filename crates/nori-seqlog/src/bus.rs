//! Change notification bus.
//!
//! One bus is shared by every handle created against a registry, so a
//! subscriber sees pushes, changes and clears from all of them.

use crate::error::Error;
use crate::scalar::Scalar;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Notification delivered to bus subscribers.
#[derive(Debug, Clone)]
pub enum LogEvent {
    /// A value was appended on some handle.
    Push(Scalar),
    /// A backing file was re-read after a filesystem notification.
    Change { path: PathBuf },
    /// A handle was cleared. `path` is absent for unbound handles.
    Clear { path: Option<PathBuf> },
    /// A watch or background flush failed.
    Error { path: PathBuf, error: Arc<Error> },
}

impl LogEvent {
    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LogEvent::Push(_) => "push",
            LogEvent::Change { .. } => "change",
            LogEvent::Clear { .. } => "clear",
            LogEvent::Error { .. } => "error",
        }
    }
}

/// Publish/subscribe channel for [`LogEvent`]s.
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LogEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: LogEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.clone().subscribe();

        bus.publish(LogEvent::Push(Scalar::Int(42)));
        bus.publish(LogEvent::Clear { path: None });

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                LogEvent::Push(v) => assert_eq!(v, Scalar::Int(42)),
                other => panic!("unexpected event {:?}", other),
            }
            assert_eq!(rx.recv().await.unwrap().kind(), "clear");
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(LogEvent::Push(Scalar::Int(1)));
        assert_eq!(bus.subscriber_count(), 0);

        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
