//! Channel bridge between the transport layer and the dispatch thread
//!
//! The transport (hot-plug callbacks, bus enumeration) pushes attach/detach
//! notifications into a bounded channel; a single dispatch thread drains it
//! and applies each notification to the lifecycle controller in order.
//! Lifecycle events flow the other way on a second channel for observers.

use api::{AttachError, DeviceId, DeviceInfo, SessionHandle};
use async_channel::{Receiver, Sender, TrySendError, bounded};

/// Notifications from the transport layer
pub enum TransportEvent<T> {
    /// A device was probed and handed over together with its transport handle
    Attached {
        id: DeviceId,
        info: DeviceInfo,
        transport: T,
    },

    /// A device was physically disconnected
    Detached { id: DeviceId },

    /// A bus (host controller) came up
    BusAdded { bus: u8 },

    /// A bus went away
    BusRemoved { bus: u8 },

    /// Stop the dispatch thread
    Shutdown,
}

impl<T> std::fmt::Debug for TransportEvent<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::Attached { id, info, .. } => f
                .debug_struct("Attached")
                .field("id", id)
                .field("info", info)
                .finish_non_exhaustive(),
            TransportEvent::Detached { id } => f.debug_struct("Detached").field("id", id).finish(),
            TransportEvent::BusAdded { bus } => f.debug_struct("BusAdded").field("bus", bus).finish(),
            TransportEvent::BusRemoved { bus } => {
                f.debug_struct("BusRemoved").field("bus", bus).finish()
            }
            TransportEvent::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Lifecycle events published by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Device registered and discoverable
    Attached { id: DeviceId, node_name: String },

    /// Attach was refused; nothing stays registered
    AttachRefused { id: DeviceId, error: AttachError },

    /// A session opened the device
    Opened { id: DeviceId, handle: SessionHandle },

    /// A session closed the device
    Closed { id: DeviceId, handle: SessionHandle },

    /// Device no longer discoverable
    Detached { id: DeviceId },

    /// Last reference to a registered device released; transport handle freed
    Destroyed { id: DeviceId },
}

/// Transport side of the bridge (cloneable, usable from blocking and async code)
pub struct TransportSender<T> {
    tx: Sender<TransportEvent<T>>,
}

impl<T> Clone for TransportSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> TransportSender<T> {
    /// Send a notification from a blocking context (hot-plug callback thread)
    pub fn send_blocking(&self, event: TransportEvent<T>) -> crate::Result<()> {
        self.tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a notification from async code
    pub async fn send(&self, event: TransportEvent<T>) -> crate::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Ask the dispatch thread to stop after draining earlier events
    pub fn shutdown(&self) -> crate::Result<()> {
        self.send_blocking(TransportEvent::Shutdown)
    }
}

/// Dispatch side of the bridge
pub struct TransportReceiver<T> {
    rx: Receiver<TransportEvent<T>>,
}

impl<T> TransportReceiver<T> {
    /// Receive the next notification (blocking)
    pub fn recv_blocking(&self) -> crate::Result<TransportEvent<T>> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive without blocking
    pub fn try_recv(&self) -> Option<TransportEvent<T>> {
        self.rx.try_recv().ok()
    }
}

/// Create the transport bridge with the given capacity
///
/// Returns (sender for the transport layer, receiver for the dispatch thread)
pub fn create_transport_bridge<T>(capacity: usize) -> (TransportSender<T>, TransportReceiver<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    (TransportSender { tx }, TransportReceiver { rx })
}

/// Publisher half for lifecycle events
///
/// Publishing never blocks: the detach path must not stall on a slow
/// observer, so a full channel drops the event.
#[derive(Clone)]
pub struct EventPublisher {
    tx: Sender<DeviceEvent>,
}

impl EventPublisher {
    /// Publish an event, returning `false` if it was dropped
    pub fn publish(&self, event: DeviceEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!("Event channel full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Subscriber half for lifecycle events
pub struct EventSubscriber {
    rx: Receiver<DeviceEvent>,
}

impl EventSubscriber {
    /// Receive the next lifecycle event
    pub async fn recv(&self) -> crate::Result<DeviceEvent> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Drain whatever is queued right now
    pub fn drain(&self) -> Vec<DeviceEvent> {
        std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
    }
}

/// Create the lifecycle event channel
pub fn create_event_channel(capacity: usize) -> (EventPublisher, EventSubscriber) {
    let (tx, rx) = bounded(capacity.max(1));
    (EventPublisher { tx }, EventSubscriber { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transport_bridge() {
        let (sender, receiver) = create_transport_bridge::<()>(4);

        // Spawn a thread to simulate the dispatch thread
        let handle = std::thread::spawn(move || {
            let event = receiver.recv_blocking().unwrap();
            matches!(event, TransportEvent::Detached { id } if id == DeviceId(3))
        });

        sender
            .send(TransportEvent::Detached { id: DeviceId(3) })
            .await
            .unwrap();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_publisher_drops_when_full() {
        let (publisher, subscriber) = create_event_channel(1);

        assert!(publisher.publish(DeviceEvent::Detached { id: DeviceId(1) }));
        assert!(!publisher.publish(DeviceEvent::Detached { id: DeviceId(2) }));

        assert_eq!(
            subscriber.drain(),
            vec![DeviceEvent::Detached { id: DeviceId(1) }]
        );
    }

    #[test]
    fn test_publish_after_subscriber_dropped() {
        let (publisher, subscriber) = create_event_channel(4);
        drop(subscriber);
        assert!(!publisher.publish(DeviceEvent::Destroyed { id: DeviceId(1) }));
    }
}
