//! Bus-wide notification hook
//!
//! Observers register for add/remove notifications covering every device
//! and bus the transport reports, whether or not the driver binds to it.
//! The lifecycle controller does not depend on this; it only reacts to
//! attach/detach.

use api::DeviceId;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Bus-wide action reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAction {
    DeviceAdd(DeviceId),
    DeviceRemove(DeviceId),
    BusAdd(u8),
    BusRemove(u8),
}

/// Observer verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Continue with the next observer
    Ok,
    /// Do not call the remaining observers
    Stop,
}

/// Receiver of bus-wide notifications
pub trait BusObserver: Send + Sync {
    fn on_bus_event(&self, action: BusAction) -> NotifyOutcome;
}

/// Token returned by [`BusNotifier::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered observer chain
#[derive(Default)]
pub struct BusNotifier {
    observers: RwLock<Vec<(ObserverId, Arc<dyn BusObserver>)>>,
    next_id: AtomicU64,
}

impl BusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer to the chain
    pub fn register(&self, observer: Arc<dyn BusObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        debug!("Registered bus observer {:?}", id);
        id
    }

    /// Remove an observer; returns `false` if it was not registered
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        observers.len() != before
    }

    /// Deliver `action` down the chain, returning how many observers ran
    pub fn notify(&self, action: BusAction) -> usize {
        // Snapshot so observers may (un)register from inside the callback.
        let chain: Vec<Arc<dyn BusObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        let mut delivered = 0;
        for observer in chain {
            delivered += 1;
            if observer.on_bus_event(action) == NotifyOutcome::Stop {
                debug!("Bus notification {:?} stopped after {} observers", action, delivered);
                break;
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}

/// Observer that logs every notification
pub struct LoggingObserver;

impl BusObserver for LoggingObserver {
    fn on_bus_event(&self, action: BusAction) -> NotifyOutcome {
        match action {
            BusAction::DeviceAdd(id) => info!("USB device {} added", id),
            BusAction::DeviceRemove(id) => info!("USB device {} removed", id),
            BusAction::BusAdd(bus) => info!("USB bus {} added", bus),
            BusAction::BusRemove(bus) => info!("USB bus {} removed", bus),
        }
        NotifyOutcome::Ok
    }
}
