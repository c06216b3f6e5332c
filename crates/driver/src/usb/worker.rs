//! Transport dispatch thread
//!
//! Drains the transport bridge on a dedicated thread and applies each
//! notification to the lifecycle controller in arrival order, so attach and
//! detach for a given device always come from a single call path. Every
//! device and bus notification is also delivered to the bus notifier.

use crate::usb::controller::LifecycleController;
use crate::usb::notifier::{BusAction, BusNotifier};
use api::{AttachError, DeviceId, DeviceInfo};
use common::{Transport, TransportEvent, TransportReceiver};
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters reported when the dispatch loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub attached: usize,
    pub refused: usize,
    pub detached: usize,
    pub bus_events: usize,
}

/// Applies transport notifications to the controller and notifier
pub struct EventApplier<T: Transport> {
    controller: Arc<LifecycleController<T>>,
    notifier: Arc<BusNotifier>,
    stats: DispatchStats,
}

impl<T: Transport> EventApplier<T> {
    pub fn new(controller: Arc<LifecycleController<T>>, notifier: Arc<BusNotifier>) -> Self {
        Self {
            controller,
            notifier,
            stats: DispatchStats::default(),
        }
    }

    /// Apply one notification; `Break` on shutdown
    pub fn apply(&mut self, event: TransportEvent<T>) -> ControlFlow<()> {
        match event {
            TransportEvent::Attached {
                id,
                info,
                transport,
            } => {
                if let Err(e) = self.attach(id, info, transport) {
                    debug!("Attach of device {} refused: {}", id, e);
                }
            }
            TransportEvent::Detached { id } => {
                self.notifier.notify(BusAction::DeviceRemove(id));
                self.controller.on_detach(id);
                self.stats.detached += 1;
            }
            TransportEvent::BusAdded { bus } => {
                self.notifier.notify(BusAction::BusAdd(bus));
                self.stats.bus_events += 1;
            }
            TransportEvent::BusRemoved { bus } => {
                self.notifier.notify(BusAction::BusRemove(bus));
                self.stats.bus_events += 1;
            }
            TransportEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Apply an attach notification, returning the controller's verdict
    pub fn attach(
        &mut self,
        id: DeviceId,
        info: DeviceInfo,
        transport: T,
    ) -> Result<(), AttachError> {
        self.notifier.notify(BusAction::DeviceAdd(id));
        let result = self.controller.on_attach(id, info, transport);
        if result.is_ok() {
            self.stats.attached += 1;
        } else {
            self.stats.refused += 1;
        }
        result
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn controller(&self) -> &Arc<LifecycleController<T>> {
        &self.controller
    }
}

/// Dispatch loop bound to one transport bridge
pub struct TransportDispatcher<T: Transport> {
    applier: EventApplier<T>,
    receiver: TransportReceiver<T>,
}

impl<T: Transport> TransportDispatcher<T> {
    pub fn new(applier: EventApplier<T>, receiver: TransportReceiver<T>) -> Self {
        Self { applier, receiver }
    }

    /// Run until `Shutdown` arrives or every sender is gone
    pub fn run(mut self) -> DispatchStats {
        info!("Transport dispatcher started");

        loop {
            let event = match self.receiver.recv_blocking() {
                Ok(event) => event,
                Err(e) => {
                    debug!("Transport bridge closed: {}", e);
                    break;
                }
            };

            // A panicking observer must not take the dispatch path down.
            let flow = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.applier.apply(event)
            }));

            match flow {
                Ok(ControlFlow::Break(())) => {
                    info!("Transport dispatcher shutting down");
                    break;
                }
                Ok(ControlFlow::Continue(())) => {}
                Err(e) => error!("Panic while dispatching transport event: {:?}", e),
            }
        }

        let stats = self.applier.stats();
        info!("Transport dispatcher stopped: {:?}", stats);
        stats
    }
}

/// Spawn the dispatch loop on its own thread
pub fn spawn_dispatcher<T: Transport>(
    dispatcher: TransportDispatcher<T>,
) -> std::io::Result<std::thread::JoinHandle<DispatchStats>> {
    std::thread::Builder::new()
        .name("transport-dispatch".to_string())
        .spawn(move || dispatcher.run())
        .inspect_err(|e| warn!("Failed to spawn transport dispatcher: {}", e))
}
