//! Device lifecycle controller
//!
//! Orchestrates attach, open, close and detach for every device the
//! transport reports. The controller's own reference is taken at attach and
//! dropped at detach; each open session holds one more. Whichever of close
//! or detach drops the last reference releases the transport handle.
//!
//! Detach never waits for sessions. It makes the device undiscoverable and
//! drops the registration reference straight away; a session that is still
//! open keeps the object alive, sees `NoSuchDevice` on every data call, and
//! can still close normally.

use crate::config::DriverConfig;
use crate::usb::id_table::IdTable;
use crate::usb::registry::Registry;
use crate::usb::state::DeviceState;
use api::{
    AttachError, CloseError, DeviceId, DeviceInfo, DeviceStatus, OpenError, SessionHandle,
    TransferError,
};
use common::{DeviceEvent, EventPublisher, Release, Transport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, error, info, trace, warn};

/// Default device node prefix
pub const DEFAULT_CLASS_NAME: &str = "usb_lifecycle_class";

/// Default registry capacity
pub const DEFAULT_MAX_DEVICES: usize = 16;

/// Lifecycle controller for one driver instance
pub struct LifecycleController<T: Transport> {
    registry: Registry<T>,
    /// Open sessions: SessionHandle -> device the session holds a reference on
    sessions: Mutex<HashMap<SessionHandle, Arc<DeviceState<T>>>>,
    next_handle: AtomicU64,
    id_table: IdTable,
    class_name: String,
    events: Option<EventPublisher>,
    destroyed: AtomicUsize,
}

impl<T: Transport> LifecycleController<T> {
    /// Create a controller with an explicit id table and capacity
    pub fn new(id_table: IdTable, max_devices: usize, class_name: impl Into<String>) -> Self {
        Self {
            registry: Registry::new(max_devices),
            sessions: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            id_table,
            class_name: class_name.into(),
            events: None,
            destroyed: AtomicUsize::new(0),
        }
    }

    /// Create a controller from the driver configuration
    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(
            IdTable::new(config.devices.id_table.clone()),
            config.devices.max_devices,
            config.driver.class_name.clone(),
        )
    }

    /// Publish lifecycle events on `publisher`
    pub fn with_events(mut self, publisher: EventPublisher) -> Self {
        self.events = Some(publisher);
        self
    }

    /// Handle an attach notification from the transport
    ///
    /// Constructs a fresh device state and registers it. If registration
    /// fails the construction reference is released again, which frees the
    /// transport handle, and the device stays unregistered.
    pub fn on_attach(&self, id: DeviceId, info: DeviceInfo, transport: T) -> Result<(), AttachError> {
        debug!(
            "Probe device {}: vid={:#06x}, pid={:#06x}, bcd={:#06x}, class={:#04x}/{}/{}, interface={:?}",
            id,
            info.vendor_id,
            info.product_id,
            info.bcd_device,
            info.class,
            info.subclass,
            info.protocol,
            info.interface
        );

        if !self.id_table.matches(&info) {
            debug!("Device {} not in id table, ignoring", id);
            let error = AttachError::Unsupported(id);
            self.publish(DeviceEvent::AttachRefused {
                id,
                error: error.clone(),
            });
            return Err(error);
        }

        let node_name = format!("{}{}", self.class_name, id);
        let state = Arc::new(DeviceState::new(id, info, node_name, transport));

        if let Err(error) = self.registry.register(&state) {
            warn!("Not able to register device {}: {}", id, error);
            self.publish(DeviceEvent::AttachRefused {
                id,
                error: error.clone(),
            });
            self.discard(&state);
            return Err(error);
        }

        info!("USB device {} now attached to /dev/{}", id, state.node_name());
        self.publish(DeviceEvent::Attached {
            id,
            node_name: state.node_name().to_string(),
        });
        Ok(())
    }

    /// Open a session on a device
    ///
    /// Fails immediately with `Busy` if another session holds it.
    pub fn open(&self, id: DeviceId) -> Result<SessionHandle, OpenError> {
        let state = self.registry.claim(id).inspect_err(|e| {
            debug!("Open of device {} refused: {}", id, e);
        })?;

        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.sessions.lock().insert(handle, state);

        info!("Session {} opened device {}", handle, id);
        self.publish(DeviceEvent::Opened { id, handle });
        Ok(handle)
    }

    /// Close a session, dropping its reference
    ///
    /// Unknown or already closed handles are rejected without touching any
    /// device state.
    pub fn close(&self, handle: SessionHandle) -> Result<(), CloseError> {
        let state = self.sessions.lock().remove(&handle).ok_or_else(|| {
            debug!("Close of unknown session {}", handle);
            CloseError::InvalidHandle
        })?;

        self.registry.unclaim(&state);
        let id = state.id();
        info!("Session {} closed device {}", handle, id);
        self.publish(DeviceEvent::Closed { id, handle });
        self.release(&state);
        Ok(())
    }

    /// Handle a detach notification from the transport
    ///
    /// Never blocks and never fails; unknown ids are ignored.
    pub fn on_detach(&self, id: DeviceId) {
        let Some(state) = self.registry.unregister(id) else {
            debug!("Detach of unknown device {}, ignoring", id);
            return;
        };

        info!("USB device {} ({}) is now disconnected", id, state.node_name());
        self.publish(DeviceEvent::Detached { id });
        self.release(&state);
    }

    /// Detach every registered device (driver unload)
    pub fn detach_all(&self) -> usize {
        let ids = self.registry.ids();
        for id in &ids {
            self.on_detach(*id);
        }
        ids.len()
    }

    /// Read from the device behind `handle`
    pub fn read(&self, handle: SessionHandle, buf: &mut [u8]) -> Result<usize, TransferError> {
        let state = self.live_session(handle)?;
        trace!("Read {} bytes from device {}", buf.len(), state.id());
        state
            .with_transport(|transport| transport.read(buf))
            .unwrap_or(Err(TransferError::NoSuchDevice))
    }

    /// Write to the device behind `handle`
    pub fn write(&self, handle: SessionHandle, buf: &[u8]) -> Result<usize, TransferError> {
        let state = self.live_session(handle)?;
        trace!("Write {} bytes to device {}", buf.len(), state.id());
        state
            .with_transport(|transport| transport.write(buf))
            .unwrap_or(Err(TransferError::NoSuchDevice))
    }

    /// Status of the device currently registered under `id`
    pub fn status(&self, id: DeviceId) -> Option<DeviceStatus> {
        self.registry.get(id).map(|state| state.status())
    }

    /// Status of the device a session holds, registered or not
    pub fn session_status(&self, handle: SessionHandle) -> Option<DeviceStatus> {
        self.sessions.lock().get(&handle).map(|state| state.status())
    }

    /// Status of every registered device, by ascending id
    pub fn list_devices(&self) -> Vec<DeviceStatus> {
        self.registry
            .ids()
            .into_iter()
            .filter_map(|id| self.status(id))
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Device objects destroyed since the controller was created
    pub fn destroyed_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn id_table(&self) -> &IdTable {
        &self.id_table
    }

    pub fn registry(&self) -> &Registry<T> {
        &self.registry
    }

    fn live_session(&self, handle: SessionHandle) -> Result<Arc<DeviceState<T>>, TransferError> {
        let state = self
            .sessions
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(TransferError::InvalidHandle)?;

        if !state.is_present() {
            debug!("Session {} used after device {} was detached", handle, state.id());
            return Err(TransferError::NoSuchDevice);
        }
        Ok(state)
    }

    fn release(&self, state: &DeviceState<T>) {
        match state.release() {
            Ok(Release::Destroyed) => {
                self.destroyed.fetch_add(1, Ordering::SeqCst);
                info!("Device {} destroyed", state.id());
                self.publish(DeviceEvent::Destroyed { id: state.id() });
            }
            Ok(Release::Live(remaining)) => {
                trace!("Device {} has {} references left", state.id(), remaining);
            }
            Err(e) => error!("Device {}: {}", state.id(), e),
        }
    }

    // Teardown of a construction that never became discoverable. No
    // `Destroyed` event: the id may belong to a different, live device.
    fn discard(&self, state: &DeviceState<T>) {
        match state.release() {
            Ok(Release::Destroyed) => {
                self.destroyed.fetch_add(1, Ordering::SeqCst);
                debug!("Unregistered construction of device {} released", state.id());
            }
            Ok(Release::Live(remaining)) => {
                error!(
                    "Unregistered device {} still has {} references",
                    state.id(),
                    remaining
                );
            }
            Err(e) => error!("Device {}: {}", state.id(), e),
        }
    }

    fn publish(&self, event: DeviceEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}
