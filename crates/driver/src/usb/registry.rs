//! Device registry
//!
//! Maps device ids to their current `DeviceState`. One lock guards both the
//! map and every present/open flag transition, and a lookup that grants a
//! session takes its reference while still holding that lock. A concurrent
//! unregister therefore either happens entirely before the lookup (the open
//! sees no device) or entirely after it (the session's reference keeps the
//! object alive). An open can never revive an object whose count already
//! reached zero.

use crate::usb::state::DeviceState;
use api::{AttachError, DeviceId, OpenError};
use common::Transport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Registry of attached devices
pub struct Registry<T: Transport> {
    devices: Mutex<HashMap<DeviceId, Arc<DeviceState<T>>>>,
    capacity: usize,
}

impl<T: Transport> Registry<T> {
    /// Create a registry holding at most `capacity` devices
    pub fn new(capacity: usize) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Make a freshly constructed device discoverable
    ///
    /// On success the device is marked present. On failure the registry is
    /// unchanged and the caller still owns the construction reference.
    pub fn register(&self, state: &Arc<DeviceState<T>>) -> Result<(), AttachError> {
        let id = state.id();
        let mut devices = self.devices.lock();

        if devices.contains_key(&id) {
            return Err(AttachError::AlreadyRegistered(id));
        }
        if devices.len() >= self.capacity {
            warn!(
                "Registry full ({} devices), refusing device {}",
                self.capacity, id
            );
            return Err(AttachError::OutOfMemory);
        }
        devices.try_reserve(1).map_err(|e| {
            error!("Unable to allocate registry slot for device {}: {}", id, e);
            AttachError::OutOfMemory
        })?;

        devices.insert(id, Arc::clone(state));
        state.set_present(true);
        Ok(())
    }

    /// Remove a device and mark it absent
    ///
    /// Returns the removed state so the caller can drop the registration
    /// reference outside the lock. Unknown ids return `None`.
    pub fn unregister(&self, id: DeviceId) -> Option<Arc<DeviceState<T>>> {
        let mut devices = self.devices.lock();
        let state = devices.remove(&id)?;
        state.set_present(false);
        state.set_open(false);
        Some(state)
    }

    /// Look up a device and grant it to a new session
    ///
    /// Takes a reference and sets the open flag under the registry lock.
    pub fn claim(&self, id: DeviceId) -> Result<Arc<DeviceState<T>>, OpenError> {
        let devices = self.devices.lock();
        let state = devices.get(&id).ok_or(OpenError::NoSuchDevice)?;

        if !state.is_present() {
            return Err(OpenError::NoSuchDevice);
        }
        if state.is_open() {
            debug!("Device {} already open", id);
            return Err(OpenError::Busy);
        }
        if !state.acquire() {
            // A registered device always holds the registration reference.
            error!("Registered device {} has no live references", id);
            return Err(OpenError::NoSuchDevice);
        }

        state.set_open(true);
        Ok(Arc::clone(state))
    }

    /// Clear the open flag when a session ends
    pub fn unclaim(&self, state: &DeviceState<T>) {
        let _devices = self.devices.lock();
        state.set_open(false);
    }

    /// Current state registered under `id`
    pub fn get(&self, id: DeviceId) -> Option<Arc<DeviceState<T>>> {
        self.devices.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.lock().contains_key(&id)
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.devices.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
