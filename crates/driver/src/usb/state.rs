//! Per-device state
//!
//! One `DeviceState` exists per physical attach cycle. It owns the transport
//! handle and carries the present/open flags and the owner count. The flags
//! are only written by the registry while its lock is held, so readers never
//! see a device that is present but already unregistered.

use api::{DeviceId, DeviceInfo, DeviceStatus, LifecycleState};
use common::{RefCounter, Release, Transport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// State of one attached device
pub struct DeviceState<T: Transport> {
    id: DeviceId,
    info: DeviceInfo,
    node_name: String,
    present: AtomicBool,
    open: AtomicBool,
    refs: RefCounter,
    /// `None` once the last reference has been released
    transport: Mutex<Option<T>>,
}

impl<T: Transport> DeviceState<T> {
    /// Construct a fresh state holding the creator's reference
    ///
    /// The device starts out not present; registration flips the flag.
    pub fn new(id: DeviceId, info: DeviceInfo, node_name: String, transport: T) -> Self {
        Self {
            id,
            info,
            node_name,
            present: AtomicBool::new(false),
            open: AtomicBool::new(false),
            refs: RefCounter::new(),
            transport: Mutex::new(Some(transport)),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn refcount(&self) -> usize {
        self.refs.count()
    }

    /// Whether the transport handle has been released
    pub fn is_destroyed(&self) -> bool {
        self.refs.is_destroyed()
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_flags(self.is_present(), self.is_open())
    }

    pub fn status(&self) -> DeviceStatus {
        let present = self.is_present();
        let open = self.is_open();
        DeviceStatus {
            id: self.id,
            state: LifecycleState::from_flags(present, open),
            present,
            open,
            refcount: self.refcount(),
            node_name: self.node_name.clone(),
        }
    }

    // Registry lock must be held by the caller.
    pub(crate) fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::Release);
    }

    // Registry lock must be held by the caller.
    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }

    pub(crate) fn acquire(&self) -> bool {
        self.refs.acquire()
    }

    /// Drop one reference; the last one releases the transport handle
    pub(crate) fn release(&self) -> common::Result<Release> {
        self.refs.release(|| self.destroy())
    }

    /// Run `f` against the transport, or `None` if it was already released
    pub fn with_transport<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.transport.lock().as_ref().map(f)
    }

    fn destroy(&self) {
        let transport = self.transport.lock().take();
        debug!(
            "Releasing transport handle of device {} ({})",
            self.id, self.node_name
        );
        drop(transport);
    }
}

impl<T: Transport> std::fmt::Debug for DeviceState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceState")
            .field("id", &self.id)
            .field("node_name", &self.node_name)
            .field("present", &self.is_present())
            .field("open", &self.is_open())
            .field("refcount", &self.refcount())
            .finish()
    }
}
