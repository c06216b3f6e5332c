//! Device and session type definitions
//!
//! This module defines the identifiers and descriptor summaries shared by the
//! transport layer, the lifecycle controller and client sessions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque device identifier (minor number)
///
/// Supplied by the transport layer when a device attaches. The identifier
/// keys the registry; a re-attach under the same id always produces a fresh
/// device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session handle returned by a successful open
///
/// Represents one live client session. Handles are never reused within a
/// process, so a stale handle can never alias a later session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Device descriptor summary reported by the transport at attach time
///
/// Only the fields the id table matches on are carried.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Device release number (bcdDevice)
    pub bcd_device: u16,
    /// USB device class
    pub class: u8,
    /// USB device subclass
    pub subclass: u8,
    /// USB device protocol
    pub protocol: u8,
    /// Bus number the device sits on
    pub bus_number: u8,
    /// Device address on the bus
    pub device_address: u8,
    /// Class triple of the bound interface, if the transport reports one
    pub interface: Option<InterfaceClass>,
}

/// Interface class triple (bInterfaceClass, bInterfaceSubClass, bInterfaceProtocol)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceClass {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// Lifecycle state of a device object as observed from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Present and discoverable, no session open
    Attached,
    /// Present with exactly one open session
    Opened,
    /// No longer present; the object lives only as long as a session holds it
    Detached,
}

impl LifecycleState {
    /// Derive the state from the present/open flags
    pub fn from_flags(present: bool, open: bool) -> Self {
        match (present, open) {
            (true, true) => LifecycleState::Opened,
            (true, false) => LifecycleState::Attached,
            (false, _) => LifecycleState::Detached,
        }
    }
}

/// Point-in-time snapshot of a device object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub id: DeviceId,
    pub state: LifecycleState,
    pub present: bool,
    pub open: bool,
    /// Live owners: one for the registration plus one per open session
    pub refcount: usize,
    /// Name of the device node, e.g. `usb_lifecycle_class7`
    pub node_name: String,
}
