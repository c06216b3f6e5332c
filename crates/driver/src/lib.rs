//! usb-lifecycle driver
//!
//! Reference-counted lifecycle management for hot-pluggable USB devices
//! shared between the transport layer, which reports attach and detach, and
//! client sessions, which open, use and close the device. A device can be
//! torn down at any moment by a physical disconnect while sessions are
//! opening, holding or releasing it.

pub mod config;
pub mod replay;
pub mod usb;

pub use config::DriverConfig;
pub use usb::LifecycleController;
