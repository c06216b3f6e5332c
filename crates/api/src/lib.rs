//! Shared types for usb-lifecycle
//!
//! This crate defines the identifiers, descriptor summaries and error enums
//! exchanged between the transport layer, the lifecycle controller and the
//! client sessions that open devices.
//!
//! # Example
//!
//! ```
//! use api::{DeviceId, LifecycleState, OpenError};
//!
//! let id = DeviceId(7);
//! assert_eq!(id.to_string(), "7");
//! assert_eq!(LifecycleState::from_flags(true, false), LifecycleState::Attached);
//! assert_eq!(OpenError::NoSuchDevice.to_string(), "No such device");
//! ```

pub mod error;
pub mod types;

pub use error::{AttachError, CloseError, OpenError, TransferError};
pub use types::{
    DeviceId, DeviceInfo, DeviceStatus, InterfaceClass, LifecycleState, SessionHandle,
};
