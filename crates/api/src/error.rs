//! Lifecycle error types
//!
//! Every error here is recoverable from the caller's point of view: none of
//! them leaves shared device state altered.

use crate::types::DeviceId;
use thiserror::Error;

/// Attach (probe) failure reported back to the transport layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttachError {
    /// Resources for the device state or its registry slot were exhausted
    #[error("Out of memory while attaching device")]
    OutOfMemory,

    /// The id is already registered to a live device
    #[error("Device {0} is already registered")]
    AlreadyRegistered(DeviceId),

    /// The device does not match the driver's id table
    #[error("Device {0} is not handled by this driver")]
    Unsupported(DeviceId),
}

/// Open failure
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum OpenError {
    /// Never attached, already detached, or no longer present
    #[error("No such device")]
    NoSuchDevice,

    /// Another session already holds the device open
    #[error("Device or resource busy")]
    Busy,
}

/// Close failure
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CloseError {
    /// The handle was never granted or has already been closed
    #[error("Invalid session handle")]
    InvalidHandle,
}

/// Data path failure for read/write
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The transport does not implement this direction
    #[error("Operation not supported")]
    NotSupported,

    /// The device was detached while the session was open
    #[error("No such device")]
    NoSuchDevice,

    /// The handle was never granted or has already been closed
    #[error("Invalid session handle")]
    InvalidHandle,

    /// Transport-level failure
    #[error("Transfer failed: {message}")]
    Io { message: String },
}
