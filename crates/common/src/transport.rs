//! Transport handle abstraction
//!
//! A transport handle is whatever the bus layer hands over at attach time
//! (a `rusb::Device`, a virtual endpoint, a test double). The device state
//! owns it exclusively and drops it exactly once, when the last reference to
//! the device is released. Dropping the handle is the release.

use api::TransferError;

/// Data path of an attached device
///
/// Byte-stream mechanics belong to the transport; the lifecycle core only
/// decides whether a call may reach it. Both directions default to
/// `NotSupported`.
pub trait Transport: Send + Sync + 'static {
    /// Read into `buf`, returning the number of bytes transferred
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        let _ = buf;
        Err(TransferError::NotSupported)
    }

    /// Write from `buf`, returning the number of bytes transferred
    fn write(&self, buf: &[u8]) -> Result<usize, TransferError> {
        let _ = buf;
        Err(TransferError::NotSupported)
    }
}

/// Handle with no data path
impl Transport for () {}
