//! Test utilities for usb-lifecycle
//!
//! Provides mock transports and descriptor builders for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{DropCounter, MockTransport, create_mock_device_info};
//!
//! let counter = DropCounter::new();
//! let transport = MockTransport::new(&counter);
//! drop(transport);
//! assert_eq!(counter.count(), 1);
//!
//! let info = create_mock_device_info(0x1234, 0x5678);
//! assert_eq!(info.vendor_id, 0x1234);
//! ```

use crate::transport::Transport;
use api::{DeviceInfo, InterfaceClass, TransferError};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared counter of released transport handles
///
/// Clones share the same count, so a test can keep one and hand the others
/// to transports that are moved into the controller.
#[derive(Debug, Clone, Default)]
pub struct DropCounter {
    drops: Arc<AtomicUsize>,
}

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles released so far
    pub fn count(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

/// Transport double that records its own release
///
/// Reads fill the buffer with a fixed byte; writes accept everything.
#[derive(Debug)]
pub struct MockTransport {
    counter: DropCounter,
    fill: u8,
}

impl MockTransport {
    pub fn new(counter: &DropCounter) -> Self {
        Self {
            counter: counter.clone(),
            fill: 0xA5,
        }
    }

    /// Byte returned by every read
    pub fn fill(&self) -> u8 {
        self.fill
    }
}

impl Transport for MockTransport {
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        buf.fill(self.fill);
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8]) -> Result<usize, TransferError> {
        Ok(buf.len())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.counter.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Transport double with no data path that still records its release
#[derive(Debug)]
pub struct SilentTransport {
    counter: DropCounter,
}

impl SilentTransport {
    pub fn new(counter: &DropCounter) -> Self {
        Self {
            counter: counter.clone(),
        }
    }
}

impl Transport for SilentTransport {}

impl Drop for SilentTransport {
    fn drop(&mut self) {
        self.counter.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Create a mock DeviceInfo for a vendor-specific device
pub fn create_mock_device_info(vendor_id: u16, product_id: u16) -> DeviceInfo {
    DeviceInfo {
        vendor_id,
        product_id,
        bcd_device: 0x0100,
        class: 0xFF,
        subclass: 0x00,
        protocol: 0x00,
        bus_number: 1,
        device_address: 2,
        interface: None,
    }
}

/// Create a mock USB mass storage device (SCSI, bulk-only)
pub fn create_mock_mass_storage_device() -> DeviceInfo {
    DeviceInfo {
        class: 0x08,
        subclass: 0x06,
        protocol: 0x50,
        ..create_mock_device_info(0x0781, 0x5567)
    }
}

/// Create a mock HID keyboard, declared at interface level
pub fn create_mock_hid_keyboard() -> DeviceInfo {
    DeviceInfo {
        class: 0x00,
        interface: Some(InterfaceClass {
            class: 0x03,
            subclass: 0x01,
            protocol: 0x01,
        }),
        ..create_mock_device_info(0x046d, 0xc31c)
    }
}

/// Run a future with a timeout
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
