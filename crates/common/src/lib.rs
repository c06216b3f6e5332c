//! Common utilities for usb-lifecycle
//!
//! This crate provides the building blocks shared by the driver and its
//! tests: the atomic reference counter behind every device object, the
//! transport handle trait, the channel bridge carrying attach/detach
//! notifications, error handling, and logging setup.

pub mod channel;
pub mod error;
pub mod logging;
pub mod refcount;
pub mod test_utils;
pub mod transport;

pub use channel::{
    DeviceEvent, EventPublisher, EventSubscriber, TransportEvent, TransportReceiver,
    TransportSender, create_event_channel, create_transport_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use refcount::{RefCounter, Release};
pub use transport::Transport;
