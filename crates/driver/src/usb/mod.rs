//! USB device lifecycle
//!
//! This module implements the lifecycle core of the driver:
//! - Per-device state with present/open flags and an owner count
//! - The registry that makes devices discoverable by id
//! - The controller handling attach, open, close and detach
//! - The id table deciding which devices to bind
//! - The bus-wide notifier and the transport dispatch thread
//!
//! Attach and detach notifications arrive on the dispatch thread; open,
//! close and data calls come from client threads. All of them may run
//! concurrently.

pub mod controller;
#[cfg(feature = "libusb")]
pub mod hotplug;
pub mod id_table;
pub mod notifier;
pub mod registry;
pub mod state;
pub mod worker;

// Re-export public types
pub use controller::LifecycleController;
pub use id_table::{DeviceMatch, IdTable};
pub use notifier::{BusAction, BusNotifier, BusObserver, LoggingObserver, NotifyOutcome};
pub use registry::Registry;
pub use state::DeviceState;
pub use worker::{DispatchStats, EventApplier, TransportDispatcher, spawn_dispatcher};
