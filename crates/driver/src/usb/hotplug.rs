//! libusb hot-plug source
//!
//! Bridges libusb hot-plug callbacks onto the transport bridge. The device
//! id is derived from the bus number and address, which libusb guarantees
//! unique among connected devices. Only compiled with the `libusb` feature.

use api::{DeviceId, DeviceInfo, InterfaceClass};
use common::{Transport, TransportEvent, TransportSender};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Transport handle holding a libusb device reference
///
/// Dropping it releases the reference taken when the device arrived.
pub struct UsbTransport {
    device: Device<Context>,
}

impl UsbTransport {
    pub fn device(&self) -> &Device<Context> {
        &self.device
    }
}

// Transfers are not implemented; both directions report NotSupported.
impl Transport for UsbTransport {}

/// Device id for a libusb device
pub fn device_id<T: UsbContext>(device: &Device<T>) -> DeviceId {
    DeviceId((u32::from(device.bus_number()) << 8) | u32::from(device.address()))
}

/// Descriptor summary for a libusb device
pub fn device_info<T: UsbContext>(device: &Device<T>) -> Result<DeviceInfo, rusb::Error> {
    let desc = device.device_descriptor()?;
    let version = desc.device_version();

    let interface = device.active_config_descriptor().ok().and_then(|config| {
        config
            .interfaces()
            .next()
            .and_then(|iface| iface.descriptors().next())
            .map(|alt| InterfaceClass {
                class: alt.class_code(),
                subclass: alt.sub_class_code(),
                protocol: alt.protocol_code(),
            })
    });

    Ok(DeviceInfo {
        vendor_id: desc.vendor_id(),
        product_id: desc.product_id(),
        bcd_device: (u16::from(version.major()) << 8)
            | (u16::from(version.minor()) << 4)
            | u16::from(version.sub_minor()),
        class: desc.class_code(),
        subclass: desc.sub_class_code(),
        protocol: desc.protocol_code(),
        bus_number: device.bus_number(),
        device_address: device.address(),
        interface,
    })
}

struct HotplugSource {
    sender: TransportSender<UsbTransport>,
}

impl Hotplug<Context> for HotplugSource {
    fn device_arrived(&mut self, device: Device<Context>) {
        let id = device_id(&device);
        let info = match device_info(&device) {
            Ok(info) => info,
            Err(e) => {
                warn!("Unable to read descriptor of device {}: {}", id, e);
                return;
            }
        };

        debug!("Hot-plug: device {} arrived", id);
        let event = TransportEvent::Attached {
            id,
            info,
            transport: UsbTransport { device },
        };
        if let Err(e) = self.sender.send_blocking(event) {
            warn!("Failed to forward arrival of device {}: {}", id, e);
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        let id = device_id(&device);
        debug!("Hot-plug: device {} left", id);
        if let Err(e) = self.sender.send_blocking(TransportEvent::Detached { id }) {
            warn!("Failed to forward departure of device {}: {}", id, e);
        }
    }
}

/// Running hot-plug source; stop it with [`HotplugPump::stop`]
pub struct HotplugPump {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    _registration: Registration<Context>,
}

impl HotplugPump {
    /// Stop pumping libusb events and join the pump thread
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Hot-plug pump thread panicked");
        }
    }
}

/// Register for hot-plug events and start pumping libusb events
///
/// Devices already connected are reported as arrivals first.
pub fn start_hotplug(sender: TransportSender<UsbTransport>) -> anyhow::Result<HotplugPump> {
    if !rusb::has_hotplug() {
        anyhow::bail!("libusb on this platform does not support hot-plug");
    }

    let context = Context::new()?;
    let registration = HotplugBuilder::new()
        .enumerate(true)
        .register(&context, Box::new(HotplugSource { sender }))?;

    let stop = Arc::new(AtomicBool::new(false));
    let pump_stop = Arc::clone(&stop);
    let thread = std::thread::Builder::new()
        .name("usb-hotplug".to_string())
        .spawn(move || {
            while !pump_stop.load(Ordering::Acquire) {
                match context.handle_events(Some(Duration::from_millis(100))) {
                    Ok(()) | Err(rusb::Error::Interrupted) => {}
                    Err(e) => {
                        warn!("Error handling USB events: {}", e);
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            }
        })?;

    info!("Hot-plug source registered");
    Ok(HotplugPump {
        stop,
        thread: Some(thread),
        _registration: registration,
    })
}
