//! Device id table
//!
//! Decides which devices the driver binds to. Entries match on an exact
//! VID:PID pair, on the device class triple, or on the interface class
//! triple. An empty table accepts every device.

use api::DeviceInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

const USB_CLASS_HID: u8 = 0x03;
const USB_CLASS_MASS_STORAGE: u8 = 0x08;
const USB_CLASS_HUB: u8 = 0x09;

/// A single id table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum DeviceMatch {
    /// Exact vendor/product pair
    Device { vendor_id: u16, product_id: u16 },
    /// bDeviceClass / bDeviceSubClass / bDeviceProtocol
    DeviceClass { class: u8, subclass: u8, protocol: u8 },
    /// bInterfaceClass / bInterfaceSubClass / bInterfaceProtocol
    InterfaceClass { class: u8, subclass: u8, protocol: u8 },
}

impl DeviceMatch {
    pub fn matches(&self, info: &DeviceInfo) -> bool {
        match *self {
            DeviceMatch::Device {
                vendor_id,
                product_id,
            } => info.vendor_id == vendor_id && info.product_id == product_id,
            DeviceMatch::DeviceClass {
                class,
                subclass,
                protocol,
            } => info.class == class && info.subclass == subclass && info.protocol == protocol,
            DeviceMatch::InterfaceClass {
                class,
                subclass,
                protocol,
            } => info.interface.is_some_and(|iface| {
                iface.class == class && iface.subclass == subclass && iface.protocol == protocol
            }),
        }
    }
}

impl fmt::Display for DeviceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMatch::Device {
                vendor_id,
                product_id,
            } => write!(f, "device {:#06x}:{:#06x}", vendor_id, product_id),
            DeviceMatch::DeviceClass {
                class,
                subclass,
                protocol,
            } => write!(f, "device class {:#04x}/{}/{}", class, subclass, protocol),
            DeviceMatch::InterfaceClass {
                class,
                subclass,
                protocol,
            } => write!(f, "interface class {:#04x}/{}/{}", class, subclass, protocol),
        }
    }
}

/// Set of devices the driver binds to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTable {
    entries: Vec<DeviceMatch>,
}

impl IdTable {
    pub fn new(entries: Vec<DeviceMatch>) -> Self {
        Self { entries }
    }

    /// Table that binds to every device
    pub fn any() -> Self {
        Self::new(Vec::new())
    }

    /// Built-in entries: hubs, HID keyboards and mice, bulk-only mass
    /// storage, a Corsair Voyager Mini key and a Motorola Moto G3.
    pub fn default_entries() -> Vec<DeviceMatch> {
        vec![
            DeviceMatch::DeviceClass {
                class: USB_CLASS_HUB,
                subclass: 0,
                protocol: 0,
            },
            DeviceMatch::DeviceClass {
                class: USB_CLASS_HUB,
                subclass: 0,
                protocol: 1,
            },
            DeviceMatch::DeviceClass {
                class: USB_CLASS_HID,
                subclass: 1,
                protocol: 1,
            },
            DeviceMatch::DeviceClass {
                class: USB_CLASS_HID,
                subclass: 1,
                protocol: 2,
            },
            DeviceMatch::InterfaceClass {
                class: USB_CLASS_HID,
                subclass: 1,
                protocol: 1,
            },
            DeviceMatch::InterfaceClass {
                class: USB_CLASS_HID,
                subclass: 1,
                protocol: 2,
            },
            DeviceMatch::InterfaceClass {
                class: USB_CLASS_HID,
                subclass: 0,
                protocol: 0,
            },
            DeviceMatch::DeviceClass {
                class: USB_CLASS_MASS_STORAGE,
                subclass: 0x06,
                protocol: 0x50,
            },
            DeviceMatch::InterfaceClass {
                class: USB_CLASS_MASS_STORAGE,
                subclass: 0x06,
                protocol: 0x50,
            },
            DeviceMatch::Device {
                vendor_id: 0x1b1c,
                product_id: 0x0b29,
            },
            DeviceMatch::Device {
                vendor_id: 0x22b8,
                product_id: 0x2e76,
            },
        ]
    }

    /// Whether the driver should bind to this device
    pub fn matches(&self, info: &DeviceInfo) -> bool {
        self.entries.is_empty() || self.entries.iter().any(|entry| entry.matches(info))
    }

    pub fn entries(&self) -> &[DeviceMatch] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for IdTable {
    fn default() -> Self {
        Self::new(Self::default_entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::InterfaceClass;
    use common::test_utils::{
        create_mock_device_info, create_mock_hid_keyboard, create_mock_mass_storage_device,
    };

    #[test]
    fn test_default_table() {
        let table = IdTable::default();

        assert!(table.matches(&create_mock_mass_storage_device()));
        assert!(table.matches(&create_mock_hid_keyboard()));
        assert!(table.matches(&create_mock_device_info(0x1b1c, 0x0b29)));
        assert!(table.matches(&create_mock_device_info(0x22b8, 0x2e76)));

        // Vendor-specific device not in the table
        assert!(!table.matches(&create_mock_device_info(0x1234, 0x5678)));
    }

    #[test]
    fn test_interface_match_requires_interface() {
        let entry = DeviceMatch::InterfaceClass {
            class: 0x03,
            subclass: 0,
            protocol: 0,
        };
        let mut info = create_mock_device_info(0x1234, 0x5678);
        info.class = 0x03;
        assert!(!entry.matches(&info));

        info.interface = Some(InterfaceClass {
            class: 0x03,
            subclass: 0,
            protocol: 0,
        });
        assert!(entry.matches(&info));
    }

    #[test]
    fn test_empty_table_accepts_everything() {
        let table = IdTable::any();
        assert!(table.matches(&create_mock_device_info(0x0000, 0x0000)));
        assert!(table.matches(&create_mock_device_info(0xffff, 0xffff)));
    }

    #[test]
    fn test_mass_storage_matches_bulk_only_protocol() {
        let table = IdTable::default();
        let mut info = create_mock_mass_storage_device();
        assert_eq!(info.protocol, 0x50);
        assert!(table.matches(&info));

        // Decimal 50 is not a mass-storage transport protocol
        info.protocol = 50;
        assert!(!table.matches(&info));
    }

    #[test]
    fn test_display() {
        let entry = DeviceMatch::Device {
            vendor_id: 0x1b1c,
            product_id: 0x0b29,
        };
        assert_eq!(entry.to_string(), "device 0x1b1c:0x0b29");
    }
}
