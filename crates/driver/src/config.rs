//! Driver configuration management

use crate::usb::controller::{DEFAULT_CLASS_NAME, DEFAULT_MAX_DEVICES};
use crate::usb::id_table::{DeviceMatch, IdTable};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub driver: DriverSettings,
    #[serde(default)]
    pub devices: DeviceSettings,
    #[serde(default)]
    pub events: EventSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Driver name used in log output
    #[serde(default = "DriverSettings::default_name")]
    pub name: String,
    /// Device node prefix; the device id is appended
    #[serde(default = "DriverSettings::default_class_name")]
    pub class_name: String,
    pub log_level: String,
}

impl DriverSettings {
    fn default_name() -> String {
        "usb_lifecycle_driver".to_string()
    }

    fn default_class_name() -> String {
        DEFAULT_CLASS_NAME.to_string()
    }
}

/// Device binding configuration
///
/// # Example Configuration
/// ```toml
/// [devices]
/// max_devices = 8
/// id_table = [
///     { match = "device", vendor_id = 0x1b1c, product_id = 0x0b29 },
///     { match = "interface_class", class = 3, subclass = 1, protocol = 1 },
/// ]
/// ```
///
/// An empty `id_table` binds to every device; leaving it out uses the
/// built-in table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "DeviceSettings::default_max_devices")]
    pub max_devices: usize,
    #[serde(default = "IdTable::default_entries")]
    pub id_table: Vec<DeviceMatch>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            max_devices: Self::default_max_devices(),
            id_table: IdTable::default_entries(),
        }
    }
}

impl DeviceSettings {
    fn default_max_devices() -> usize {
        DEFAULT_MAX_DEVICES
    }
}

/// Channel sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Capacity of the transport and lifecycle event channels
    #[serde(default = "EventSettings::default_capacity")]
    pub capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
        }
    }
}

impl EventSettings {
    fn default_capacity() -> usize {
        256
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver: DriverSettings {
                name: DriverSettings::default_name(),
                class_name: DriverSettings::default_class_name(),
                log_level: "info".to_string(),
            },
            devices: DeviceSettings::default(),
            events: EventSettings::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-lifecycle/driver.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a configuration document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: DriverConfig =
            toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-lifecycle").join("driver.toml")
        } else {
            PathBuf::from(".config/usb-lifecycle/driver.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.driver.class_name.is_empty() {
            return Err(anyhow!("Empty class_name"));
        }
        if self.devices.max_devices == 0 {
            return Err(anyhow!("max_devices must be at least 1"));
        }
        if self.events.capacity == 0 {
            return Err(anyhow!("Event channel capacity must be at least 1"));
        }

        Self::validate_id_table(&self.devices.id_table)
    }

    fn validate_id_table(entries: &[DeviceMatch]) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in entries {
            if let DeviceMatch::Device { vendor_id: 0, .. } = entry {
                return Err(anyhow!("Invalid id table entry '{}': vendor id 0 is reserved", entry));
            }
            if !seen.insert(*entry) {
                return Err(anyhow!("Duplicate id table entry '{}'", entry));
            }
        }
        Ok(())
    }
}

/// Load a configuration file, expanding `~` in the path
pub fn load_config(path: &str) -> Result<DriverConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    DriverConfig::load(Some(path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.driver.log_level, "info");
        assert_eq!(config.driver.class_name, "usb_lifecycle_class");
        assert_eq!(config.devices.max_devices, DEFAULT_MAX_DEVICES);
        assert_eq!(config.devices.id_table, IdTable::default_entries());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = DriverConfig::default();
        config.driver.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.driver.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_id_table() {
        let duplicate = DeviceMatch::Device {
            vendor_id: 0x1234,
            product_id: 0x5678,
        };
        assert!(DriverConfig::validate_id_table(&[duplicate, duplicate]).is_err());

        let reserved = DeviceMatch::Device {
            vendor_id: 0,
            product_id: 1,
        };
        assert!(DriverConfig::validate_id_table(&[reserved]).is_err());

        assert!(DriverConfig::validate_id_table(&IdTable::default_entries()).is_ok());
    }

    #[test]
    fn test_validate_zero_sizes() {
        let mut config = DriverConfig::default();
        config.devices.max_devices = 0;
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.events.capacity = 0;
        assert!(config.validate().is_err());
    }
}
