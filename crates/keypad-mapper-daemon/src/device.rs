//! Device enumeration

use std::path::PathBuf;

use anyhow::{Context, Result};
use evdev::Device;

/// Information about an input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub is_keyboard: bool,
}

impl DeviceInfo {
    /// Get vendor:product string (e.g., "3434:0361")
    pub fn vendor_product(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor, self.product)
    }
}

/// Enumerate all input devices, sorted by path
pub fn enumerate_devices() -> Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    for entry in std::fs::read_dir("/dev/input").context("Failed to list /dev/input")? {
        let entry = entry?;
        let path = entry.path();

        // Only look at event* devices
        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                let id = device.input_id();
                devices.push(DeviceInfo {
                    name: device.name().unwrap_or("Unknown").to_string(),
                    vendor: id.vendor(),
                    product: id.product(),
                    is_keyboard: is_keyboard(&device),
                    path,
                });
            }
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    devices.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(devices)
}

/// Check if a device is a keyboard
pub fn is_keyboard(device: &Device) -> bool {
    device
        .supported_events()
        .contains(evdev::EventType::KEY)
        && device
            .supported_keys()
            .map(|keys| keys.contains(evdev::Key::KEY_A))
            .unwrap_or(false)
}

/// Keyboards to grab.
///
/// With `wanted` set only keyboards of that exact name qualify. Devices named
/// `exclude` (our own virtual keyboard) never do.
pub fn select_keyboards<'a>(
    devices: &'a [DeviceInfo],
    wanted: Option<&str>,
    exclude: &str,
) -> Vec<&'a DeviceInfo> {
    devices
        .iter()
        .filter(|d| d.is_keyboard && d.name != exclude)
        .filter(|d| wanted.map_or(true, |name| d.name == name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(path: &str, name: &str, is_keyboard: bool) -> DeviceInfo {
        DeviceInfo {
            path: PathBuf::from(path),
            name: name.to_string(),
            vendor: 0x3434,
            product: 0x0361,
            is_keyboard,
        }
    }

    #[test]
    fn test_vendor_product_format() {
        assert_eq!(info("/dev/input/event0", "kbd", true).vendor_product(), "3434:0361");
    }

    #[test]
    fn test_select_all_keyboards_but_ours() {
        let devices = vec![
            info("/dev/input/event2", "AT Translated Set 2 keyboard", true),
            info("/dev/input/event5", "Logitech G502", false),
            info("/dev/input/event9", "keypad-mapper", true),
            info("/dev/input/event11", "Keychron K3 Pro", true),
        ];

        let names: Vec<&str> = select_keyboards(&devices, None, "keypad-mapper")
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["AT Translated Set 2 keyboard", "Keychron K3 Pro"]);
    }

    #[test]
    fn test_select_by_name() {
        let devices = vec![
            info("/dev/input/event2", "AT Translated Set 2 keyboard", true),
            info("/dev/input/event11", "Keychron K3 Pro", true),
        ];

        let selected = select_keyboards(&devices, Some("Keychron K3 Pro"), "keypad-mapper");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].path, PathBuf::from("/dev/input/event11"));

        assert!(select_keyboards(&devices, Some("Missing"), "keypad-mapper").is_empty());
    }
}
