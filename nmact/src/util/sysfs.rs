//! Best-effort hardware lookup through sysfs.

use std::fs;
use std::path::Path;

use crate::api::models::HardwareInfo;
use crate::util::utils::try_log;

/// Reads vendor, product and driver for a network interface.
///
/// Returns `None` for virtual interfaces (no `device` link) or when the
/// interface is unknown to sysfs.
pub(crate) fn read_hardware_info(sysfs_root: &Path, interface: &str) -> Option<HardwareInfo> {
    if interface.is_empty() || interface.contains('/') {
        return None;
    }
    let device_dir = sysfs_root.join("class/net").join(interface).join("device");
    if !device_dir.exists() {
        return None;
    }

    let driver_link = try_log!(
        fs::read_link(device_dir.join("driver")),
        format!("Failed to resolve driver for {interface}")
    );

    Some(HardwareInfo {
        vendor: read_trimmed(&device_dir.join("vendor")),
        product: read_trimmed(&device_dir.join("device")),
        driver: driver_link
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
    })
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}
