//! NetworkManager Settings proxies.

use std::collections::HashMap;
use zbus::proxy;
use zvariant::{OwnedObjectPath, OwnedValue, Value};

/// Proxy for the settings service that owns connection profiles.
#[proxy(
    interface = "org.freedesktop.NetworkManager.Settings",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager/Settings"
)]
pub trait NMSettings {
    /// Adds a profile and saves it to disk.
    fn add_connection(
        &self,
        connection: HashMap<&str, HashMap<&str, Value<'_>>>,
    ) -> zbus::Result<OwnedObjectPath>;

    /// Adds an in-memory profile.
    fn add_connection_unsaved(
        &self,
        connection: HashMap<&str, HashMap<&str, Value<'_>>>,
    ) -> zbus::Result<OwnedObjectPath>;
}

/// Proxy for a single connection profile.
///
/// `GetSettings` fails with `PermissionDenied` for profiles the caller
/// may not see.
#[proxy(
    interface = "org.freedesktop.NetworkManager.Settings.Connection",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait NMSettingsConnection {
    fn get_settings(&self) -> zbus::Result<HashMap<String, HashMap<String, OwnedValue>>>;
}
