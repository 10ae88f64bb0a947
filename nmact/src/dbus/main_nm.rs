//! Main NetworkManager proxy.

use std::collections::HashMap;
use zbus::proxy;
use zvariant::{OwnedObjectPath, OwnedValue, Value};

/// Proxy for the main NetworkManager interface.
///
/// Only the activation and checkpoint methods are declared; object state
/// reaches the cache through `ObjectManager` signals instead of properties.
#[proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
pub trait NM {
    /// Activates an existing saved connection.
    fn activate_connection(
        &self,
        connection: OwnedObjectPath,
        device: OwnedObjectPath,
        specific_object: OwnedObjectPath,
    ) -> zbus::Result<OwnedObjectPath>;

    /// Creates a new connection and activates it simultaneously.
    ///
    /// Returns paths to both the new connection settings and active connection.
    fn add_and_activate_connection(
        &self,
        connection: HashMap<&str, HashMap<&str, Value<'_>>>,
        device: OwnedObjectPath,
        specific_object: OwnedObjectPath,
    ) -> zbus::Result<(OwnedObjectPath, OwnedObjectPath)>;

    /// As `AddAndActivateConnection`, with options and an extra result dictionary.
    #[zbus(name = "AddAndActivateConnection2")]
    fn add_and_activate_connection2(
        &self,
        connection: HashMap<&str, HashMap<&str, Value<'_>>>,
        device: OwnedObjectPath,
        specific_object: OwnedObjectPath,
        options: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<(OwnedObjectPath, OwnedObjectPath, HashMap<String, OwnedValue>)>;

    /// Deactivates an active connection.
    fn deactivate_connection(&self, active_connection: OwnedObjectPath) -> zbus::Result<()>;

    /// Snapshots the configuration of `devices` (all devices when empty).
    fn checkpoint_create(
        &self,
        devices: Vec<OwnedObjectPath>,
        rollback_timeout: u32,
        flags: u32,
    ) -> zbus::Result<OwnedObjectPath>;

    fn checkpoint_destroy(&self, checkpoint: OwnedObjectPath) -> zbus::Result<()>;

    /// Returns a result code per device path.
    fn checkpoint_rollback(&self, checkpoint: OwnedObjectPath) -> zbus::Result<HashMap<String, u32>>;
}
