//! PPP helper proxy.

use std::collections::HashMap;
use zbus::proxy;
use zvariant::OwnedValue;

/// Signals published by the pppd plugin once it owns its bus name.
///
/// The destination is set per session from the configured bus name.
#[proxy(
    interface = "org.freedesktop.NetworkManager.PPP",
    default_path = "/org/freedesktop/NetworkManager/PPP"
)]
pub trait NMPpp {
    /// pppd phase change (`PppState` code).
    #[zbus(signal)]
    fn status(&self, state: u32) -> zbus::Result<()>;

    /// IPv4 parameters negotiated by pppd.
    #[zbus(signal, name = "IP4Config")]
    fn ip4_config(&self, config: HashMap<String, OwnedValue>) -> zbus::Result<()>;
}
