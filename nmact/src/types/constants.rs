//! Constants for NetworkManager D-Bus names and helper defaults.
//!
//! These correspond to the well-known names, paths and numeric values
//! used by NetworkManager and its PPP helper.

/// Well-known bus names and object paths.
pub mod bus {
    pub const NM_SERVICE: &str = "org.freedesktop.NetworkManager";
    pub const NM_PATH: &str = "/org/freedesktop/NetworkManager";
    pub const NM_SETTINGS_PATH: &str = "/org/freedesktop/NetworkManager/Settings";

    /// Bus name the PPP plugin claims once pppd is up.
    pub const PPP_SERVICE: &str = "org.freedesktop.NetworkManager.PPP";
}

/// Interface names used for object-kind resolution.
pub mod iface {
    pub const MANAGER: &str = "org.freedesktop.NetworkManager";
    pub const SETTINGS: &str = "org.freedesktop.NetworkManager.Settings";
    pub const SETTINGS_CONNECTION: &str = "org.freedesktop.NetworkManager.Settings.Connection";
    pub const DNS_MANAGER: &str = "org.freedesktop.NetworkManager.DnsManager";
    pub const DEVICE: &str = "org.freedesktop.NetworkManager.Device";
    pub const DEVICE_WIRED: &str = "org.freedesktop.NetworkManager.Device.Wired";
    pub const DEVICE_WIRELESS: &str = "org.freedesktop.NetworkManager.Device.Wireless";
    pub const DEVICE_WIFI_P2P: &str = "org.freedesktop.NetworkManager.Device.WifiP2P";
    pub const DEVICE_BLUETOOTH: &str = "org.freedesktop.NetworkManager.Device.Bluetooth";
    pub const DEVICE_MODEM: &str = "org.freedesktop.NetworkManager.Device.Modem";
    pub const DEVICE_PPP: &str = "org.freedesktop.NetworkManager.Device.Ppp";
    pub const DEVICE_BOND: &str = "org.freedesktop.NetworkManager.Device.Bond";
    pub const DEVICE_BRIDGE: &str = "org.freedesktop.NetworkManager.Device.Bridge";
    pub const DEVICE_VLAN: &str = "org.freedesktop.NetworkManager.Device.Vlan";
    pub const DEVICE_TUN: &str = "org.freedesktop.NetworkManager.Device.Tun";
    pub const DEVICE_WIREGUARD: &str = "org.freedesktop.NetworkManager.Device.WireGuard";
    pub const DEVICE_OVS_INTERFACE: &str = "org.freedesktop.NetworkManager.Device.OvsInterface";
    pub const ACCESS_POINT: &str = "org.freedesktop.NetworkManager.AccessPoint";
    pub const ACTIVE_CONNECTION: &str = "org.freedesktop.NetworkManager.Connection.Active";
    pub const VPN_CONNECTION: &str = "org.freedesktop.NetworkManager.VPN.Connection";
    pub const IP4_CONFIG: &str = "org.freedesktop.NetworkManager.IP4Config";
    pub const IP6_CONFIG: &str = "org.freedesktop.NetworkManager.IP6Config";
    pub const DHCP4_CONFIG: &str = "org.freedesktop.NetworkManager.DHCP4Config";
    pub const DHCP6_CONFIG: &str = "org.freedesktop.NetworkManager.DHCP6Config";
    pub const CHECKPOINT: &str = "org.freedesktop.NetworkManager.Checkpoint";
    pub const WIFI_P2P_PEER: &str = "org.freedesktop.NetworkManager.WifiP2PPeer";
}

/// PPP helper defaults.
pub mod ppp {
    use std::net::Ipv4Addr;

    /// Locations searched, in order, for the pppd binary.
    pub const SEARCH_PATHS: &[&str] = &["/usr/local/sbin/pppd", "/usr/sbin/pppd", "/sbin/pppd"];

    /// The NetworkManager pppd plugin, always loaded last on the command line.
    pub const PLUGIN_PATH: &str = "/usr/lib/pppd/2.5.0/nm-pppd-plugin.so";

    /// Netmask used when the helper reports none.
    pub const FALLBACK_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 0, 0, 0);

    /// Keys of the `IP4Config` signal dictionary.
    pub mod keys {
        pub const INTERFACE: &str = "interface";
        pub const ADDRESS: &str = "address";
        pub const NETMASK: &str = "netmask";
        pub const GATEWAY: &str = "gateway";
        pub const DNS: &str = "dns_server";
        pub const WINS: &str = "wins_server";
    }
}

/// Timeout constants.
///
/// The PPP watchdog is the only hard timeout in the activation path;
/// everything else is opt-in through configuration.
pub mod timeouts {
    use std::time::Duration;

    /// How long the PPP helper has to register on the bus (10 seconds).
    const PPP_WATCHDOG_SECS: u64 = 10;

    /// Default method call timeout, matching the D-Bus default (25 seconds).
    const CALL_TIMEOUT_SECS: u64 = 25;

    /// Default wait for an active connection to settle (30 seconds).
    const ACTIVATION_WAIT_SECS: u64 = 30;

    /// Returns the PPP start-up watchdog duration.
    pub fn ppp_watchdog() -> Duration {
        Duration::from_secs(PPP_WATCHDOG_SECS)
    }

    /// Returns the default method call timeout.
    pub fn call_timeout() -> Duration {
        Duration::from_secs(CALL_TIMEOUT_SECS)
    }

    /// Returns the default activation wait.
    pub fn activation_wait() -> Duration {
        Duration::from_secs(ACTIVATION_WAIT_SECS)
    }
}

/// Environment variables read by [`ClientConfig::from_env`](crate::ClientConfig::from_env).
pub mod env {
    /// Set to `1` to skip sysfs hardware lookups for devices.
    pub const NO_HW_INFO: &str = "NMACT_NO_HW_INFO";
}

/// Channel capacities for event fan-out.
pub mod capacity {
    pub const CACHE_EVENTS: usize = 256;
    pub const STAGE_EVENTS: usize = 64;
    pub const COMMANDS: usize = 32;
}
