//! Object-kind registry.
//!
//! Maps D-Bus interface names onto the closed [`ObjectKind`] set. The table
//! is built once on first access and never changes afterwards. When an
//! object exports several recognized interfaces, the entry with the highest
//! priority decides its kind; a VPN connection, for instance, also exports
//! the active-connection interface but is always classified as VPN.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::api::models::{DeviceKind, ObjectKind};
use crate::types::constants::iface;

/// Registry entry for one interface.
pub trait ObjectKindInfo: Send + Sync {
    /// D-Bus interface name this entry matches.
    fn interface(&self) -> &'static str;

    /// The kind an object exporting this interface resolves to.
    fn kind(&self) -> ObjectKind;

    /// Properties the cache keeps for this interface.
    ///
    /// Anything else arriving in a property-change notification is ignored.
    fn known_properties(&self) -> &'static [&'static str];

    /// Tie-breaker between interfaces on the same object.
    fn priority(&self) -> u8 {
        0
    }
}

struct Entry {
    interface: &'static str,
    kind: ObjectKind,
    properties: &'static [&'static str],
    priority: u8,
}

impl ObjectKindInfo for Entry {
    fn interface(&self) -> &'static str {
        self.interface
    }

    fn kind(&self) -> ObjectKind {
        self.kind
    }

    fn known_properties(&self) -> &'static [&'static str] {
        self.properties
    }

    fn priority(&self) -> u8 {
        self.priority
    }
}

const DEVICE_PROPS: &[&str] = &[
    "Interface",
    "IpInterface",
    "Udi",
    "Driver",
    "DeviceType",
    "State",
    "StateReason",
    "ActiveConnection",
    "Ip4Config",
    "Ip6Config",
    "Dhcp4Config",
    "Dhcp6Config",
    "Managed",
    "Autoconnect",
    "AvailableConnections",
    "HwAddress",
    "Mtu",
];

const ACTIVE_PROPS: &[&str] = &[
    "Connection",
    "SpecificObject",
    "Id",
    "Uuid",
    "Type",
    "Devices",
    "State",
    "StateFlags",
    "Default",
    "Default6",
    "Ip4Config",
    "Ip6Config",
    "Vpn",
    "Master",
];

fn device(interface: &'static str, kind: DeviceKind, properties: &'static [&'static str]) -> Entry {
    Entry {
        interface,
        kind: ObjectKind::Device(kind),
        properties,
        priority: 1,
    }
}

static OBJECT_KIND_REGISTRY: OnceLock<HashMap<&'static str, Box<dyn ObjectKindInfo>>> =
    OnceLock::new();

fn registry() -> &'static HashMap<&'static str, Box<dyn ObjectKindInfo>> {
    OBJECT_KIND_REGISTRY.get_or_init(|| {
        let entries: Vec<Entry> = vec![
            Entry {
                interface: iface::MANAGER,
                kind: ObjectKind::Manager,
                properties: &[
                    "Devices",
                    "AllDevices",
                    "ActiveConnections",
                    "PrimaryConnection",
                    "ActivatingConnection",
                    "Checkpoints",
                    "State",
                    "NetworkingEnabled",
                    "WirelessEnabled",
                    "Version",
                ],
                priority: 0,
            },
            Entry {
                interface: iface::SETTINGS,
                kind: ObjectKind::Settings,
                properties: &["Connections", "Hostname", "CanModify"],
                priority: 0,
            },
            Entry {
                interface: iface::SETTINGS_CONNECTION,
                kind: ObjectKind::Connection,
                properties: &["Unsaved", "Flags", "Filename"],
                priority: 0,
            },
            Entry {
                interface: iface::DNS_MANAGER,
                kind: ObjectKind::DnsManager,
                properties: &["Mode", "RcManager", "Configuration"],
                priority: 0,
            },
            Entry {
                interface: iface::DEVICE,
                kind: ObjectKind::Device(DeviceKind::Generic),
                properties: DEVICE_PROPS,
                priority: 0,
            },
            device(iface::DEVICE_WIRED, DeviceKind::Ethernet, &["Speed", "Carrier", "PermHwAddress"]),
            device(
                iface::DEVICE_WIRELESS,
                DeviceKind::Wifi,
                &["AccessPoints", "ActiveAccessPoint", "Mode", "Bitrate", "LastScan"],
            ),
            device(iface::DEVICE_WIFI_P2P, DeviceKind::WifiP2P, &["Peers"]),
            device(iface::DEVICE_BLUETOOTH, DeviceKind::Bluetooth, &["Name", "BtCapabilities"]),
            device(
                iface::DEVICE_MODEM,
                DeviceKind::Modem,
                &["ModemCapabilities", "CurrentCapabilities", "Apn"],
            ),
            device(iface::DEVICE_PPP, DeviceKind::Ppp, &[]),
            device(iface::DEVICE_BOND, DeviceKind::Bond, &["Slaves", "Carrier"]),
            device(iface::DEVICE_BRIDGE, DeviceKind::Bridge, &["Slaves", "Carrier"]),
            device(iface::DEVICE_VLAN, DeviceKind::Vlan, &["Parent", "VlanId", "Carrier"]),
            device(iface::DEVICE_TUN, DeviceKind::Tun, &["Owner", "Group", "Mode"]),
            device(iface::DEVICE_WIREGUARD, DeviceKind::WireGuard, &["PublicKey", "ListenPort"]),
            device(iface::DEVICE_OVS_INTERFACE, DeviceKind::OvsInterface, &[]),
            Entry {
                interface: iface::ACCESS_POINT,
                kind: ObjectKind::AccessPoint,
                properties: &["Ssid", "Frequency", "HwAddress", "Strength", "Flags", "WpaFlags", "RsnFlags", "Mode"],
                priority: 0,
            },
            Entry {
                interface: iface::ACTIVE_CONNECTION,
                kind: ObjectKind::ActiveConnection,
                properties: ACTIVE_PROPS,
                priority: 0,
            },
            Entry {
                interface: iface::VPN_CONNECTION,
                kind: ObjectKind::VpnConnection,
                properties: &["VpnState", "Banner"],
                priority: 2,
            },
            Entry {
                interface: iface::IP4_CONFIG,
                kind: ObjectKind::Ip4Config,
                properties: &["AddressData", "Gateway", "NameserverData", "Domains", "RouteData"],
                priority: 0,
            },
            Entry {
                interface: iface::IP6_CONFIG,
                kind: ObjectKind::Ip6Config,
                properties: &["AddressData", "Gateway", "Nameservers", "Domains", "RouteData"],
                priority: 0,
            },
            Entry {
                interface: iface::DHCP4_CONFIG,
                kind: ObjectKind::Dhcp4Config,
                properties: &["Options"],
                priority: 0,
            },
            Entry {
                interface: iface::DHCP6_CONFIG,
                kind: ObjectKind::Dhcp6Config,
                properties: &["Options"],
                priority: 0,
            },
            Entry {
                interface: iface::CHECKPOINT,
                kind: ObjectKind::Checkpoint,
                properties: &["Devices", "Created", "RollbackTimeout"],
                priority: 0,
            },
            Entry {
                interface: iface::WIFI_P2P_PEER,
                kind: ObjectKind::WifiP2PPeer,
                properties: &["Name", "HwAddress", "Strength", "Flags"],
                priority: 0,
            },
        ];

        let mut map: HashMap<&'static str, Box<dyn ObjectKindInfo>> = HashMap::new();
        for entry in entries {
            map.insert(entry.interface(), Box::new(entry));
        }
        map
    })
}

/// Looks up the registry entry for an interface name.
pub fn get_object_kind_info(interface: &str) -> Option<&'static dyn ObjectKindInfo> {
    registry().get(interface).map(|b| &**b)
}

/// Resolves the kind of an object from the interfaces it exports.
///
/// Returns `None` when none of the interfaces are recognized.
pub fn resolve_kind<I, S>(interfaces: I) -> Option<ObjectKind>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    interfaces
        .into_iter()
        .filter_map(|name| get_object_kind_info(name.as_ref()))
        .max_by_key(|info| info.priority())
        .map(|info| info.kind())
}

/// Returns whether `name` is a property the cache tracks for `kind`.
///
/// Device kinds also accept every property of the base device interface.
pub fn is_known_property(kind: ObjectKind, name: &str) -> bool {
    registry().values().any(|info| {
        let applies = info.kind() == kind
            || (kind.is_device() && info.kind() == ObjectKind::Device(DeviceKind::Generic))
            || (kind == ObjectKind::VpnConnection && info.kind() == ObjectKind::ActiveConnection);
        applies && info.known_properties().contains(&name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wireless_device_resolves_to_wifi() {
        let kind = resolve_kind([iface::DEVICE, iface::DEVICE_WIRELESS]);
        assert_eq!(kind, Some(ObjectKind::Device(DeviceKind::Wifi)));
    }

    #[test]
    fn bare_device_is_generic() {
        let kind = resolve_kind([iface::DEVICE, "org.freedesktop.DBus.Properties"]);
        assert_eq!(kind, Some(ObjectKind::Device(DeviceKind::Generic)));
    }

    #[test]
    fn vpn_beats_active_connection() {
        let kind = resolve_kind([iface::ACTIVE_CONNECTION, iface::VPN_CONNECTION]);
        assert_eq!(kind, Some(ObjectKind::VpnConnection));
        let kind = resolve_kind([iface::VPN_CONNECTION, iface::ACTIVE_CONNECTION]);
        assert_eq!(kind, Some(ObjectKind::VpnConnection));
    }

    #[test]
    fn unknown_interfaces_resolve_to_none() {
        assert_eq!(resolve_kind(["org.example.Nothing"]), None);
        assert_eq!(resolve_kind(Vec::<String>::new()), None);
    }

    #[test]
    fn device_kinds_inherit_base_properties() {
        let wifi = ObjectKind::Device(DeviceKind::Wifi);
        assert!(is_known_property(wifi, "State"));
        assert!(is_known_property(wifi, "ActiveAccessPoint"));
        assert!(!is_known_property(wifi, "Carrier"));
        assert!(!is_known_property(wifi, "Bogus"));
    }

    #[test]
    fn vpn_inherits_active_connection_properties() {
        assert!(is_known_property(ObjectKind::VpnConnection, "State"));
        assert!(is_known_property(ObjectKind::VpnConnection, "VpnState"));
        assert!(!is_known_property(ObjectKind::ActiveConnection, "VpnState"));
    }

    #[test]
    fn registry_is_consistent() {
        for (name, info) in registry().iter() {
            assert_eq!(*name, info.interface(), "Registry key must match interface");
        }
    }
}
