//! NetworkManager object lifecycle signals.
//!
//! One match rule covers every signal under `/org/freedesktop`, so object
//! additions, property changes, removals and bus-name changes arrive in the
//! order the bus delivered them. Only signals sent by the current owner of
//! NetworkManager's bus name are decoded; the owner is tracked through
//! `NameOwnerChanged` as sent by the bus itself.

use futures::stream::BoxStream;
use futures::{StreamExt, future};
use log::{debug, warn};
use std::collections::HashMap;
use zbus::fdo::DBusProxy;
use zbus::message::Type as MessageType;
use zbus::names::BusName;
use zbus::{Connection, MatchRule, Message, MessageStream};
use zvariant::{OwnedObjectPath, OwnedValue};

use crate::Result;
use crate::api::models::{ObjectPath, PropertyBag};
use crate::dbus::convert::bag_from;
use crate::types::constants::{bus, iface};
use crate::util::utils::try_log;

const SIGNAL_NAMESPACE: &str = "/org/freedesktop";
const OBJECT_MANAGER: &str = "org.freedesktop.DBus.ObjectManager";
const PROPERTIES: &str = "org.freedesktop.DBus.Properties";
const DBUS: &str = "org.freedesktop.DBus";

/// A decoded lifecycle signal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BusSignal {
    Added {
        path: ObjectPath,
        interfaces: Vec<String>,
        properties: PropertyBag,
    },
    Removed {
        path: ObjectPath,
    },
    Changed {
        path: ObjectPath,
        changed: PropertyBag,
    },
    SettingsUpdated {
        path: ObjectPath,
    },
    Owner {
        present: bool,
    },
}

/// Subscribes to lifecycle signals.
///
/// Subscribe before taking a snapshot so nothing falls between the two.
pub(crate) async fn bus_signals(conn: &Connection) -> Result<BoxStream<'static, BusSignal>> {
    let rule = MatchRule::builder()
        .msg_type(MessageType::Signal)
        .path_namespace(SIGNAL_NAMESPACE)?
        .build();
    let stream = MessageStream::for_match_rule(rule, conn, None).await?;
    debug!("Subscribed to signals under {SIGNAL_NAMESPACE}");
    let owner = nm_owner(conn).await;

    Ok(stream
        .scan(owner, |owner, msg| {
            let signal = match msg {
                Ok(msg) => accept(owner, &msg),
                Err(e) => {
                    warn!("Signal stream error: {e}");
                    None
                }
            };
            future::ready(Some(signal))
        })
        .filter_map(future::ready)
        .boxed())
}

/// Unique name currently owning NetworkManager's bus name.
async fn nm_owner(conn: &Connection) -> Option<String> {
    let dbus = try_log!(DBusProxy::new(conn).await, "Failed to create DBus proxy");
    let name = try_log!(BusName::try_from(bus::NM_SERVICE), "Bad service name");
    match dbus.get_name_owner(name).await {
        Ok(owner) => Some(owner.to_string()),
        Err(e) => {
            debug!("{} has no owner yet: {e}", bus::NM_SERVICE);
            None
        }
    }
}

/// Decodes `msg` if it comes from a trusted sender, tracking the owner of
/// NetworkManager's name on the way.
fn accept(owner: &mut Option<String>, msg: &Message) -> Option<BusSignal> {
    let header = msg.header();
    let sender = header.sender().map(|s| s.as_str().to_owned());
    let interface = header.interface()?.as_str().to_owned();
    let member = header.member()?.as_str().to_owned();

    if interface == DBUS && member == "NameOwnerChanged" {
        if sender.as_deref() != Some(DBUS) {
            debug!("Ignoring NameOwnerChanged from {sender:?}");
            return None;
        }
        let (name, _old, new): (String, String, String) =
            try_log!(msg.body().deserialize(), "Failed to decode NameOwnerChanged");
        if name != bus::NM_SERVICE {
            return None;
        }
        *owner = (!new.is_empty()).then_some(new);
        return Some(BusSignal::Owner {
            present: owner.is_some(),
        });
    }

    if sender.is_none() || sender != *owner {
        debug!("Ignoring {interface}.{member} from {sender:?}");
        return None;
    }
    decode(msg)
}

fn is_nm_path(path: &str) -> bool {
    path == bus::NM_PATH || path.starts_with("/org/freedesktop/NetworkManager/")
}

fn decode(msg: &Message) -> Option<BusSignal> {
    let header = msg.header();
    let path = header.path()?.as_str().to_owned();
    let interface = header.interface()?.as_str().to_owned();
    let member = header.member()?.as_str().to_owned();
    let body = msg.body();

    match (interface.as_str(), member.as_str()) {
        (OBJECT_MANAGER, "InterfacesAdded") => {
            type Added = (OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>);
            let (object, ifaces): Added =
                try_log!(body.deserialize(), "Failed to decode InterfacesAdded");
            if !is_nm_path(object.as_str()) {
                return None;
            }
            let mut properties = PropertyBag::new();
            for props in ifaces.values() {
                properties.extend(bag_from(props));
            }
            Some(BusSignal::Added {
                path: try_log!(ObjectPath::new(object.as_str()), "Bad object path"),
                interfaces: ifaces.into_keys().collect(),
                properties,
            })
        }
        (OBJECT_MANAGER, "InterfacesRemoved") => {
            let (object, _ifaces): (OwnedObjectPath, Vec<String>) =
                try_log!(body.deserialize(), "Failed to decode InterfacesRemoved");
            if !is_nm_path(object.as_str()) {
                return None;
            }
            Some(BusSignal::Removed {
                path: try_log!(ObjectPath::new(object.as_str()), "Bad object path"),
            })
        }
        (PROPERTIES, "PropertiesChanged") if is_nm_path(&path) => {
            type Changed = (String, HashMap<String, OwnedValue>, Vec<String>);
            let (on, changed, _invalidated): Changed =
                try_log!(body.deserialize(), "Failed to decode PropertiesChanged");
            if !on.starts_with(iface::MANAGER) {
                return None;
            }
            Some(BusSignal::Changed {
                path: try_log!(ObjectPath::new(path), "Bad object path"),
                changed: bag_from(&changed),
            })
        }
        (iface::SETTINGS_CONNECTION, "Updated") if is_nm_path(&path) => {
            Some(BusSignal::SettingsUpdated {
                path: try_log!(ObjectPath::new(path), "Bad object path"),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_nm_paths_are_accepted() {
        assert!(is_nm_path("/org/freedesktop/NetworkManager"));
        assert!(is_nm_path("/org/freedesktop/NetworkManager/Devices/3"));
        assert!(!is_nm_path("/org/freedesktop/NetworkManagerX"));
        assert!(!is_nm_path("/org/freedesktop/UDisks2/drives/sda"));
    }

    fn device_changed(sender: &str) -> Message {
        let changed: HashMap<&str, zvariant::Value<'_>> =
            HashMap::from([("State", zvariant::Value::from(100u32))]);
        let body = (iface::DEVICE, changed, Vec::<String>::new());
        let path = "/org/freedesktop/NetworkManager/Devices/3";
        Message::signal(path, PROPERTIES, "PropertiesChanged")
            .unwrap()
            .sender(sender)
            .unwrap()
            .build(&body)
            .unwrap()
    }

    fn owner_changed(sender: &str, new: &str) -> Message {
        Message::signal("/org/freedesktop/DBus", DBUS, "NameOwnerChanged")
            .unwrap()
            .sender(sender)
            .unwrap()
            .build(&(bus::NM_SERVICE, ":1.7", new))
            .unwrap()
    }

    #[test]
    fn signals_from_other_senders_are_dropped() {
        let mut owner = Some(":1.7".to_string());

        assert!(matches!(
            accept(&mut owner, &device_changed(":1.7")),
            Some(BusSignal::Changed { .. })
        ));
        assert_eq!(accept(&mut owner, &device_changed(":1.99")), None);

        let mut nobody = None;
        assert_eq!(accept(&mut nobody, &device_changed(":1.7")), None);
    }

    #[test]
    fn owner_is_tracked_from_the_bus_daemon_only() {
        let mut owner = Some(":1.7".to_string());

        // A peer cannot impersonate the bus daemon.
        assert_eq!(accept(&mut owner, &owner_changed(":1.99", ":1.99")), None);
        assert_eq!(owner.as_deref(), Some(":1.7"));

        assert_eq!(
            accept(&mut owner, &owner_changed(DBUS, "")),
            Some(BusSignal::Owner { present: false })
        );
        assert_eq!(owner, None);
        assert_eq!(accept(&mut owner, &device_changed(":1.7")), None);

        assert_eq!(
            accept(&mut owner, &owner_changed(DBUS, ":1.42")),
            Some(BusSignal::Owner { present: true })
        );
        assert!(accept(&mut owner, &device_changed(":1.42")).is_some());
        assert_eq!(accept(&mut owner, &device_changed(":1.7")), None);
    }
}
