//! [`Transport`] over a zbus connection.

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use log::{debug, info, warn};
use zbus::Connection;
use zbus::fdo::ObjectManagerProxy;

use crate::api::models::{ConnectionSettings, Error, ObjectPath, PropValue, PropertyBag, Result};
use crate::core::object_cache::SettingsAccess;
use crate::core::transport::{Arg, MethodCall, Transport, TransportEvent};
use crate::dbus::convert::{
    bag_from, bag_to, from_owned_path, settings_from, settings_to, to_owned_path,
};
use crate::dbus::{NMProxy, NMSettingsConnectionProxy, NMSettingsProxy};
use crate::monitoring::objects::{BusSignal, bus_signals};
use crate::types::constants::{bus, iface};

const OBJECT_MANAGER_PATH: &str = "/org/freedesktop";

/// Talks to NetworkManager over D-Bus.
#[derive(Debug, Clone)]
pub struct DbusTransport {
    conn: Connection,
}

impl DbusTransport {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Connects to the system bus.
    pub async fn system() -> Result<Self> {
        Ok(Self::new(Connection::system().await?))
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[async_trait]
impl Transport for DbusTransport {
    async fn call(&self, call: MethodCall) -> Result<Vec<Arg>> {
        let args = &call.args;
        match (call.interface, call.method) {
            (iface::MANAGER, "ActivateConnection") => {
                let nm = NMProxy::new(&self.conn).await?;
                let active = nm
                    .activate_connection(path_arg(args, 0)?, path_arg(args, 1)?, path_arg(args, 2)?)
                    .await?;
                Ok(vec![path_reply(&active)?])
            }
            (iface::MANAGER, "AddAndActivateConnection") => {
                let nm = NMProxy::new(&self.conn).await?;
                let (conn, active) = nm
                    .add_and_activate_connection(
                        settings_to(settings_arg(args, 0)?)?,
                        path_arg(args, 1)?,
                        path_arg(args, 2)?,
                    )
                    .await?;
                Ok(vec![path_reply(&conn)?, path_reply(&active)?])
            }
            (iface::MANAGER, "AddAndActivateConnection2") => {
                let nm = NMProxy::new(&self.conn).await?;
                let (conn, active, result) = nm
                    .add_and_activate_connection2(
                        settings_to(settings_arg(args, 0)?)?,
                        path_arg(args, 1)?,
                        path_arg(args, 2)?,
                        bag_to(dict_arg(args, 3)?)?,
                    )
                    .await?;
                Ok(vec![
                    path_reply(&conn)?,
                    path_reply(&active)?,
                    Arg::Dict(bag_from(&result)),
                ])
            }
            (iface::MANAGER, "DeactivateConnection") => {
                let nm = NMProxy::new(&self.conn).await?;
                nm.deactivate_connection(path_arg(args, 0)?).await?;
                Ok(Vec::new())
            }
            (iface::MANAGER, "CheckpointCreate") => {
                let devices = match args.first() {
                    Some(Arg::Value(PropValue::PathList(paths))) => paths
                        .iter()
                        .map(to_owned_path)
                        .collect::<Result<Vec<_>>>()?,
                    _ => return Err(bad_args(&call)),
                };
                let nm = NMProxy::new(&self.conn).await?;
                let checkpoint = nm
                    .checkpoint_create(devices, u32_arg(args, 1)?, u32_arg(args, 2)?)
                    .await?;
                Ok(vec![path_reply(&checkpoint)?])
            }
            (iface::MANAGER, "CheckpointDestroy") => {
                let nm = NMProxy::new(&self.conn).await?;
                nm.checkpoint_destroy(path_arg(args, 0)?).await?;
                Ok(Vec::new())
            }
            (iface::MANAGER, "CheckpointRollback") => {
                let nm = NMProxy::new(&self.conn).await?;
                let results = nm.checkpoint_rollback(path_arg(args, 0)?).await?;
                let bag: PropertyBag = results
                    .into_iter()
                    .map(|(dev, code)| (dev, PropValue::U32(code)))
                    .collect();
                Ok(vec![Arg::Dict(bag)])
            }
            (iface::SETTINGS, "AddConnection") => {
                let settings = NMSettingsProxy::new(&self.conn).await?;
                let path = settings
                    .add_connection(settings_to(settings_arg(args, 0)?)?)
                    .await?;
                Ok(vec![path_reply(&path)?])
            }
            (iface::SETTINGS, "AddConnectionUnsaved") => {
                let settings = NMSettingsProxy::new(&self.conn).await?;
                let path = settings
                    .add_connection_unsaved(settings_to(settings_arg(args, 0)?)?)
                    .await?;
                Ok(vec![path_reply(&path)?])
            }
            (interface, method) => Err(Error::Transport(format!(
                "{interface}.{method} is not supported by this transport"
            ))),
        }
    }

    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>> {
        // Subscribe first; the snapshot below then cannot miss anything.
        let mut signals = bus_signals(&self.conn).await?;
        let (tx, rx) = mpsc::unbounded();
        let conn = self.conn.clone();

        tokio::spawn(async move {
            let pump = Pump { conn, tx };
            if let Err(e) = pump.snapshot().await {
                warn!("Initial object snapshot failed: {e}");
            }
            while let Some(signal) = signals.next().await {
                if !pump.forward(signal).await {
                    debug!("Event receiver dropped; stopping signal pump");
                    return;
                }
            }
            debug!("Bus signal stream ended");
        });

        Ok(rx.boxed())
    }
}

/// Feeds decoded bus signals into the event channel, initializing new
/// objects before they are announced as ready.
struct Pump {
    conn: Connection,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl Pump {
    fn send(&self, event: TransportEvent) -> bool {
        self.tx.unbounded_send(event).is_ok()
    }

    async fn snapshot(&self) -> Result<()> {
        let manager = ObjectManagerProxy::builder(&self.conn)
            .destination(bus::NM_SERVICE)?
            .path(OBJECT_MANAGER_PATH)?
            .build()
            .await?;
        let objects = manager.get_managed_objects().await?;
        info!("Loaded {} objects from NetworkManager", objects.len());

        for (path, ifaces) in objects {
            let path = from_owned_path(&path)?;
            let mut properties = PropertyBag::new();
            for props in ifaces.values() {
                properties.extend(bag_from(props));
            }
            let interfaces = ifaces.keys().map(|i| i.to_string()).collect();
            if !self.add(path, interfaces, properties).await {
                break;
            }
        }
        Ok(())
    }

    async fn add(&self, path: ObjectPath, interfaces: Vec<String>, properties: PropertyBag) -> bool {
        let has_settings = interfaces.iter().any(|i| i == iface::SETTINGS_CONNECTION);
        if !self.send(TransportEvent::ObjectAdded {
            path: path.clone(),
            interfaces,
        }) {
            return false;
        }

        let event = if has_settings {
            match self.fetch_settings(&path).await {
                Ok(settings) => TransportEvent::ObjectInitialized {
                    path,
                    properties,
                    settings,
                },
                Err(message) => TransportEvent::ObjectInitFailed { path, message },
            }
        } else {
            TransportEvent::ObjectInitialized {
                path,
                properties,
                settings: SettingsAccess::NotApplicable,
            }
        };
        self.send(event)
    }

    async fn forward(&self, signal: BusSignal) -> bool {
        match signal {
            BusSignal::Added {
                path,
                interfaces,
                properties,
            } => self.add(path, interfaces, properties).await,
            BusSignal::Removed { path } => self.send(TransportEvent::ObjectRemoved { path }),
            BusSignal::Changed { path, changed } => {
                self.send(TransportEvent::PropertiesChanged { path, changed })
            }
            BusSignal::SettingsUpdated { path } => match self.fetch_settings(&path).await {
                Ok(settings) => self.send(TransportEvent::SettingsUpdated { path, settings }),
                Err(message) => {
                    warn!("Failed to re-read settings of {path}: {message}");
                    true
                }
            },
            BusSignal::Owner { present } => {
                if !self.send(TransportEvent::ServiceOwner { present }) {
                    return false;
                }
                if present && let Err(e) = self.snapshot().await {
                    warn!("Object snapshot after restart failed: {e}");
                }
                true
            }
        }
    }

    /// Reads a profile's settings. Permission errors mean the profile is
    /// hidden from this caller rather than broken.
    async fn fetch_settings(&self, path: &ObjectPath) -> std::result::Result<SettingsAccess, String> {
        let proxy = NMSettingsConnectionProxy::builder(&self.conn)
            .path(path.as_str().to_owned())
            .map_err(message)?
            .build()
            .await
            .map_err(message)?;

        match proxy.get_settings().await {
            Ok(raw) => Ok(SettingsAccess::Visible(settings_from(&raw))),
            Err(zbus::Error::MethodError(name, _, _)) if name.as_str().ends_with(".PermissionDenied") => {
                debug!("{path} is not visible to this client");
                Ok(SettingsAccess::Hidden)
            }
            Err(e) => Err(message(e)),
        }
    }
}

fn message(e: zbus::Error) -> String {
    match Error::from(e) {
        Error::Transport(m) => m,
        other => other.to_string(),
    }
}

fn bad_args(call: &MethodCall) -> Error {
    Error::Transport(format!("bad arguments for {}", call.method))
}

fn path_arg(args: &[Arg], idx: usize) -> Result<zvariant::OwnedObjectPath> {
    match args.get(idx) {
        Some(Arg::Value(PropValue::Path(p))) => to_owned_path(p),
        _ => Err(Error::Transport(format!("expected object path argument at {idx}"))),
    }
}

fn settings_arg(args: &[Arg], idx: usize) -> Result<&ConnectionSettings> {
    match args.get(idx) {
        Some(Arg::Settings(s)) => Ok(s),
        _ => Err(Error::Transport(format!("expected settings argument at {idx}"))),
    }
}

fn dict_arg(args: &[Arg], idx: usize) -> Result<&PropertyBag> {
    match args.get(idx) {
        Some(Arg::Dict(d)) => Ok(d),
        _ => Err(Error::Transport(format!("expected dictionary argument at {idx}"))),
    }
}

fn u32_arg(args: &[Arg], idx: usize) -> Result<u32> {
    args.get(idx)
        .and_then(|a| match a {
            Arg::Value(v) => v.as_u32(),
            _ => None,
        })
        .ok_or_else(|| Error::Transport(format!("expected u32 argument at {idx}")))
}

fn path_reply(path: &zvariant::OwnedObjectPath) -> Result<Arg> {
    Ok(Arg::Value(PropValue::Path(from_owned_path(path)?)))
}
