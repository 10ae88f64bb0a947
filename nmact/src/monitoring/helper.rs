//! Bus access for the PPP helper bridge.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use log::debug;
use zbus::Connection;
use zbus::fdo::DBusProxy;
use zbus::names::BusName;

use crate::{Error, Result};
use crate::core::ppp_manager::{HelperBus, HelperSignal};
use crate::dbus::NMPppProxy;
use crate::dbus::convert::bag_from;
use crate::util::utils::try_log;

/// [`HelperBus`] over a zbus connection.
///
/// Usually the system bus, shared with the daemon's other bus users.
#[derive(Debug, Clone)]
pub struct ZbusHelperBus {
    conn: Connection,
}

impl ZbusHelperBus {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Connects to the system bus.
    pub async fn system() -> Result<Self> {
        Ok(Self::new(Connection::system().await?))
    }
}

#[async_trait]
impl HelperBus for ZbusHelperBus {
    async fn watch_name(&self, name: &str) -> Result<BoxStream<'static, bool>> {
        let dbus = DBusProxy::new(&self.conn).await?;
        let changes = dbus
            .receive_name_owner_changed_with_args(&[(0, name)])
            .await?;
        debug!("Watching bus name {name}");

        Ok(changes
            .filter_map(|signal| async move {
                let args = try_log!(signal.args(), "Failed to decode NameOwnerChanged");
                Some(args.new_owner().is_some())
            })
            .boxed())
    }

    async fn has_owner(&self, name: &str) -> Result<bool> {
        let dbus = DBusProxy::new(&self.conn).await?;
        let name = BusName::try_from(name).map_err(|e| Error::Transport(e.to_string()))?;
        Ok(dbus.name_has_owner(name).await?)
    }

    async fn helper_signals(&self, name: &str) -> Result<BoxStream<'static, HelperSignal>> {
        let proxy = NMPppProxy::builder(&self.conn)
            .destination(name.to_owned())?
            .build()
            .await?;

        let status = proxy.receive_status().await?.filter_map(|signal| async move {
            let args = try_log!(signal.args(), "Failed to decode helper Status");
            Some(HelperSignal::Status(*args.state()))
        });
        let ip4 = proxy
            .receive_ip4_config()
            .await?
            .filter_map(|signal| async move {
                let args = try_log!(signal.args(), "Failed to decode helper IP4Config");
                Some(HelperSignal::Ip4Config(bag_from(args.config())))
            });

        Ok(stream::select(status.boxed(), ip4.boxed()).boxed())
    }
}
