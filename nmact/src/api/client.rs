//! The public client: remote calls and the object cache behind one handle.

use futures::{FutureExt, select};
use futures_timer::Delay;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::api::config::ClientConfig;
use crate::api::models::{
    ActiveConnectionState, CacheEvent, CheckpointCreateFlags, ConnectionSettings, Error,
    ObjectKind, ObjectPath, PropValue, PropertyBag, Result,
};
use crate::core::call::{self, Completion, Extract};
use crate::core::object_cache::{Lookup, Materialized, ObjectCache, RemoteObject};
use crate::core::transport::{Arg, MethodCall, Transport};
use crate::core::worker::{ObjectFilter, Request, Worker};
use crate::dbus::DbusTransport;
use crate::types::constants::{bus, capacity, iface, timeouts};

/// Outcome of [`Client::add_and_activate_connection`] and
/// [`Client::add_and_activate_connection2`].
#[derive(Debug, Clone, PartialEq)]
pub struct AddAndActivateResult {
    /// The new connection profile.
    pub connection: ObjectPath,
    /// The materialized active connection.
    pub active: RemoteObject,
    /// Extra results, only returned by `AddAndActivateConnection2`.
    pub result: Option<PropertyBag>,
}

/// Client for NetworkManager's remote objects.
///
/// Calls that return an object path do not resolve until the object has
/// been fully initialized in the local cache, so the returned
/// [`RemoteObject`] always has its properties.
///
/// # Example
///
/// ```no_run
/// use nmact::Client;
///
/// # async fn example() -> nmact::Result<()> {
/// let client = Client::new().await?;
///
/// for device in client.devices().await? {
///     println!("{} {:?}", device.path(), device.interface());
/// }
///
/// if let Some(conn) = client.connection_by_id("Home").await? {
///     let active = client
///         .activate_connection(Some(conn.path()), None, None, None)
///         .await?;
///     let state = client.wait_for_activation(active.path(), None).await?;
///     println!("{state}");
/// }
/// # Ok(())
/// # }
/// ```
///
/// # Cancellation
///
/// Every call that waits on the remote side takes an optional
/// [`CancellationToken`]. Cancelling it completes the call with
/// [`Error::Cancelled`] whether the reply is still outstanding or the
/// returned object is still initializing. Late replies are dropped.
///
/// `Client` is cheap to clone; clones share one cache.
#[derive(Debug, Clone)]
pub struct Client {
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<CacheEvent>,
    config: ClientConfig,
}

impl Client {
    /// Connects to NetworkManager on the system bus.
    ///
    /// Configuration comes from [`ClientConfig::from_env`].
    pub async fn new() -> Result<Self> {
        Self::with_config(ClientConfig::from_env()).await
    }

    /// Connects to NetworkManager on the system bus with explicit configuration.
    pub async fn with_config(config: ClientConfig) -> Result<Self> {
        let transport = DbusTransport::system().await?;
        Self::with_transport(Arc::new(transport), config).await
    }

    /// Builds a client over any [`Transport`].
    ///
    /// Must be called from within a tokio runtime; the cache runs on its
    /// own task until the last clone is dropped.
    pub async fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Result<Self> {
        let (events, _) = broadcast::channel(capacity::CACHE_EVENTS);
        let hardware_root = config.read_hardware.then(|| config.sysfs_root.clone());
        let cache = ObjectCache::new(events.clone(), hardware_root);

        let stream = transport.events().await?;
        let (requests, rx) = mpsc::channel(capacity::COMMANDS);
        let worker = Worker::new(transport, cache, rx, config.call_timeout);
        tokio::spawn(worker.run(stream));

        Ok(Self {
            requests,
            events,
            config,
        })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Subscribes to cache notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Activates a saved connection.
    ///
    /// Any of the paths may be omitted and NetworkManager picks a suitable
    /// value. Resolves with the ActiveConnection once it is in the cache.
    pub async fn activate_connection(
        &self,
        connection: Option<&ObjectPath>,
        device: Option<&ObjectPath>,
        specific_object: Option<&ObjectPath>,
        cancel: Option<CancellationToken>,
    ) -> Result<RemoteObject> {
        let call = MethodCall::new(manager_path()?, iface::MANAGER, "ActivateConnection")
            .arg(Arg::path(connection))
            .arg(Arg::path(device))
            .arg(Arg::path(specific_object));
        let done = self.call_object(call, call::first_path, cancel).await?;
        Ok(done.object)
    }

    /// Adds a connection profile and activates it in one call.
    pub async fn add_and_activate_connection(
        &self,
        settings: &ConnectionSettings,
        device: Option<&ObjectPath>,
        specific_object: Option<&ObjectPath>,
        cancel: Option<CancellationToken>,
    ) -> Result<AddAndActivateResult> {
        let call = MethodCall::new(manager_path()?, iface::MANAGER, "AddAndActivateConnection")
            .arg(Arg::Settings(settings.clone()))
            .arg(Arg::path(device))
            .arg(Arg::path(specific_object));
        let done = self
            .call_object(call, call::added_and_activated, cancel)
            .await?;
        into_add_result(done)
    }

    /// As [`add_and_activate_connection`](Self::add_and_activate_connection),
    /// with an options dictionary (e.g. `persist`, `bind-activation`).
    pub async fn add_and_activate_connection2(
        &self,
        settings: &ConnectionSettings,
        device: Option<&ObjectPath>,
        specific_object: Option<&ObjectPath>,
        options: PropertyBag,
        cancel: Option<CancellationToken>,
    ) -> Result<AddAndActivateResult> {
        let call = MethodCall::new(manager_path()?, iface::MANAGER, "AddAndActivateConnection2")
            .arg(Arg::Settings(settings.clone()))
            .arg(Arg::path(device))
            .arg(Arg::path(specific_object))
            .arg(Arg::Dict(options));
        let done = self
            .call_object(call, call::added_and_activated2, cancel)
            .await?;
        into_add_result(done)
    }

    /// Adds a connection profile, saved to disk if `persist` is set.
    ///
    /// Resolves once the profile is visible to this client.
    pub async fn add_connection(
        &self,
        settings: &ConnectionSettings,
        persist: bool,
        cancel: Option<CancellationToken>,
    ) -> Result<RemoteObject> {
        let method = if persist {
            "AddConnection"
        } else {
            "AddConnectionUnsaved"
        };
        let call = MethodCall::new(settings_path()?, iface::SETTINGS, method)
            .arg(Arg::Settings(settings.clone()));
        let done = self.call_object(call, call::first_path, cancel).await?;
        Ok(done.object)
    }

    /// Deactivates an active connection.
    pub async fn deactivate_connection(
        &self,
        active: &ObjectPath,
        cancel: Option<CancellationToken>,
    ) -> Result<()> {
        let call = MethodCall::new(manager_path()?, iface::MANAGER, "DeactivateConnection")
            .arg(Arg::path(Some(active)));
        self.call_raw(call, cancel).await?;
        Ok(())
    }

    /// Creates a configuration checkpoint over `devices` (all devices if empty).
    ///
    /// `rollback_timeout` is in seconds; zero disables automatic rollback.
    pub async fn checkpoint_create(
        &self,
        devices: &[ObjectPath],
        rollback_timeout: u32,
        flags: CheckpointCreateFlags,
        cancel: Option<CancellationToken>,
    ) -> Result<RemoteObject> {
        let call = MethodCall::new(manager_path()?, iface::MANAGER, "CheckpointCreate")
            .arg(PropValue::PathList(devices.to_vec()))
            .arg(PropValue::U32(rollback_timeout))
            .arg(PropValue::U32(flags.bits()));
        let done = self.call_object(call, call::first_path, cancel).await?;
        Ok(done.object)
    }

    /// Destroys a checkpoint without rolling back.
    pub async fn checkpoint_destroy(
        &self,
        checkpoint: &ObjectPath,
        cancel: Option<CancellationToken>,
    ) -> Result<()> {
        let call = MethodCall::new(manager_path()?, iface::MANAGER, "CheckpointDestroy")
            .arg(Arg::path(Some(checkpoint)));
        self.call_raw(call, cancel).await?;
        Ok(())
    }

    /// Rolls back to a checkpoint.
    ///
    /// Returns the per-device result codes keyed by device path.
    pub async fn checkpoint_rollback(
        &self,
        checkpoint: &ObjectPath,
        cancel: Option<CancellationToken>,
    ) -> Result<BTreeMap<String, u32>> {
        let call = MethodCall::new(manager_path()?, iface::MANAGER, "CheckpointRollback")
            .arg(Arg::path(Some(checkpoint)));
        let reply = self.call_raw(call, cancel).await?;
        let results = reply
            .first()
            .and_then(Arg::as_dict)
            .ok_or_else(|| Error::UnexpectedReply("expected rollback results".into()))?;
        Ok(results
            .iter()
            .filter_map(|(dev, code)| code.as_u32().map(|c| (dev.clone(), c)))
            .collect())
    }

    /// All visible devices.
    pub async fn devices(&self) -> Result<Vec<RemoteObject>> {
        self.visible(|o| o.kind().is_device()).await
    }

    /// All visible active connections, VPN connections included.
    pub async fn active_connections(&self) -> Result<Vec<RemoteObject>> {
        self.visible(|o| o.kind().is_active_connection()).await
    }

    /// Connection profiles this client is allowed to see.
    pub async fn connections(&self) -> Result<Vec<RemoteObject>> {
        self.visible(|o| o.kind() == ObjectKind::Connection).await
    }

    /// Looks up a visible connection profile by its `connection.id`.
    pub async fn connection_by_id(&self, id: &str) -> Result<Option<RemoteObject>> {
        let id = id.to_owned();
        let found = self
            .visible(move |o| o.kind() == ObjectKind::Connection && o.connection_id() == Some(id.as_str()))
            .await?;
        Ok(found.into_iter().next())
    }

    /// Looks up a visible connection profile by its `connection.uuid`.
    pub async fn connection_by_uuid(&self, uuid: &str) -> Result<Option<RemoteObject>> {
        let uuid = uuid.to_owned();
        let found = self
            .visible(move |o| {
                o.kind() == ObjectKind::Connection && o.connection_uuid() == Some(uuid.as_str())
            })
            .await?;
        Ok(found.into_iter().next())
    }

    /// Looks up a visible connection profile by path.
    pub async fn connection_by_path(&self, path: &ObjectPath) -> Result<Option<RemoteObject>> {
        Ok(match self.object(path).await? {
            Lookup::Live(o) if o.kind() == ObjectKind::Connection => Some(o),
            _ => None,
        })
    }

    /// The cache's view of `path`.
    pub async fn object(&self, path: &ObjectPath) -> Result<Lookup> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Lookup {
            path: path.clone(),
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Waits until `path` is initialized and visible.
    pub async fn wait_for_object(
        &self,
        path: &ObjectPath,
        cancel: Option<CancellationToken>,
    ) -> Result<RemoteObject> {
        let (tx, rx) = oneshot::channel();
        let path = path.clone();
        let done = self
            .submit(
                move |cancel| Request::WaitFor {
                    path,
                    reply: tx,
                    cancel,
                },
                rx,
                cancel,
            )
            .await?;
        Ok(done.object)
    }

    /// Waits for an active connection to settle.
    ///
    /// Returns [`ActiveConnectionState::Activated`] or
    /// [`ActiveConnectionState::Deactivated`]; an object that disappears
    /// counts as deactivated. `timeout` defaults to 30 seconds.
    pub async fn wait_for_activation(
        &self,
        active: &ObjectPath,
        timeout: Option<Duration>,
    ) -> Result<ActiveConnectionState> {
        // Subscribe first so no transition slips between the check and the wait.
        let mut events = self.subscribe();
        debug!("Subscribed to cache events for {active}");

        if let Some(state) = self.settled_state(active).await? {
            debug!("{active} already settled: {state}");
            return Ok(state);
        }

        let limit = timeout.unwrap_or_else(timeouts::activation_wait);
        let mut delay = pin!(Delay::new(limit).fuse());

        loop {
            let event = select! {
                ev = events.recv().fuse() => ev,
                _ = delay => {
                    warn!("Timed out after {limit:?} waiting for {active} to settle");
                    return Err(Error::Timeout);
                }
            };

            match event {
                Ok(CacheEvent::PropertyChanged { path, name }) if path == *active && name == "State" => {
                    if let Some(state) = self.settled_state(active).await? {
                        return Ok(state);
                    }
                }
                Ok(CacheEvent::Removed { path, .. } | CacheEvent::Evicted { path }) if path == *active => {
                    debug!("{active} went away while waiting");
                    return Ok(ActiveConnectionState::Deactivated);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    warn!("Missed {n} cache events; re-checking {active}");
                    if let Some(state) = self.settled_state(active).await? {
                        return Ok(state);
                    }
                }
                Err(RecvError::Closed) => return Err(Error::Shutdown),
            }
        }
    }

    async fn settled_state(&self, active: &ObjectPath) -> Result<Option<ActiveConnectionState>> {
        Ok(match self.object(active).await? {
            Lookup::Live(o) => match o.active_state() {
                Some(s @ (ActiveConnectionState::Activated | ActiveConnectionState::Deactivated)) => {
                    Some(s)
                }
                _ => None,
            },
            Lookup::Pending => None,
            Lookup::Removed => Some(ActiveConnectionState::Deactivated),
        })
    }

    async fn visible<F>(&self, filter: F) -> Result<Vec<RemoteObject>>
    where
        F: Fn(&RemoteObject) -> bool + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let filter: ObjectFilter = Box::new(filter);
        self.send(Request::Visible { filter, reply: tx }).await?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    async fn call_object(
        &self,
        call: MethodCall,
        extract: Extract,
        cancel: Option<CancellationToken>,
    ) -> Result<Materialized> {
        let (tx, rx) = oneshot::channel();
        let completion = Completion::Object { extract, reply: tx };
        self.submit(
            move |cancel| Request::Call {
                call,
                completion,
                cancel,
            },
            rx,
            cancel,
        )
        .await
    }

    async fn call_raw(&self, call: MethodCall, cancel: Option<CancellationToken>) -> Result<Vec<Arg>> {
        let (tx, rx) = oneshot::channel();
        let completion = Completion::Reply(tx);
        self.submit(
            move |cancel| Request::Call {
                call,
                completion,
                cancel,
            },
            rx,
            cancel,
        )
        .await
    }

    async fn send(&self, req: Request) -> Result<()> {
        self.requests.send(req).await.map_err(|_| Error::Shutdown)
    }

    /// Sends a request and waits for its reply, honouring the caller's
    /// token and the configured wait timeout.
    async fn submit<T>(
        &self,
        make: impl FnOnce(Option<CancellationToken>) -> Request,
        rx: oneshot::Receiver<Result<T>>,
        cancel: Option<CancellationToken>,
    ) -> Result<T> {
        let token = match (&cancel, self.config.wait_timeout) {
            (Some(parent), _) => Some(parent.child_token()),
            (None, Some(_)) => Some(CancellationToken::new()),
            (None, None) => None,
        };
        self.send(make(token.clone())).await?;

        let Some(limit) = self.config.wait_timeout else {
            return rx.await.map_err(|_| Error::Shutdown)?;
        };

        let mut rx = rx.fuse();
        let mut delay = Delay::new(limit).fuse();
        let early = select! {
            r = rx => Some(r),
            _ = delay => None,
        };
        match early {
            Some(r) => r.map_err(|_| Error::Shutdown)?,
            None => {
                warn!("Call did not complete within {limit:?}; cancelling");
                if let Some(token) = &token {
                    token.cancel();
                }
                match rx.await {
                    Ok(Err(Error::Cancelled)) => Err(Error::Timeout),
                    Ok(r) => r,
                    Err(_) => Err(Error::Shutdown),
                }
            }
        }
    }
}

fn manager_path() -> Result<ObjectPath> {
    ObjectPath::new(bus::NM_PATH)
}

fn settings_path() -> Result<ObjectPath> {
    ObjectPath::new(bus::NM_SETTINGS_PATH)
}

fn into_add_result(done: Materialized) -> Result<AddAndActivateResult> {
    let connection = done
        .payload
        .connection
        .ok_or_else(|| Error::UnexpectedReply("missing connection path".into()))?;
    Ok(AddAndActivateResult {
        connection,
        active: done.object,
        result: done.payload.result,
    })
}
