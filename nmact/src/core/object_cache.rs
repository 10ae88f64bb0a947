//! Client-side mirror of NetworkManager's remote objects.
//!
//! The cache is the single owner of every [`RemoteObject`]; everything else
//! holds an [`ObjectPath`] and looks objects up here. Each path maps to at
//! most one instance.
//!
//! An object enters as *initializing* when the transport first reports it,
//! and becomes *ready* once its properties (and, for connection profiles,
//! settings) have been fetched. A ready object is *visible* unless it is a
//! connection profile the caller may not read. Only visible objects are
//! announced with [`CacheEvent::Added`], and only they satisfy a
//! [`wait_for`](ObjectCache::wait_for).
//!
//! The visible set is always a subset of the known set: dropping a visible
//! object first emits [`CacheEvent::Removed`], then [`CacheEvent::Evicted`].

use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{broadcast, oneshot};

use crate::api::models::{
    ActiveConnectionState, CacheEvent, ConnectionSettings, DeviceState, Error, HardwareInfo,
    ObjectKind, ObjectPath, PropValue, PropertyBag, Result,
};
use crate::types::object_registry::is_known_property;
use crate::util::sysfs::read_hardware_info;

/// A mirrored remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    path: ObjectPath,
    kind: ObjectKind,
    properties: PropertyBag,
    settings: Option<ConnectionSettings>,
    visible: bool,
    hardware: Option<HardwareInfo>,
}

impl RemoteObject {
    fn new(path: ObjectPath, kind: ObjectKind) -> Self {
        Self {
            path,
            kind,
            properties: PropertyBag::new(),
            settings: None,
            visible: false,
            hardware: None,
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn property(&self, name: &str) -> Option<&PropValue> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    /// Whether the caller may see this object. Always `true` for kinds
    /// without settings once initialized.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// The connection profile. `None` unless this is a visible connection.
    pub fn settings(&self) -> Option<&ConnectionSettings> {
        if self.visible { self.settings.as_ref() } else { None }
    }

    /// Hardware details for devices, when probing is enabled.
    pub fn hardware(&self) -> Option<&HardwareInfo> {
        self.hardware.as_ref()
    }

    /// `connection.id` of a visible profile.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_field("id")
    }

    /// `connection.uuid` of a visible profile.
    pub fn connection_uuid(&self) -> Option<&str> {
        self.connection_field("uuid")
    }

    fn connection_field(&self, key: &str) -> Option<&str> {
        self.settings()?.get("connection")?.get(key)?.as_str()
    }

    /// `Interface` of a device.
    pub fn interface(&self) -> Option<&str> {
        self.property("Interface").and_then(PropValue::as_str)
    }

    /// `State` of an active connection.
    pub fn active_state(&self) -> Option<ActiveConnectionState> {
        if !self.kind.is_active_connection() {
            return None;
        }
        self.property("State")
            .and_then(PropValue::as_u32)
            .map(ActiveConnectionState::from)
    }

    /// `State` of a device.
    pub fn device_state(&self) -> Option<DeviceState> {
        if !self.kind.is_device() {
            return None;
        }
        self.property("State")
            .and_then(PropValue::as_u32)
            .map(DeviceState::from)
    }
}

/// Result of looking an identity up in the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Ready and visible.
    Live(RemoteObject),
    /// Known, but still initializing or not visible to this caller.
    Pending,
    /// Not (or no longer) in the cache.
    Removed,
}

/// What the transport learned about a connection profile's settings.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsAccess {
    /// The object kind has no settings.
    NotApplicable,
    /// Settings were readable.
    Visible(ConnectionSettings),
    /// Reading settings was denied.
    Hidden,
}

/// Extra data from the call that started a wait, returned with the object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaitPayload {
    /// Connection path returned alongside an active connection.
    pub connection: Option<ObjectPath>,
    /// Extra result dictionary (`AddAndActivateConnection2`).
    pub result: Option<PropertyBag>,
}

/// A completed wait.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub object: RemoteObject,
    pub payload: WaitPayload,
}

pub(crate) type WaitReply = oneshot::Sender<Result<Materialized>>;

/// Identity of one registered wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaitId(u64);

struct Waiter {
    id: WaitId,
    payload: WaitPayload,
    reply: WaitReply,
}

impl Waiter {
    fn complete(self, result: Result<RemoteObject>) {
        let result = result.map(|object| Materialized {
            object,
            payload: self.payload,
        });
        if self.reply.send(result).is_err() {
            debug!("Waiter {:?} went away before completion", self.id);
        }
    }
}

/// Waiters queued on one identity.
#[derive(Default)]
struct PendingAdd {
    waiters: Vec<Waiter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Initializing,
    Ready,
}

struct Slot {
    object: RemoteObject,
    state: SlotState,
}

const REMOVED_BEFORE_INIT: &str = "Connection removed before it was initialized";

/// The object registry.
pub(crate) struct ObjectCache {
    all: HashMap<ObjectPath, Slot>,
    visible: Vec<ObjectPath>,
    pending: HashMap<ObjectPath, PendingAdd>,
    // Waits completed since the last `take_settled`.
    settled: Vec<WaitId>,
    next_wait: u64,
    hardware_root: Option<PathBuf>,
    events: broadcast::Sender<CacheEvent>,
}

impl ObjectCache {
    /// `hardware_root` enables sysfs lookups for devices.
    pub(crate) fn new(events: broadcast::Sender<CacheEvent>, hardware_root: Option<PathBuf>) -> Self {
        Self {
            all: HashMap::new(),
            visible: Vec::new(),
            pending: HashMap::new(),
            settled: Vec::new(),
            next_wait: 0,
            hardware_root,
            events,
        }
    }

    fn emit(&self, event: CacheEvent) {
        debug!("Cache event: {event:?}");
        let _ = self.events.send(event);
    }

    /// Returns the instance for `path`, creating an initializing one if
    /// needed. The flag is `true` when a new instance was created.
    pub(crate) fn resolve_or_create(&mut self, path: &ObjectPath, kind: ObjectKind) -> (&RemoteObject, bool) {
        let mut created = false;
        let slot = self.all.entry(path.clone()).or_insert_with(|| {
            created = true;
            Slot {
                object: RemoteObject::new(path.clone(), kind),
                state: SlotState::Initializing,
            }
        });
        if !created && slot.object.kind != kind {
            debug!(
                "{path} already cached as {}; ignoring kind hint {kind}",
                slot.object.kind
            );
        }
        (&slot.object, created)
    }

    /// Completes initialization of `path`.
    pub(crate) fn finish_init(&mut self, path: &ObjectPath, properties: PropertyBag, access: SettingsAccess) {
        let Some(slot) = self.all.get_mut(path) else {
            debug!("Initialization finished for evicted object {path}");
            return;
        };
        let kind = slot.object.kind;
        slot.object.properties = properties
            .into_iter()
            .filter(|(name, _)| is_known_property(kind, name))
            .collect();
        slot.state = SlotState::Ready;

        if kind.is_device()
            && let Some(root) = &self.hardware_root
            && let Some(iface) = slot.object.interface()
        {
            slot.object.hardware = read_hardware_info(root, iface);
        }

        self.apply_access(path, access);
    }

    /// Applies a settings refresh (`Updated` signal) to a ready object.
    pub(crate) fn update_settings(&mut self, path: &ObjectPath, access: SettingsAccess) {
        match self.all.get(path) {
            Some(slot) if slot.state == SlotState::Ready => self.apply_access(path, access),
            Some(_) => debug!("Settings update for initializing object {path}"),
            None => debug!("Settings update for unknown object {path}"),
        }
    }

    fn apply_access(&mut self, path: &ObjectPath, access: SettingsAccess) {
        let Some(slot) = self.all.get_mut(path) else {
            return;
        };
        let was_visible = slot.object.visible;
        let (now_visible, settings) = match access {
            SettingsAccess::NotApplicable => (true, None),
            SettingsAccess::Visible(settings) => (true, Some(settings)),
            SettingsAccess::Hidden => (false, None),
        };
        slot.object.visible = now_visible;
        slot.object.settings = settings;
        let kind = slot.object.kind;

        match (was_visible, now_visible) {
            (false, true) => {
                self.visible.push(path.clone());
                self.emit(CacheEvent::Added {
                    path: path.clone(),
                    kind,
                });
                self.complete_waiters(path);
            }
            (true, false) => {
                self.visible.retain(|p| p != path);
                self.emit(CacheEvent::Removed {
                    path: path.clone(),
                    kind,
                });
            }
            _ => {}
        }
    }

    fn complete_waiters(&mut self, path: &ObjectPath) {
        let Some(pending) = self.pending.remove(path) else {
            return;
        };
        let Some(object) = self.all.get(path).map(|s| s.object.clone()) else {
            return;
        };
        for waiter in pending.waiters {
            self.settle(waiter, Ok(object.clone()));
        }
    }

    fn settle(&mut self, waiter: Waiter, result: Result<RemoteObject>) {
        self.settled.push(waiter.id);
        waiter.complete(result);
    }

    fn fail_waiters(&mut self, path: &ObjectPath, message: &str) {
        if let Some(pending) = self.pending.remove(path) {
            for waiter in pending.waiters {
                self.settle(waiter, Err(Error::ObjectCreationFailed(message.to_owned())));
            }
        }
    }

    /// Applies a property change. Unknown properties are ignored.
    pub(crate) fn property_changed(&mut self, path: &ObjectPath, name: &str, value: PropValue) {
        let Some(slot) = self.all.get_mut(path) else {
            return;
        };
        if !is_known_property(slot.object.kind, name) {
            debug!("Ignoring unknown property {name} on {path}");
            return;
        }
        slot.object.properties.insert(name.to_owned(), value);
        if slot.state == SlotState::Ready && slot.object.visible {
            self.emit(CacheEvent::PropertyChanged {
                path: path.clone(),
                name: name.to_owned(),
            });
        }
    }

    /// Drops `path` after the transport reported its removal.
    pub(crate) fn on_object_removed(&mut self, path: &ObjectPath) {
        self.evict(path);
        self.fail_waiters(path, REMOVED_BEFORE_INIT);
    }

    /// Drops `path` after its initialization failed.
    pub(crate) fn on_init_failed(&mut self, path: &ObjectPath, message: &str) {
        warn!("Failed to initialize {path}: {message}");
        self.evict(path);
        self.fail_waiters(path, message);
    }

    fn evict(&mut self, path: &ObjectPath) {
        let Some(slot) = self.all.remove(path) else {
            return;
        };
        if slot.object.visible {
            self.visible.retain(|p| p != path);
            self.emit(CacheEvent::Removed {
                path: path.clone(),
                kind: slot.object.kind,
            });
        }
        self.emit(CacheEvent::Evicted { path: path.clone() });
    }

    /// Waits for `path` to become ready and visible.
    ///
    /// Completes right away if it already is. A second wait on the same
    /// identity queues behind the first.
    pub(crate) fn wait_for(&mut self, path: &ObjectPath, payload: WaitPayload, reply: WaitReply) -> WaitId {
        let id = WaitId(self.next_wait);
        self.next_wait += 1;
        let waiter = Waiter { id, payload, reply };

        match self.lookup(path) {
            Lookup::Live(object) => {
                debug!("{path} already materialized");
                self.settle(waiter, Ok(object));
            }
            _ => {
                self.pending.entry(path.clone()).or_default().waiters.push(waiter);
            }
        }
        id
    }

    /// Cancels one wait. Returns `false` if it already completed.
    pub(crate) fn cancel_wait(&mut self, id: WaitId) -> bool {
        let found = self.pending.iter().find_map(|(path, pending)| {
            pending
                .waiters
                .iter()
                .position(|w| w.id == id)
                .map(|idx| (path.clone(), idx))
        });
        let Some((path, idx)) = found else {
            return false;
        };
        let Some(pending) = self.pending.get_mut(&path) else {
            return false;
        };
        let waiter = pending.waiters.remove(idx);
        if pending.waiters.is_empty() {
            self.pending.remove(&path);
        }
        debug!("Wait for {path} cancelled");
        self.settle(waiter, Err(Error::Cancelled));
        true
    }

    /// Drains the ids of waits that completed, failed or were cancelled.
    pub(crate) fn take_settled(&mut self) -> Vec<WaitId> {
        std::mem::take(&mut self.settled)
    }

    /// Forgets everything, e.g. after the service left the bus.
    pub(crate) fn reset(&mut self) {
        info!("Resetting object cache ({} objects)", self.all.len());
        let paths: Vec<ObjectPath> = self.all.keys().cloned().collect();
        // Visible objects go first so subscribers see Removed before Evicted.
        let (visible, hidden): (Vec<_>, Vec<_>) = paths
            .into_iter()
            .partition(|p| self.visible.contains(p));
        for path in visible.iter().chain(hidden.iter()) {
            self.evict(path);
        }
        let pending: Vec<ObjectPath> = self.pending.keys().cloned().collect();
        for path in pending {
            self.fail_waiters(&path, "NetworkManager left the bus");
        }
    }

    pub(crate) fn lookup(&self, path: &ObjectPath) -> Lookup {
        match self.all.get(path) {
            Some(slot) if slot.state == SlotState::Ready && slot.object.visible => {
                Lookup::Live(slot.object.clone())
            }
            Some(_) => Lookup::Pending,
            None => Lookup::Removed,
        }
    }

    /// Visible objects matching `filter`, in the order they became visible.
    pub(crate) fn visible_where(&self, filter: impl Fn(&RemoteObject) -> bool) -> Vec<RemoteObject> {
        self.visible
            .iter()
            .filter_map(|p| self.all.get(p))
            .map(|slot| &slot.object)
            .filter(|o| filter(o))
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn is_known(&self, path: &ObjectPath) -> bool {
        self.all.contains_key(path)
    }

    #[cfg(test)]
    pub(crate) fn known_count(&self) -> usize {
        self.all.len()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.values().map(|p| p.waiters.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::DeviceKind;
    use std::collections::BTreeMap;

    fn path(s: &str) -> ObjectPath {
        ObjectPath::new(s).unwrap()
    }

    fn cache() -> (ObjectCache, broadcast::Receiver<CacheEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (ObjectCache::new(tx, None), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<CacheEvent>) -> Vec<CacheEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn settings(id: &str) -> ConnectionSettings {
        let mut conn = BTreeMap::new();
        conn.insert("id".to_string(), PropValue::from(id));
        let mut s = ConnectionSettings::new();
        s.insert("connection".to_string(), conn);
        s
    }

    #[test]
    fn resolve_deduplicates_identity() {
        let (mut cache, _rx) = cache();
        let p = path("/org/freedesktop/NetworkManager/Devices/1");
        let kind = ObjectKind::Device(DeviceKind::Ethernet);
        assert!(cache.resolve_or_create(&p, kind).1);
        assert!(!cache.resolve_or_create(&p, ObjectKind::AccessPoint).1);
        assert_eq!(cache.known_count(), 1);
        assert_eq!(cache.resolve_or_create(&p, kind).0.kind(), kind);
    }

    #[test]
    fn unknown_properties_are_dropped() {
        let (mut cache, mut rx) = cache();
        let p = path("/org/freedesktop/NetworkManager/ActiveConnection/4");
        cache.resolve_or_create(&p, ObjectKind::ActiveConnection);
        let mut props = PropertyBag::new();
        props.insert("State".into(), PropValue::U32(1));
        props.insert("Bogus".into(), PropValue::U32(9));
        cache.finish_init(&p, props, SettingsAccess::NotApplicable);

        let Lookup::Live(obj) = cache.lookup(&p) else {
            panic!("expected live object");
        };
        assert_eq!(obj.active_state(), Some(ActiveConnectionState::Activating));
        assert!(obj.property("Bogus").is_none());

        drain(&mut rx);
        cache.property_changed(&p, "Bogus", PropValue::U32(1));
        cache.property_changed(&p, "State", PropValue::U32(2));
        assert_eq!(
            drain(&mut rx),
            [CacheEvent::PropertyChanged {
                path: p.clone(),
                name: "State".into()
            }]
        );
    }

    #[test]
    fn hidden_connection_exposes_no_settings() {
        let (mut cache, mut rx) = cache();
        let p = path("/org/freedesktop/NetworkManager/Settings/7");
        cache.resolve_or_create(&p, ObjectKind::Connection);
        cache.finish_init(&p, PropertyBag::new(), SettingsAccess::Hidden);
        assert_eq!(cache.lookup(&p), Lookup::Pending);
        assert!(drain(&mut rx).is_empty());
        assert!(cache.visible_where(|_| true).is_empty());
    }

    #[test]
    fn visibility_flip_emits_exactly_one_event_each_way() {
        let (mut cache, mut rx) = cache();
        let p = path("/org/freedesktop/NetworkManager/Settings/3");
        cache.resolve_or_create(&p, ObjectKind::Connection);
        cache.finish_init(&p, PropertyBag::new(), SettingsAccess::Hidden);
        drain(&mut rx);

        cache.update_settings(&p, SettingsAccess::Visible(settings("Home")));
        assert_eq!(
            drain(&mut rx),
            [CacheEvent::Added {
                path: p.clone(),
                kind: ObjectKind::Connection
            }]
        );

        // Settings refresh without a visibility change is silent.
        cache.update_settings(&p, SettingsAccess::Visible(settings("Home 2")));
        assert!(drain(&mut rx).is_empty());

        cache.update_settings(&p, SettingsAccess::Hidden);
        assert_eq!(
            drain(&mut rx),
            [CacheEvent::Removed {
                path: p.clone(),
                kind: ObjectKind::Connection
            }]
        );
        assert!(cache.is_known(&p));
        assert_eq!(cache.lookup(&p), Lookup::Pending);
    }

    #[test]
    fn removal_of_visible_object_is_two_steps() {
        let (mut cache, mut rx) = cache();
        let p = path("/org/freedesktop/NetworkManager/Settings/3");
        cache.resolve_or_create(&p, ObjectKind::Connection);
        cache.finish_init(&p, PropertyBag::new(), SettingsAccess::Visible(settings("x")));
        drain(&mut rx);

        cache.on_object_removed(&p);
        assert_eq!(
            drain(&mut rx),
            [
                CacheEvent::Removed {
                    path: p.clone(),
                    kind: ObjectKind::Connection
                },
                CacheEvent::Evicted { path: p.clone() },
            ]
        );
        assert_eq!(cache.lookup(&p), Lookup::Removed);
    }

    #[test]
    fn wait_for_completes_when_object_becomes_visible() {
        let (mut cache, _rx) = cache();
        let p = path("/org/freedesktop/NetworkManager/Settings/9");
        let (tx, mut rx) = oneshot::channel();
        let payload = WaitPayload {
            connection: Some(p.clone()),
            result: None,
        };
        cache.wait_for(&p, payload.clone(), tx);
        assert_eq!(cache.pending_count(), 1);

        cache.resolve_or_create(&p, ObjectKind::Connection);
        cache.finish_init(&p, PropertyBag::new(), SettingsAccess::Hidden);
        assert!(rx.try_recv().is_err());

        cache.update_settings(&p, SettingsAccess::Visible(settings("Work")));
        let done = rx.try_recv().unwrap().unwrap();
        assert_eq!(done.object.connection_id(), Some("Work"));
        assert_eq!(done.payload, payload);
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn wait_for_existing_object_fires_without_duplicating() {
        let (mut cache, _rx) = cache();
        let p = path("/org/freedesktop/NetworkManager/Devices/2");
        let kind = ObjectKind::Device(DeviceKind::Wifi);
        cache.resolve_or_create(&p, kind);
        cache.finish_init(&p, PropertyBag::new(), SettingsAccess::NotApplicable);

        let (tx, mut rx) = oneshot::channel();
        cache.wait_for(&p, WaitPayload::default(), tx);
        assert_eq!(rx.try_recv().unwrap().unwrap().object.path(), &p);
        assert_eq!(cache.known_count(), 1);
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn waits_on_same_identity_queue() {
        let (mut cache, _rx) = cache();
        let p = path("/org/freedesktop/NetworkManager/Checkpoint/1");
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        cache.wait_for(&p, WaitPayload::default(), tx1);
        cache.wait_for(&p, WaitPayload::default(), tx2);
        assert_eq!(cache.pending.len(), 1);

        cache.resolve_or_create(&p, ObjectKind::Checkpoint);
        cache.finish_init(&p, PropertyBag::new(), SettingsAccess::NotApplicable);
        assert!(rx1.try_recv().unwrap().is_ok());
        assert!(rx2.try_recv().unwrap().is_ok());
    }

    #[test]
    fn cancelled_wait_completes_once_and_ignores_later_arrival() {
        let (mut cache, _rx) = cache();
        let p = path("/org/freedesktop/NetworkManager/ActiveConnection/5");
        let (tx, mut rx) = oneshot::channel();
        let id = cache.wait_for(&p, WaitPayload::default(), tx);

        assert!(cache.cancel_wait(id));
        assert!(!cache.cancel_wait(id));
        assert_eq!(rx.try_recv().unwrap(), Err(Error::Cancelled));

        cache.resolve_or_create(&p, ObjectKind::ActiveConnection);
        cache.finish_init(&p, PropertyBag::new(), SettingsAccess::NotApplicable);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn removal_before_init_fails_waiters() {
        let (mut cache, _rx) = cache();
        let p = path("/org/freedesktop/NetworkManager/Settings/11");
        let (tx, mut rx) = oneshot::channel();
        cache.wait_for(&p, WaitPayload::default(), tx);
        cache.resolve_or_create(&p, ObjectKind::Connection);
        cache.on_object_removed(&p);
        assert_eq!(
            rx.try_recv().unwrap(),
            Err(Error::ObjectCreationFailed(REMOVED_BEFORE_INIT.into()))
        );
    }

    #[test]
    fn init_failure_fails_waiters() {
        let (mut cache, _rx) = cache();
        let p = path("/org/freedesktop/NetworkManager/Devices/8");
        let (tx, mut rx) = oneshot::channel();
        cache.resolve_or_create(&p, ObjectKind::Device(DeviceKind::Generic));
        cache.wait_for(&p, WaitPayload::default(), tx);
        cache.on_init_failed(&p, "GetAll failed");
        assert_eq!(
            rx.try_recv().unwrap(),
            Err(Error::ObjectCreationFailed("GetAll failed".into()))
        );
        assert_eq!(cache.lookup(&p), Lookup::Removed);
    }

    #[test]
    fn reset_removes_visible_before_evicting() {
        let (mut cache, mut rx) = cache();
        let dev = path("/org/freedesktop/NetworkManager/Devices/1");
        let hidden = path("/org/freedesktop/NetworkManager/Settings/1");
        let waiting = path("/org/freedesktop/NetworkManager/Settings/2");
        cache.resolve_or_create(&dev, ObjectKind::Device(DeviceKind::Ethernet));
        cache.finish_init(&dev, PropertyBag::new(), SettingsAccess::NotApplicable);
        cache.resolve_or_create(&hidden, ObjectKind::Connection);
        cache.finish_init(&hidden, PropertyBag::new(), SettingsAccess::Hidden);
        let (tx, mut wait_rx) = oneshot::channel();
        cache.wait_for(&waiting, WaitPayload::default(), tx);
        drain(&mut rx);

        cache.reset();
        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            CacheEvent::Removed {
                path: dev.clone(),
                kind: ObjectKind::Device(DeviceKind::Ethernet)
            }
        );
        assert_eq!(events[1], CacheEvent::Evicted { path: dev.clone() });
        assert_eq!(events[2], CacheEvent::Evicted { path: hidden.clone() });
        assert_eq!(events.len(), 3);
        assert_eq!(cache.known_count(), 0);
        assert!(matches!(
            wait_rx.try_recv().unwrap(),
            Err(Error::ObjectCreationFailed(_))
        ));
    }

    #[test]
    fn visible_set_stays_subset_of_known() {
        let (mut cache, _rx) = cache();
        for i in 0..6 {
            let p = path(&format!("/org/freedesktop/NetworkManager/Settings/{i}"));
            cache.resolve_or_create(&p, ObjectKind::Connection);
            let access = if i % 2 == 0 {
                SettingsAccess::Visible(settings("x"))
            } else {
                SettingsAccess::Hidden
            };
            cache.finish_init(&p, PropertyBag::new(), access);
            if i % 3 == 0 {
                cache.on_object_removed(&p);
            }
        }
        for p in &cache.visible {
            assert!(cache.all.contains_key(p));
        }
        assert_eq!(cache.visible_where(|_| true).len(), 2);
    }
}
