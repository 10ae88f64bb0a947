use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use thiserror::Error;
use uuid::Uuid;

use crate::util::utils::strip_remote_error;

/// A D-Bus object path identifying a remote object.
///
/// Identities are immutable once created; the cache keys every
/// [`RemoteObject`](crate::RemoteObject) by one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Validates and wraps an object path.
    ///
    /// Paths must start with `/`, must not end with `/` (except the root)
    /// and may only contain `[A-Za-z0-9_]` elements.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if is_valid_object_path(&path) {
            Ok(Self(path))
        } else {
            Err(Error::InvalidObjectPath(path))
        }
    }

    /// The root path `/`, used on the wire to mean "no object".
    pub fn root() -> Self {
        Self("/".into())
    }

    /// Returns `true` for the `/` placeholder.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/').all(|elem| {
        !elem.is_empty() && elem.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

impl TryFrom<&str> for ObjectPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl Display for ObjectPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A remotely-sourced property value.
///
/// Only the shapes NetworkManager actually publishes are represented;
/// anything else is dropped by the transport when decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    Bool(bool),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Str(String),
    Path(ObjectPath),
    Bytes(Vec<u8>),
    U32List(Vec<u32>),
    StrList(Vec<String>),
    PathList(Vec<ObjectPath>),
}

impl PropValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&ObjectPath> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_paths(&self) -> Option<&[ObjectPath]> {
        match self {
            Self::PathList(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_u32_list(&self) -> Option<&[u32]> {
        match self {
            Self::U32List(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u32> for PropValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<ObjectPath> for PropValue {
    fn from(v: ObjectPath) -> Self {
        Self::Path(v)
    }
}

impl From<Vec<u32>> for PropValue {
    fn from(v: Vec<u32>) -> Self {
        Self::U32List(v)
    }
}

impl From<Vec<ObjectPath>> for PropValue {
    fn from(v: Vec<ObjectPath>) -> Self {
        Self::PathList(v)
    }
}

/// Property name to value, as delivered by the transport.
pub type PropertyBag = BTreeMap<String, PropValue>;

/// An opaque connection profile: setting name to key/value section.
pub type ConnectionSettings = BTreeMap<String, BTreeMap<String, PropValue>>;

/// Stable identity of one activation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Activation stages, in their fixed total order.
///
/// A request only ever moves forward through this list, or jumps straight
/// to `Failed` / `Cancelled` from any non-terminal stage. An `Activated`
/// request whose link goes down moves on to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActStage {
    Unknown,
    DevicePrepare,
    DeviceConfig,
    NeedUserKey,
    IpConfigStart,
    IpConfigGet,
    IpConfigCommit,
    Activated,
    Failed,
    Cancelled,
}

impl ActStage {
    /// Returns `true` once activation has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Activated | Self::Failed | Self::Cancelled)
    }

    /// The stage that follows this one in the forward order.
    pub(crate) fn successor(self) -> Option<Self> {
        match self {
            Self::Unknown => Some(Self::DevicePrepare),
            Self::DevicePrepare => Some(Self::DeviceConfig),
            Self::DeviceConfig => Some(Self::NeedUserKey),
            Self::NeedUserKey => Some(Self::IpConfigStart),
            Self::IpConfigStart => Some(Self::IpConfigGet),
            Self::IpConfigGet => Some(Self::IpConfigCommit),
            Self::IpConfigCommit => Some(Self::Activated),
            Self::Activated | Self::Failed | Self::Cancelled => None,
        }
    }
}

impl Display for ActStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::DevicePrepare => write!(f, "device prepare"),
            Self::DeviceConfig => write!(f, "device config"),
            Self::NeedUserKey => write!(f, "need user key"),
            Self::IpConfigStart => write!(f, "IP config start"),
            Self::IpConfigGet => write!(f, "IP config get"),
            Self::IpConfigCommit => write!(f, "IP config commit"),
            Self::Activated => write!(f, "activated"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why an activation request ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    /// An out-of-order transition was attempted.
    StageViolation { from: ActStage, attempted: ActStage },
    /// The link layer refused to prepare the device.
    PrepareFailed(String),
    /// The link layer refused to configure the device.
    ConfigFailed(String),
    /// The DHCP/PPP request could not be issued.
    IpConfigStartFailed(String),
    /// The received IP configuration could not be applied.
    CommitFailed(String),
    /// No secret was supplied for a connection that needs one.
    NoSecrets,
    /// The PPP helper exited with a failure code.
    Ppp(PppFailure),
    /// The helper never registered on the bus before the watchdog fired.
    HelperWatchdog,
    /// The helper's bus name disappeared mid-session.
    HelperVanished,
    /// A stage exceeded the configured stage timeout.
    StageTimeout(ActStage),
    /// Any other reason supplied by the caller.
    Other(String),
}

impl Display for FailReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StageViolation { from, attempted } => {
                write!(f, "stage violation: {from} -> {attempted}")
            }
            Self::PrepareFailed(e) => write!(f, "device prepare failed: {e}"),
            Self::ConfigFailed(e) => write!(f, "device config failed: {e}"),
            Self::IpConfigStartFailed(e) => write!(f, "IP config start failed: {e}"),
            Self::CommitFailed(e) => write!(f, "IP config commit failed: {e}"),
            Self::NoSecrets => write!(f, "no secrets provided"),
            Self::Ppp(failure) => write!(f, "PPP failed: {failure}"),
            Self::HelperWatchdog => write!(f, "helper did not register in time"),
            Self::HelperVanished => write!(f, "helper disappeared from the bus"),
            Self::StageTimeout(stage) => write!(f, "timed out in stage {stage}"),
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

/// Notification emitted on every stage transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StageChanged {
    pub request: RequestId,
    pub device: String,
    pub old: ActStage,
    pub new: ActStage,
    /// Set when `new` is `Failed`.
    pub reason: Option<FailReason>,
}

/// IPv4 configuration produced by a link-negotiation helper.
///
/// WINS servers are not represented; helpers that report them have
/// them dropped at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ip4Config {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub nameservers: Vec<Ipv4Addr>,
}

/// PPP helper phase, as reported by its `Status` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PppState {
    Unknown,
    Dead,
    Initialize,
    SerialConn,
    Dormant,
    Establish,
    Authenticate,
    Callback,
    Network,
    Running,
    Terminate,
    Disconnect,
    Holdoff,
    Master,
    Other(u32),
}

impl From<u32> for PppState {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Unknown,
            1 => Self::Dead,
            2 => Self::Initialize,
            3 => Self::SerialConn,
            4 => Self::Dormant,
            5 => Self::Establish,
            6 => Self::Authenticate,
            7 => Self::Callback,
            8 => Self::Network,
            9 => Self::Running,
            10 => Self::Terminate,
            11 => Self::Disconnect,
            12 => Self::Holdoff,
            13 => Self::Master,
            v => Self::Other(v),
        }
    }
}

impl Display for PppState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Dead => write!(f, "dead"),
            Self::Initialize => write!(f, "initialize"),
            Self::SerialConn => write!(f, "serial connection"),
            Self::Dormant => write!(f, "dormant"),
            Self::Establish => write!(f, "establish"),
            Self::Authenticate => write!(f, "authenticate"),
            Self::Callback => write!(f, "callback"),
            Self::Network => write!(f, "network"),
            Self::Running => write!(f, "running"),
            Self::Terminate => write!(f, "terminate"),
            Self::Disconnect => write!(f, "disconnect"),
            Self::Holdoff => write!(f, "holdoff"),
            Self::Master => write!(f, "master"),
            Self::Other(v) => write!(f, "unknown state ({v})"),
        }
    }
}

/// Failure classes for a PPP helper exit status.
///
/// Codes 1-19 are the documented pppd exit codes; everything else is
/// `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PppFailure {
    Fatal,
    OptionsError,
    NotRoot,
    NoKernelSupport,
    UserRequest,
    LockFailed,
    OpenFailed,
    ConnectFailed,
    PtyCmdFailed,
    NegotiationFailed,
    PeerAuthFailed,
    IdleTimeout,
    ConnectTimeLimit,
    Callback,
    PeerDead,
    Hangup,
    Loopback,
    InitFailed,
    AuthTopeerFailed,
    Unknown(u32),
}

impl From<u32> for PppFailure {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::Fatal,
            2 => Self::OptionsError,
            3 => Self::NotRoot,
            4 => Self::NoKernelSupport,
            5 => Self::UserRequest,
            6 => Self::LockFailed,
            7 => Self::OpenFailed,
            8 => Self::ConnectFailed,
            9 => Self::PtyCmdFailed,
            10 => Self::NegotiationFailed,
            11 => Self::PeerAuthFailed,
            12 => Self::IdleTimeout,
            13 => Self::ConnectTimeLimit,
            14 => Self::Callback,
            15 => Self::PeerDead,
            16 => Self::Hangup,
            17 => Self::Loopback,
            18 => Self::InitFailed,
            19 => Self::AuthTopeerFailed,
            v => Self::Unknown(v),
        }
    }
}

impl Display for PppFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal pppd error"),
            Self::OptionsError => write!(f, "pppd options error"),
            Self::NotRoot => write!(f, "no root privileges"),
            Self::NoKernelSupport => write!(f, "no PPP kernel support"),
            Self::UserRequest => write!(f, "pppd received a signal"),
            Self::LockFailed => write!(f, "serial port lock failed"),
            Self::OpenFailed => write!(f, "serial port open failed"),
            Self::ConnectFailed => write!(f, "connect script failed"),
            Self::PtyCmdFailed => write!(f, "pty program error"),
            Self::NegotiationFailed => write!(f, "PPP negotiation failed"),
            Self::PeerAuthFailed => write!(f, "peer did not authenticate itself"),
            Self::IdleTimeout => write!(f, "link idle timeout reached"),
            Self::ConnectTimeLimit => write!(f, "connect time limit reached"),
            Self::Callback => write!(f, "callback negotiated"),
            Self::PeerDead => write!(f, "lack of LCP echo responses"),
            Self::Hangup => write!(f, "modem hung up"),
            Self::Loopback => write!(f, "loopback detected"),
            Self::InitFailed => write!(f, "init script failed"),
            Self::AuthTopeerFailed => write!(f, "failed to authenticate to the peer"),
            Self::Unknown(v) => write!(f, "unknown error ({v})"),
        }
    }
}

/// NetworkManager active connection state.
///
/// These values represent the lifecycle states of an active connection
/// as reported by the NM D-Bus API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveConnectionState {
    /// Connection state is unknown.
    Unknown,
    /// Connection is activating (connecting).
    Activating,
    /// Connection is fully activated (connected).
    Activated,
    /// Connection is deactivating (disconnecting).
    Deactivating,
    /// Connection is fully deactivated (disconnected).
    Deactivated,
    /// Unknown state code not mapped to a specific variant.
    Other(u32),
}

impl From<u32> for ActiveConnectionState {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Unknown,
            1 => Self::Activating,
            2 => Self::Activated,
            3 => Self::Deactivating,
            4 => Self::Deactivated,
            v => Self::Other(v),
        }
    }
}

impl Display for ActiveConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Activating => write!(f, "activating"),
            Self::Activated => write!(f, "activated"),
            Self::Deactivating => write!(f, "deactivating"),
            Self::Deactivated => write!(f, "deactivated"),
            Self::Other(v) => write!(f, "unknown state ({v})"),
        }
    }
}

/// NetworkManager device states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Device is not managed by NetworkManager.
    Unmanaged,
    /// Device is managed but not yet available.
    Unavailable,
    /// Device is available but not connected.
    Disconnected,
    /// Device is preparing to connect.
    Prepare,
    /// Device is being configured.
    Config,
    /// Device is waiting for secrets.
    NeedAuth,
    /// IP configuration is being requested.
    IpConfig,
    /// IP connectivity is being checked.
    IpCheck,
    /// Waiting for a secondary connection.
    Secondaries,
    /// Device is fully connected and operational.
    Activated,
    /// Device is disconnecting.
    Deactivating,
    /// Device connection failed.
    Failed,
    /// Unknown or unsupported state with raw code.
    Other(u32),
}

impl From<u32> for DeviceState {
    fn from(value: u32) -> Self {
        match value {
            10 => Self::Unmanaged,
            20 => Self::Unavailable,
            30 => Self::Disconnected,
            40 => Self::Prepare,
            50 => Self::Config,
            60 => Self::NeedAuth,
            70 => Self::IpConfig,
            80 => Self::IpCheck,
            90 => Self::Secondaries,
            100 => Self::Activated,
            110 => Self::Deactivating,
            120 => Self::Failed,
            v => Self::Other(v),
        }
    }
}

impl Display for DeviceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unmanaged => write!(f, "Unmanaged"),
            Self::Unavailable => write!(f, "Unavailable"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Prepare => write!(f, "Preparing"),
            Self::Config => write!(f, "Configuring"),
            Self::NeedAuth => write!(f, "Needs authentication"),
            Self::IpConfig => write!(f, "Requesting IP configuration"),
            Self::IpCheck => write!(f, "Checking IP connectivity"),
            Self::Secondaries => write!(f, "Waiting for secondaries"),
            Self::Activated => write!(f, "Activated"),
            Self::Deactivating => write!(f, "Deactivating"),
            Self::Failed => write!(f, "Failed"),
            Self::Other(v) => write!(f, "Other({v})"),
        }
    }
}

/// Device technology, resolved from the device's D-Bus interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Generic,
    Ethernet,
    Wifi,
    WifiP2P,
    Bluetooth,
    Modem,
    Ppp,
    Bond,
    Bridge,
    Vlan,
    Tun,
    WireGuard,
    OvsInterface,
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic => write!(f, "Generic"),
            Self::Ethernet => write!(f, "Ethernet"),
            Self::Wifi => write!(f, "Wi-Fi"),
            Self::WifiP2P => write!(f, "Wi-Fi P2P"),
            Self::Bluetooth => write!(f, "Bluetooth"),
            Self::Modem => write!(f, "Modem"),
            Self::Ppp => write!(f, "PPP"),
            Self::Bond => write!(f, "Bond"),
            Self::Bridge => write!(f, "Bridge"),
            Self::Vlan => write!(f, "VLAN"),
            Self::Tun => write!(f, "TUN"),
            Self::WireGuard => write!(f, "WireGuard"),
            Self::OvsInterface => write!(f, "OVS interface"),
        }
    }
}

/// Hardware details for a device, read from sysfs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInfo {
    /// PCI/USB vendor id, e.g. `0x8086`.
    pub vendor: Option<String>,
    /// PCI/USB product id.
    pub product: Option<String>,
    /// Kernel driver bound to the device.
    pub driver: Option<String>,
}

/// The closed set of remote object kinds the cache mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Manager,
    Settings,
    DnsManager,
    Device(DeviceKind),
    AccessPoint,
    Connection,
    ActiveConnection,
    VpnConnection,
    Ip4Config,
    Ip6Config,
    Dhcp4Config,
    Dhcp6Config,
    Checkpoint,
    WifiP2PPeer,
}

impl ObjectKind {
    /// Returns `true` for kinds that carry a connection profile.
    pub fn has_settings(self) -> bool {
        matches!(self, Self::Connection)
    }

    pub fn is_device(self) -> bool {
        matches!(self, Self::Device(_))
    }

    pub fn is_active_connection(self) -> bool {
        matches!(self, Self::ActiveConnection | Self::VpnConnection)
    }
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manager => write!(f, "manager"),
            Self::Settings => write!(f, "settings"),
            Self::DnsManager => write!(f, "DNS manager"),
            Self::Device(kind) => write!(f, "{kind} device"),
            Self::AccessPoint => write!(f, "access point"),
            Self::Connection => write!(f, "connection"),
            Self::ActiveConnection => write!(f, "active connection"),
            Self::VpnConnection => write!(f, "VPN connection"),
            Self::Ip4Config => write!(f, "IPv4 config"),
            Self::Ip6Config => write!(f, "IPv6 config"),
            Self::Dhcp4Config => write!(f, "DHCPv4 config"),
            Self::Dhcp6Config => write!(f, "DHCPv6 config"),
            Self::Checkpoint => write!(f, "checkpoint"),
            Self::WifiP2PPeer => write!(f, "Wi-Fi P2P peer"),
        }
    }
}

bitflags! {
    /// Flags for `CheckpointCreate`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CheckpointCreateFlags: u32 {
        /// Destroy all existing checkpoints first.
        const DESTROY_ALL = 0x01;
        /// Delete connections added after the checkpoint on rollback.
        const DELETE_NEW_CONNECTIONS = 0x02;
        /// Disconnect devices that appear after the checkpoint on rollback.
        const DISCONNECT_NEW_DEVICES = 0x04;
        /// Allow overlapping checkpoints on the same devices.
        const ALLOW_OVERLAPPING = 0x08;
    }
}

/// Change notifications published by the object cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// An object became visible: fully initialized and, for connection
    /// profiles, readable by the current user.
    Added { path: ObjectPath, kind: ObjectKind },
    /// A visible object stopped being visible.
    Removed { path: ObjectPath, kind: ObjectKind },
    /// An object was dropped from the cache entirely.
    Evicted { path: ObjectPath },
    /// A known property changed on a live object.
    PropertyChanged { path: ObjectPath, name: String },
}

/// Errors that can occur in client calls, the object cache, the activation
/// engine and the helper bridge.
///
/// Asynchronous operations always end with either a typed result or
/// exactly one of these.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// The remote service was unreachable or returned a fault.
    #[error("transport error: {0}")]
    Transport(String),

    /// A created object never finished initializing.
    #[error("object creation failed: {0}")]
    ObjectCreationFailed(String),

    /// The operation's cancellation token fired before completion.
    #[error("operation was cancelled")]
    Cancelled,

    /// The helper process could not be created.
    #[error("failed to spawn helper: {0}")]
    SpawnFailed(String),

    /// The helper executable is not on the search path.
    #[error("could not find helper binary")]
    BinaryNotFound,

    /// A bounded wait elapsed.
    #[error("operation timed out")]
    Timeout,

    /// No activation request with this identity is current.
    #[error("no current activation request {0}")]
    UnknownRequest(RequestId),

    /// The reply did not have the expected shape.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// A string was not a valid D-Bus object path.
    #[error("invalid object path: {0}")]
    InvalidObjectPath(String),

    /// The background worker is gone.
    #[error("worker has shut down")]
    Shutdown,
}

/// A specialized `Result` type for nmact operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<zbus::Error> for Error {
    fn from(e: zbus::Error) -> Self {
        match e {
            zbus::Error::MethodError(_, Some(msg), _) => {
                Error::Transport(strip_remote_error(&msg).to_owned())
            }
            zbus::Error::MethodError(name, None, _) => Error::Transport(name.to_string()),
            zbus::Error::FDO(fdo) => Error::Transport(strip_remote_error(&fdo.to_string()).to_owned()),
            other => Error::Transport(other.to_string()),
        }
    }
}

impl From<zbus::fdo::Error> for Error {
    fn from(e: zbus::fdo::Error) -> Self {
        Error::Transport(strip_remote_error(&e.to_string()).to_owned())
    }
}

impl From<zvariant::Error> for Error {
    fn from(e: zvariant::Error) -> Self {
        Error::UnexpectedReply(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_validation() {
        assert!(ObjectPath::new("/").is_ok());
        assert!(ObjectPath::new("/org/freedesktop/NetworkManager/Devices/3").is_ok());
        assert!(ObjectPath::new("org/freedesktop").is_err());
        assert!(ObjectPath::new("/org/").is_err());
        assert!(ObjectPath::new("/org//x").is_err());
        assert!(ObjectPath::new("/org/free-desktop").is_err());
        assert!(ObjectPath::root().is_root());
    }

    #[test]
    fn act_stage_order_is_total() {
        let order = [
            ActStage::Unknown,
            ActStage::DevicePrepare,
            ActStage::DeviceConfig,
            ActStage::NeedUserKey,
            ActStage::IpConfigStart,
            ActStage::IpConfigGet,
            ActStage::IpConfigCommit,
            ActStage::Activated,
        ];
        for pair in order.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].successor(), Some(pair[1]));
        }
        assert_eq!(ActStage::Activated.successor(), None);
        assert_eq!(ActStage::Failed.successor(), None);
    }

    #[test]
    fn act_stage_terminal() {
        assert!(ActStage::Activated.is_terminal());
        assert!(ActStage::Failed.is_terminal());
        assert!(ActStage::Cancelled.is_terminal());
        assert!(!ActStage::NeedUserKey.is_terminal());
        assert!(!ActStage::Unknown.is_terminal());
    }

    #[test]
    fn ppp_failure_covers_twenty_classes() {
        let mut seen = std::collections::HashSet::new();
        for code in 0..=25u32 {
            seen.insert(PppFailure::from(code).to_string());
        }
        // 19 named codes plus one message per distinct unknown code
        assert_eq!(PppFailure::from(19), PppFailure::AuthTopeerFailed);
        assert_eq!(PppFailure::from(0), PppFailure::Unknown(0));
        assert_eq!(PppFailure::from(42), PppFailure::Unknown(42));
        assert!(seen.contains("modem hung up"));
        assert!(seen.contains("lack of LCP echo responses"));
    }

    #[test]
    fn ppp_failure_display() {
        assert_eq!(PppFailure::from(16).to_string(), "modem hung up");
        assert_eq!(PppFailure::from(12).to_string(), "link idle timeout reached");
        assert_eq!(PppFailure::from(99).to_string(), "unknown error (99)");
    }

    #[test]
    fn ppp_state_from_u32() {
        assert_eq!(PppState::from(9), PppState::Running);
        assert_eq!(PppState::from(1), PppState::Dead);
        assert_eq!(PppState::from(77), PppState::Other(77));
    }

    #[test]
    fn active_connection_state_from_u32() {
        assert_eq!(ActiveConnectionState::from(0), ActiveConnectionState::Unknown);
        assert_eq!(ActiveConnectionState::from(1), ActiveConnectionState::Activating);
        assert_eq!(ActiveConnectionState::from(2), ActiveConnectionState::Activated);
        assert_eq!(ActiveConnectionState::from(3), ActiveConnectionState::Deactivating);
        assert_eq!(ActiveConnectionState::from(4), ActiveConnectionState::Deactivated);
        assert_eq!(ActiveConnectionState::from(99), ActiveConnectionState::Other(99));
    }

    #[test]
    fn device_state_from_u32() {
        assert_eq!(DeviceState::from(60), DeviceState::NeedAuth);
        assert_eq!(DeviceState::from(100), DeviceState::Activated);
        assert_eq!(DeviceState::from(7), DeviceState::Other(7));
        assert_eq!(DeviceState::from(50).to_string(), "Configuring");
    }

    #[test]
    fn fail_reason_display() {
        let r = FailReason::StageViolation {
            from: ActStage::IpConfigStart,
            attempted: ActStage::IpConfigGet,
        };
        assert_eq!(r.to_string(), "stage violation: IP config start -> IP config get");
        assert_eq!(
            FailReason::Ppp(PppFailure::Hangup).to_string(),
            "PPP failed: modem hung up"
        );
    }

    #[test]
    fn error_display() {
        assert_eq!(Error::Cancelled.to_string(), "operation was cancelled");
        assert_eq!(Error::BinaryNotFound.to_string(), "could not find helper binary");
        assert_eq!(
            Error::Transport("No such device".into()).to_string(),
            "transport error: No such device"
        );
    }

    #[test]
    fn checkpoint_flags_bits() {
        let flags = CheckpointCreateFlags::DESTROY_ALL | CheckpointCreateFlags::ALLOW_OVERLAPPING;
        assert_eq!(flags.bits(), 0x09);
    }

    #[test]
    fn prop_value_accessors() {
        assert_eq!(PropValue::from(7u32).as_u32(), Some(7));
        assert_eq!(PropValue::from(true).as_bool(), Some(true));
        assert_eq!(PropValue::from("eth0").as_str(), Some("eth0"));
        assert_eq!(PropValue::from(7u32).as_str(), None);
    }
}
