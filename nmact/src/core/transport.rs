//! The transport seam between the client core and the bus.
//!
//! A [`Transport`] issues method calls and produces one ordered stream of
//! [`TransportEvent`]s. It is also responsible for initializing new objects
//! (fetching their properties and, for connection profiles, their settings)
//! and reporting the outcome, so the cache itself never has to wait.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::api::models::{ConnectionSettings, ObjectPath, PropValue, PropertyBag, Result};
use crate::core::object_cache::SettingsAccess;

/// One positional argument or reply value.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(PropValue),
    /// `a{sv}`
    Dict(PropertyBag),
    /// `a{sa{sv}}`
    Settings(ConnectionSettings),
}

impl Arg {
    /// An object path, with `None` encoded as `/`.
    pub fn path(path: Option<&ObjectPath>) -> Self {
        Arg::Value(PropValue::Path(path.cloned().unwrap_or_else(ObjectPath::root)))
    }

    pub fn as_path(&self) -> Option<&ObjectPath> {
        match self {
            Arg::Value(PropValue::Path(p)) => Some(p),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&PropertyBag> {
        match self {
            Arg::Dict(d) => Some(d),
            _ => None,
        }
    }
}

impl From<PropValue> for Arg {
    fn from(v: PropValue) -> Self {
        Arg::Value(v)
    }
}

/// A method call on a remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub target: ObjectPath,
    pub interface: &'static str,
    pub method: &'static str,
    pub args: Vec<Arg>,
}

impl MethodCall {
    pub fn new(target: ObjectPath, interface: &'static str, method: &'static str) -> Self {
        Self {
            target,
            interface,
            method,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Something the remote side did.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A new object was exported with these interfaces.
    ObjectAdded {
        path: ObjectPath,
        interfaces: Vec<String>,
    },
    /// A previously added object finished initializing.
    ObjectInitialized {
        path: ObjectPath,
        properties: PropertyBag,
        settings: SettingsAccess,
    },
    /// A previously added object could not be initialized.
    ObjectInitFailed { path: ObjectPath, message: String },
    ObjectRemoved { path: ObjectPath },
    PropertiesChanged {
        path: ObjectPath,
        changed: PropertyBag,
    },
    /// A connection profile's settings changed or were re-read.
    SettingsUpdated {
        path: ObjectPath,
        settings: SettingsAccess,
    },
    /// The service gained or lost its bus name.
    ServiceOwner { present: bool },
}

/// Carries calls and notifications.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a call. Remote errors come back as [`Error::Transport`]
    /// with the remote wrapping removed.
    ///
    /// [`Error::Transport`]: crate::Error::Transport
    async fn call(&self, call: MethodCall) -> Result<Vec<Arg>>;

    /// The event stream. Called once, when the client starts.
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>>;
}
