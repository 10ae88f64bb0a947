//! Connection activation for NetworkManager.
//!
//! This crate covers the parts of a network configuration service that
//! move a device from idle to connected:
//!
//! - An activation state machine that drives one request at a time through
//!   prepare, configure, IP configuration and commit
//! - A bridge to the PPP helper (`pppd` with the NetworkManager plugin)
//!   that launches it, watches its bus name and decodes its signals
//! - A client-side cache of NetworkManager's remote objects, where calls
//!   that return an object only complete once that object is initialized
//! - A correlation layer that matches replies to the calls that issued
//!   them and supports cancellation at any point
//!
//! # Example
//!
//! ```no_run
//! use nmact::Client;
//!
//! # async fn example() -> nmact::Result<()> {
//! let client = Client::new().await?;
//!
//! let conn = client.connection_by_id("Office VPN").await?;
//! if let Some(conn) = conn {
//!     let active = client
//!         .activate_connection(Some(conn.path()), None, None, None)
//!         .await?;
//!     let state = client.wait_for_activation(active.path(), None).await?;
//!     println!("{}: {state}", active.path());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Driving a PPP link
//!
//! ```no_run
//! use nmact::{
//!     ActivationEngine, ActivationSpec, EngineConfig, ObjectPath, PppConfig, PppLink,
//!     PppManager, PppOptionsBuilder, TokioRunner, ZbusHelperBus,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> nmact::Result<()> {
//! let bus = ZbusHelperBus::system().await?;
//! let manager = PppManager::new(PppConfig::new(), Arc::new(TokioRunner), Arc::new(bus));
//! let options = PppOptionsBuilder::new().noauth(true).usepeerdns(true).build();
//! let link = PppLink::new(manager, "ttyUSB0", options);
//!
//! let engine = ActivationEngine::spawn("ppp0", link, EngineConfig::new());
//! let spec = ActivationSpec {
//!     connection: Some(ObjectPath::new("/org/freedesktop/NetworkManager/Settings/7")?),
//!     user_requested: true,
//!     ..Default::default()
//! };
//! let id = engine.activate(spec).await?;
//! let stage = engine.wait_terminal(id).await?;
//! println!("finished in {stage}");
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Every fallible operation returns [`Result<T>`](Result) with [`Error`].
//! Remote errors arrive as [`Error::Transport`] with the bus's error-name
//! wrapping removed. Activation failures are not errors: they are reported
//! as [`ActStage::Failed`] with a [`FailReason`].
//!
//! # Logging
//!
//! This crate uses the [`log`](https://docs.rs/log) facade. To see
//! log output, add a logging implementation like `env_logger`. For example:
//!
//! ```no_run,ignore
//! env_logger::init();
//! // ...
//! ```

// Internal implementation modules
mod core;
mod dbus;
mod monitoring;
mod types;
mod util;

// Public API modules
pub mod api;

// Re-exported public API
pub use api::builders;
pub use api::builders::{ConnectionBuilder, PppOptions, PppOptionsBuilder};
pub use api::client::{AddAndActivateResult, Client};
pub use api::config::{ClientConfig, EngineConfig, PppConfig};
pub use api::models::{
    ActStage, ActiveConnectionState, CacheEvent, CheckpointCreateFlags, ConnectionSettings,
    DeviceKind, DeviceState, Error, FailReason, HardwareInfo, Ip4Config, ObjectKind, ObjectPath,
    PppFailure, PppState, PropValue, PropertyBag, RequestId, Result, StageChanged,
};
pub use crate::core::activation::{ActivationRequest, ActivationSpec};
pub use crate::core::device::Device;
pub use crate::core::engine::{ActivationEngine, EngineHandle, LinkEvent, LinkSetup};
pub use crate::core::object_cache::{Lookup, RemoteObject, SettingsAccess};
pub use crate::core::ppp_link::PppLink;
pub use crate::core::ppp_manager::{HelperBus, HelperSignal, PppEvent, PppManager};
pub use crate::core::process::{HelperExit, ProcessRunner, SpawnedHelper, TokioRunner};
pub use crate::core::transport::{Arg, MethodCall, Transport, TransportEvent};
pub use dbus::DbusTransport;
pub use monitoring::helper::ZbusHelperBus;
