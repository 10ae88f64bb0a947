//! D-Bus proxy interfaces and the zbus transport.
//!
//! This module contains the low-level proxy definitions for communicating
//! with NetworkManager and its PPP helper over the system bus, plus the
//! [`Transport`](crate::Transport) built on them.

pub(crate) mod convert;
mod main_nm;
mod ppp;
mod settings;
mod transport;

pub(crate) use main_nm::NMProxy;
pub(crate) use ppp::NMPppProxy;
pub(crate) use settings::{NMSettingsConnectionProxy, NMSettingsProxy};
pub use transport::DbusTransport;
