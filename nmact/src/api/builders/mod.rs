//! Builders for connection profiles and PPP options.
//!
//! # Available Builders
//!
//! - [`ConnectionBuilder`] - generic connection profiles
//! - [`PppOptionsBuilder`] - PPP helper options

pub mod connection;
pub mod ppp;

pub use connection::ConnectionBuilder;
pub use ppp::{PppOptions, PppOptionsBuilder};
