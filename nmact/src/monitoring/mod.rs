//! Signal-stream adapters.
//!
//! Turns raw bus signals into the typed streams the object cache and the
//! PPP bridge consume.

pub mod helper;
pub(crate) mod objects;
