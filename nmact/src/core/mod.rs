//! Core internal logic.
//!
//! Activation state tracking, the PPP helper bridge, the remote object cache
//! and the call correlation layer. Everything here is driven from a single
//! task per engine or client; nothing is shared across threads.

pub(crate) mod activation;
pub(crate) mod call;
pub(crate) mod cmd_line;
pub(crate) mod device;
pub(crate) mod engine;
pub(crate) mod object_cache;
pub(crate) mod ppp_link;
pub(crate) mod ppp_manager;
pub(crate) mod process;
pub(crate) mod transport;
pub(crate) mod worker;
