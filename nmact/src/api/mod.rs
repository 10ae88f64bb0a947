//! Public API module.
//!
//! This module contains the user-facing surface of the `nmact` crate.

pub mod builders;
pub mod client;
pub mod config;
pub mod models;
