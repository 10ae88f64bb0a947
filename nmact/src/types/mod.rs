//! Type definitions and constants.
//!
//! This module contains NetworkManager constants and the object-kind registry.

pub(crate) mod constants;
pub(crate) mod object_registry;
