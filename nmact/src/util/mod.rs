//! Internal helpers.

pub(crate) mod sysfs;
pub(crate) mod utils;
