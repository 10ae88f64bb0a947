//! Construction-time configuration.
//!
//! Nothing here is read from disk. Each component takes its config struct
//! when it is built, so tests can pin every knob explicitly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::constants::{bus, env, ppp, timeouts};

/// Configuration for [`Client`](crate::Client).
///
/// # Examples
///
/// ```rust
/// use nmact::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new()
///     .with_call_timeout(Duration::from_secs(5))
///     .with_wait_timeout(Duration::from_secs(30))
///     .with_hardware_info(false);
/// assert_eq!(config.call_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Upper bound on a single remote call round-trip.
    pub call_timeout: Duration,
    /// Upper bound on waiting for a returned object to materialize.
    /// `None` waits until the object appears, fails, or is cancelled.
    pub wait_timeout: Option<Duration>,
    /// Whether device objects look up vendor/driver details in sysfs.
    pub read_hardware: bool,
    /// Root of the sysfs tree used for hardware lookups.
    pub sysfs_root: PathBuf,
}

impl Default for ClientConfig {
    /// Defaults:
    /// - `call_timeout`: 25 seconds
    /// - `wait_timeout`: `None`
    /// - `read_hardware`: `true`
    /// - `sysfs_root`: `/sys`
    fn default() -> Self {
        Self {
            call_timeout: timeouts::call_timeout(),
            wait_timeout: None,
            read_hardware: true,
            sysfs_root: PathBuf::from("/sys"),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with `NMACT_NO_HW_INFO=1` turning hardware lookups off.
    pub fn from_env() -> Self {
        let disabled = std::env::var(env::NO_HW_INFO)
            .map(|v| v.trim() == "1")
            .unwrap_or(false);
        Self::default().with_hardware_info(!disabled)
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_hardware_info(mut self, enabled: bool) -> Self {
        self.read_hardware = enabled;
        self
    }

    #[must_use]
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }
}

/// Configuration for the [`ActivationEngine`](crate::ActivationEngine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fail a request that spends longer than this in any single
    /// non-terminal stage other than `NeedUserKey`. Off by default.
    pub stage_timeout: Option<Duration>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }
}

/// Configuration for the PPP helper bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PppConfig {
    /// Candidate pppd locations, searched in order.
    pub search_paths: Vec<PathBuf>,
    /// Plugin passed as the final `plugin <path>` argument.
    pub plugin_path: PathBuf,
    /// Time the helper has to claim its bus name.
    pub watchdog: Duration,
    /// Bus name the helper claims.
    pub bus_name: String,
}

impl Default for PppConfig {
    fn default() -> Self {
        Self {
            search_paths: ppp::SEARCH_PATHS.iter().map(PathBuf::from).collect(),
            plugin_path: PathBuf::from(ppp::PLUGIN_PATH),
            watchdog: timeouts::ppp_watchdog(),
            bus_name: bus::PPP_SERVICE.to_owned(),
        }
    }
}

impl PppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_plugin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_path = path.into();
        self
    }

    #[must_use]
    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Returns the first search path that exists.
    pub(crate) fn locate_binary(&self) -> Option<&PathBuf> {
        self.search_paths.iter().find(|p| p.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.call_timeout, Duration::from_secs(25));
        assert_eq!(config.wait_timeout, None);
        assert!(config.read_hardware);
        assert_eq!(config.sysfs_root, PathBuf::from("/sys"));
    }

    #[test]
    fn client_builder_overrides() {
        let config = ClientConfig::new()
            .with_call_timeout(Duration::from_secs(3))
            .with_wait_timeout(Duration::from_secs(9))
            .with_hardware_info(false)
            .with_sysfs_root("/tmp/sys");
        assert_eq!(config.call_timeout, Duration::from_secs(3));
        assert_eq!(config.wait_timeout, Some(Duration::from_secs(9)));
        assert!(!config.read_hardware);
        assert_eq!(config.sysfs_root, PathBuf::from("/tmp/sys"));
    }

    #[test]
    fn engine_has_no_stage_timeout_by_default() {
        assert_eq!(EngineConfig::default().stage_timeout, None);
        let config = EngineConfig::new().with_stage_timeout(Duration::from_secs(45));
        assert_eq!(config.stage_timeout, Some(Duration::from_secs(45)));
    }

    #[test]
    fn ppp_defaults() {
        let config = PppConfig::default();
        assert_eq!(config.search_paths.len(), 3);
        assert_eq!(config.search_paths[0], PathBuf::from("/usr/local/sbin/pppd"));
        assert_eq!(config.watchdog, Duration::from_secs(10));
        assert_eq!(config.bus_name, "org.freedesktop.NetworkManager.PPP");
    }

    #[test]
    fn locate_binary_skips_missing_paths() {
        let config = PppConfig::new().with_search_paths(["/nonexistent/pppd"]);
        assert!(config.locate_binary().is_none());
    }
}
