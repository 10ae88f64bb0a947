//! PPP link options.
//!
//! [`PppOptions`] is the typed view of a profile's `ppp` setting. Each
//! field maps to exactly one pppd flag (or `<flag> <value>` pair), and the
//! fields are declared in the order the flags appear on the command line.
//!
//! # Example
//!
//! ```rust
//! use nmact::builders::PppOptionsBuilder;
//!
//! let opts = PppOptionsBuilder::new()
//!     .noauth(true)
//!     .mru(1400)
//!     .lcp_echo(5, 3)
//!     .build();
//! assert_eq!(opts.mru, 1400);
//! ```

use serde::{Deserialize, Serialize};

use crate::api::models::{ConnectionSettings, PropValue};

/// Options passed to the PPP helper.
///
/// Zero / `false` means "leave the flag off".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PppOptions {
    /// Serial line speed; emitted as a bare number after the device.
    pub baud: u32,
    pub noauth: bool,
    pub refuse_eap: bool,
    pub refuse_chap: bool,
    pub refuse_mschap: bool,
    pub nobsdcomp: bool,
    pub nodeflate: bool,
    pub require_mppe: bool,
    pub require_mppe_128: bool,
    pub mppe_stateful: bool,
    pub require_mppc: bool,
    pub crtscts: bool,
    /// Ask the peer for DNS servers.
    pub usepeerdns: bool,
    /// Install a default route through the link.
    pub defaultroute: bool,
    pub mru: u32,
    pub mtu: u32,
    /// Seconds between LCP echo requests.
    pub lcp_echo_interval: u32,
    /// Missed echoes before the link is considered dead.
    pub lcp_echo_failure: u32,
}

impl Default for PppOptions {
    /// Every flag off except `defaultroute`, which NetworkManager always
    /// requests for PPP links.
    fn default() -> Self {
        Self {
            baud: 0,
            noauth: false,
            refuse_eap: false,
            refuse_chap: false,
            refuse_mschap: false,
            nobsdcomp: false,
            nodeflate: false,
            require_mppe: false,
            require_mppe_128: false,
            mppe_stateful: false,
            require_mppc: false,
            crtscts: false,
            usepeerdns: false,
            defaultroute: true,
            mru: 0,
            mtu: 0,
            lcp_echo_interval: 0,
            lcp_echo_failure: 0,
        }
    }
}

impl PppOptions {
    /// Reads the `ppp` section of a connection profile.
    ///
    /// Missing keys and values of the wrong type keep their defaults.
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        let mut opts = Self::default();
        let Some(section) = settings.get("ppp") else {
            return opts;
        };

        let flag = |key: &str| section.get(key).and_then(PropValue::as_bool).unwrap_or(false);
        let num = |key: &str| section.get(key).and_then(PropValue::as_u32).unwrap_or(0);

        opts.baud = num("baud");
        opts.noauth = flag("noauth");
        opts.refuse_eap = flag("refuse-eap");
        opts.refuse_chap = flag("refuse-chap");
        opts.refuse_mschap = flag("refuse-mschap");
        opts.nobsdcomp = flag("nobsdcomp");
        opts.nodeflate = flag("nodeflate");
        opts.require_mppe = flag("require-mppe");
        opts.require_mppe_128 = flag("require-mppe-128");
        opts.mppe_stateful = flag("mppe-stateful");
        opts.require_mppc = flag("require-mppc");
        opts.crtscts = flag("crtscts");
        opts.usepeerdns = flag("usepeerdns");
        opts.mru = num("mru");
        opts.mtu = num("mtu");
        opts.lcp_echo_interval = num("lcp-echo-interval");
        opts.lcp_echo_failure = num("lcp-echo-failure");
        opts
    }
}

/// Builder for [`PppOptions`].
#[derive(Debug, Clone, Default)]
pub struct PppOptionsBuilder {
    opts: PppOptions,
}

impl PppOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baud(mut self, baud: u32) -> Self {
        self.opts.baud = baud;
        self
    }

    pub fn noauth(mut self, enabled: bool) -> Self {
        self.opts.noauth = enabled;
        self
    }

    /// Refuses EAP, CHAP and MS-CHAP in one call.
    pub fn refuse_all_challenge_auth(mut self) -> Self {
        self.opts.refuse_eap = true;
        self.opts.refuse_chap = true;
        self.opts.refuse_mschap = true;
        self
    }

    pub fn refuse_eap(mut self, enabled: bool) -> Self {
        self.opts.refuse_eap = enabled;
        self
    }

    pub fn refuse_chap(mut self, enabled: bool) -> Self {
        self.opts.refuse_chap = enabled;
        self
    }

    pub fn refuse_mschap(mut self, enabled: bool) -> Self {
        self.opts.refuse_mschap = enabled;
        self
    }

    /// Disables BSD-Compress and Deflate.
    pub fn no_compression(mut self) -> Self {
        self.opts.nobsdcomp = true;
        self.opts.nodeflate = true;
        self
    }

    /// Requires MPPE, optionally restricted to 128-bit keys.
    pub fn require_mppe(mut self, only_128: bool, stateful: bool) -> Self {
        self.opts.require_mppe = true;
        self.opts.require_mppe_128 = only_128;
        self.opts.mppe_stateful = stateful;
        self
    }

    pub fn require_mppc(mut self, enabled: bool) -> Self {
        self.opts.require_mppc = enabled;
        self
    }

    pub fn crtscts(mut self, enabled: bool) -> Self {
        self.opts.crtscts = enabled;
        self
    }

    pub fn usepeerdns(mut self, enabled: bool) -> Self {
        self.opts.usepeerdns = enabled;
        self
    }

    pub fn defaultroute(mut self, enabled: bool) -> Self {
        self.opts.defaultroute = enabled;
        self
    }

    pub fn mru(mut self, mru: u32) -> Self {
        self.opts.mru = mru;
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.opts.mtu = mtu;
        self
    }

    /// Sets LCP echo interval (seconds) and failure threshold together.
    pub fn lcp_echo(mut self, interval: u32, failure: u32) -> Self {
        self.opts.lcp_echo_interval = interval;
        self.opts.lcp_echo_failure = failure;
        self
    }

    pub fn build(self) -> PppOptions {
        self.opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn defaults_only_request_default_route() {
        let opts = PppOptions::default();
        assert!(opts.defaultroute);
        assert!(!opts.noauth);
        assert_eq!(opts.mru, 0);
    }

    #[test]
    fn reads_ppp_section() {
        let mut ppp = BTreeMap::new();
        ppp.insert("noauth".to_string(), PropValue::Bool(true));
        ppp.insert("mru".to_string(), PropValue::U32(1400));
        ppp.insert("lcp-echo-interval".to_string(), PropValue::U32(5));
        ppp.insert("lcp-echo-failure".to_string(), PropValue::U32(3));
        ppp.insert("mtu".to_string(), PropValue::Str("bogus".into()));
        let mut settings = ConnectionSettings::new();
        settings.insert("ppp".to_string(), ppp);

        let opts = PppOptions::from_settings(&settings);
        assert!(opts.noauth);
        assert_eq!(opts.mru, 1400);
        assert_eq!(opts.mtu, 0);
        assert_eq!(opts.lcp_echo_interval, 5);
        assert_eq!(opts.lcp_echo_failure, 3);
    }

    #[test]
    fn missing_section_yields_defaults() {
        assert_eq!(
            PppOptions::from_settings(&ConnectionSettings::new()),
            PppOptions::default()
        );
    }

    #[test]
    fn builder_groups() {
        let opts = PppOptionsBuilder::new()
            .refuse_all_challenge_auth()
            .no_compression()
            .require_mppe(true, false)
            .build();
        assert!(opts.refuse_eap && opts.refuse_chap && opts.refuse_mschap);
        assert!(opts.nobsdcomp && opts.nodeflate);
        assert!(opts.require_mppe && opts.require_mppe_128 && !opts.mppe_stateful);
    }
}
