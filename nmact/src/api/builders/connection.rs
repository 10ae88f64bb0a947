//! Connection profile builder.
//!
//! Produces the opaque [`ConnectionSettings`] map handed to
//! `AddConnection` / `AddAndActivateConnection`.
//!
//! # Example
//!
//! ```rust
//! use nmact::builders::{ConnectionBuilder, PppOptionsBuilder};
//!
//! let settings = ConnectionBuilder::new("pppoe", "DSL")
//!     .autoconnect(false)
//!     .interface_name("eth0")
//!     .ppp(&PppOptionsBuilder::new().noauth(true).mru(1492).build())
//!     .ipv4_auto()
//!     .build();
//! assert!(settings.contains_key("ppp"));
//! ```

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::api::builders::ppp::PppOptions;
use crate::api::models::{ConnectionSettings, PropValue};

/// Builder for a connection profile.
pub struct ConnectionBuilder {
    settings: ConnectionSettings,
}

impl ConnectionBuilder {
    /// Starts a profile of the given NetworkManager connection type.
    ///
    /// A random v4 UUID is assigned; override it with [`Self::uuid`].
    pub fn new(connection_type: &str, id: impl Into<String>) -> Self {
        let mut connection = BTreeMap::new();
        connection.insert("type".to_string(), PropValue::from(connection_type));
        connection.insert("id".to_string(), PropValue::from(id.into()));
        connection.insert(
            "uuid".to_string(),
            PropValue::from(Uuid::new_v4().to_string()),
        );

        let mut settings = ConnectionSettings::new();
        settings.insert("connection".to_string(), connection);
        Self { settings }
    }

    pub fn uuid(self, uuid: Uuid) -> Self {
        self.set("connection", "uuid", uuid.to_string())
    }

    pub fn autoconnect(self, enabled: bool) -> Self {
        self.set("connection", "autoconnect", enabled)
    }

    pub fn interface_name(self, name: impl Into<String>) -> Self {
        self.set("connection", "interface-name", name.into())
    }

    /// Restricts visibility to the given users (`user:<name>` entries).
    pub fn permissions<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let perms = users
            .into_iter()
            .map(|u| format!("user:{}:", u.as_ref()))
            .collect();
        self.section("connection")
            .insert("permissions".to_string(), PropValue::StrList(perms));
        self
    }

    pub fn ipv4_auto(self) -> Self {
        self.set("ipv4", "method", "auto")
    }

    pub fn ipv4_disabled(self) -> Self {
        self.set("ipv4", "method", "disabled")
    }

    /// Writes a `ppp` section that round-trips through
    /// [`PppOptions::from_settings`].
    pub fn ppp(mut self, opts: &PppOptions) -> Self {
        let section = self.section("ppp");
        let mut flag = |key: &str, on: bool| {
            if on {
                section.insert(key.to_string(), PropValue::Bool(true));
            }
        };
        flag("noauth", opts.noauth);
        flag("refuse-eap", opts.refuse_eap);
        flag("refuse-chap", opts.refuse_chap);
        flag("refuse-mschap", opts.refuse_mschap);
        flag("nobsdcomp", opts.nobsdcomp);
        flag("nodeflate", opts.nodeflate);
        flag("require-mppe", opts.require_mppe);
        flag("require-mppe-128", opts.require_mppe_128);
        flag("mppe-stateful", opts.mppe_stateful);
        flag("require-mppc", opts.require_mppc);
        flag("crtscts", opts.crtscts);
        flag("usepeerdns", opts.usepeerdns);

        for (key, value) in [
            ("baud", opts.baud),
            ("mru", opts.mru),
            ("mtu", opts.mtu),
            ("lcp-echo-interval", opts.lcp_echo_interval),
            ("lcp-echo-failure", opts.lcp_echo_failure),
        ] {
            if value != 0 {
                section.insert(key.to_string(), PropValue::U32(value));
            }
        }
        self
    }

    /// Sets an arbitrary key in an arbitrary section.
    pub fn set(mut self, section: &str, key: &str, value: impl Into<PropValue>) -> Self {
        self.section(section).insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> ConnectionSettings {
        self.settings
    }

    fn section(&mut self, name: &str) -> &mut BTreeMap<String, PropValue> {
        self.settings.entry(name.to_string()).or_default()
    }
}
