//! pppd command line construction.

use std::path::Path;

use crate::api::builders::ppp::PppOptions;

/// Argument vector for a helper process, program first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CmdLine {
    args: Vec<String>,
}

impl CmdLine {
    pub(crate) fn new(program: &Path) -> Self {
        Self {
            args: vec![program.to_string_lossy().into_owned()],
        }
    }

    pub(crate) fn add(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub(crate) fn add_if(&mut self, cond: bool, flag: &str) -> &mut Self {
        if cond {
            self.add(flag);
        }
        self
    }

    /// Appends `<flag> <value>` when `value` is non-zero.
    pub(crate) fn add_value(&mut self, flag: &str, value: u32) -> &mut Self {
        if value != 0 {
            self.add(flag);
            self.add(value.to_string());
        }
        self
    }

    pub(crate) fn into_args(self) -> Vec<String> {
        self.args
    }
}

/// Builds the full pppd invocation for `device`.
///
/// The layout is `pppd nodetach lock <device> [baud] <flags...>
/// <flag value pairs...> plugin <plugin>`. Each option contributes exactly
/// its own flag; the plugin is always last.
pub(crate) fn pppd_args(binary: &Path, device: &str, opts: &PppOptions, plugin: &Path) -> Vec<String> {
    let mut cmd = CmdLine::new(binary);
    cmd.add("nodetach").add("lock").add(device);

    if opts.baud != 0 {
        cmd.add(opts.baud.to_string());
    }

    cmd.add_if(opts.noauth, "noauth")
        .add_if(opts.refuse_eap, "refuse-eap")
        .add_if(opts.refuse_chap, "refuse-chap")
        .add_if(opts.refuse_mschap, "refuse-mschap")
        .add_if(opts.nobsdcomp, "nobsdcomp")
        .add_if(opts.nodeflate, "nodeflate")
        .add_if(opts.require_mppe, "require-mppe")
        .add_if(opts.require_mppe_128, "require-mppe-128")
        .add_if(opts.mppe_stateful, "mppe-stateful")
        .add_if(opts.require_mppc, "require-mppc")
        .add_if(opts.crtscts, "crtscts")
        .add_if(opts.usepeerdns, "usepeerdns")
        .add_if(opts.defaultroute, "defaultroute");

    cmd.add_value("mru", opts.mru)
        .add_value("mtu", opts.mtu)
        .add_value("lcp-echo-interval", opts.lcp_echo_interval)
        .add_value("lcp-echo-failure", opts.lcp_echo_failure);

    cmd.add("plugin").add(plugin.to_string_lossy());
    cmd.into_args()
}
