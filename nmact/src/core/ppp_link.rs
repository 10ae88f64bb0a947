//! [`LinkSetup`] for PPP links, backed by [`PppManager`].

use async_trait::async_trait;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::api::builders::ppp::PppOptions;
use crate::api::models::{FailReason, Ip4Config};
use crate::core::activation::ActivationRequest;
use crate::core::engine::{LinkEvent, LinkSetup};
use crate::core::ppp_manager::{PppEvent, PppManager};

/// Brings up a PPP link on a serial/pty device.
pub struct PppLink {
    manager: PppManager,
    port: String,
    options: PppOptions,
    needs_secrets: bool,
    interface: Option<String>,
}

impl PppLink {
    /// `port` is the device pppd opens, e.g. `ttyUSB0`.
    pub fn new(manager: PppManager, port: impl Into<String>, options: PppOptions) -> Self {
        Self {
            manager,
            port: port.into(),
            options,
            needs_secrets: false,
            interface: None,
        }
    }

    /// Suspend in `NeedUserKey` before starting pppd.
    #[must_use]
    pub fn with_secrets_required(mut self, required: bool) -> Self {
        self.needs_secrets = required;
        self
    }

    /// The ppp interface reported by the helper, once known.
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }
}

#[async_trait]
impl LinkSetup for PppLink {
    async fn prepare(&mut self, req: &ActivationRequest) -> Result<(), FailReason> {
        debug!("Preparing PPP link on {} for {}", self.port, req.id());
        self.interface = None;
        Ok(())
    }

    async fn configure(&mut self, _req: &ActivationRequest) -> Result<bool, FailReason> {
        Ok(self.needs_secrets)
    }

    async fn request_secrets(&mut self, req: &ActivationRequest, _cancel: CancellationToken) {
        info!("PPP link on {} is waiting for secrets ({})", self.port, req.id());
    }

    async fn start_ip_config(&mut self, _req: &ActivationRequest) -> Result<(), FailReason> {
        self.manager
            .start(&self.port, &self.options)
            .map_err(|e| FailReason::IpConfigStartFailed(e.to_string()))
    }

    async fn next_event(&mut self) -> LinkEvent {
        loop {
            match self.manager.next_event().await {
                PppEvent::StateChanged(state) => {
                    debug!("PPP on {}: {state}", self.port);
                }
                PppEvent::Ip4Config { interface, config } => {
                    self.interface = Some(interface);
                    return LinkEvent::IpConfig(config);
                }
                PppEvent::Failed(reason) => return LinkEvent::Failed(reason),
            }
        }
    }

    async fn commit(&mut self, _req: &ActivationRequest, config: &Ip4Config) -> Result<(), FailReason> {
        let iface = self.interface.as_deref().unwrap_or(&self.port);
        info!(
            "Committing {}/{} on {iface} ({} nameservers)",
            config.address,
            config.netmask,
            config.nameservers.len()
        );
        Ok(())
    }

    async fn teardown(&mut self) {
        self.manager.stop();
        self.interface = None;
    }
}
