//! Activation request: the per-attempt stage cursor.
//!
//! One [`ActivationRequest`] tracks a single attempt to bring a device up.
//! Stages only ever move forward through [`ActStage`]'s order, or jump to
//! `Failed` / `Cancelled`. Every guard that is not met fails the request
//! instead of leaving it stuck, and every transition is broadcast as a
//! [`StageChanged`].

use log::{debug, warn};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::api::models::{ActStage, FailReason, Ip4Config, ObjectPath, RequestId, StageChanged};

/// Parameters for a new activation attempt.
#[derive(Debug, Clone, Default)]
pub struct ActivationSpec {
    /// Connection profile to activate, if any.
    pub connection: Option<ObjectPath>,
    /// Access point (or other specific object) to use.
    pub specific_object: Option<ObjectPath>,
    /// Whether a user asked for this, rather than autoconnect.
    pub user_requested: bool,
}

/// A single activation attempt for one device.
#[derive(Debug)]
pub struct ActivationRequest {
    id: RequestId,
    device: String,
    spec: ActivationSpec,
    stage: ActStage,
    ip4_config: Option<Ip4Config>,
    key_request: Option<CancellationToken>,
    user_key: Option<String>,
    ip_request_issued: bool,
    needs_user_key: bool,
    failure: Option<FailReason>,
    events: broadcast::Sender<StageChanged>,
}

impl ActivationRequest {
    pub(crate) fn new(
        device: impl Into<String>,
        spec: ActivationSpec,
        events: broadcast::Sender<StageChanged>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            device: device.into(),
            spec,
            stage: ActStage::Unknown,
            ip4_config: None,
            key_request: None,
            user_key: None,
            ip_request_issued: false,
            needs_user_key: false,
            failure: None,
            events,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn connection(&self) -> Option<&ObjectPath> {
        self.spec.connection.as_ref()
    }

    pub fn specific_object(&self) -> Option<&ObjectPath> {
        self.spec.specific_object.as_ref()
    }

    pub fn user_requested(&self) -> bool {
        self.spec.user_requested
    }

    pub fn stage(&self) -> ActStage {
        self.stage
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// The IP configuration, present only from `IpConfigCommit` on.
    pub fn ip4_config(&self) -> Option<&Ip4Config> {
        match self.stage {
            ActStage::IpConfigCommit | ActStage::Activated => self.ip4_config.as_ref(),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailReason> {
        self.failure.as_ref()
    }

    /// The secret supplied while in `NeedUserKey`.
    pub fn user_key(&self) -> Option<&str> {
        self.user_key.as_deref()
    }

    /// Marks that the link needs a user secret before IP configuration.
    pub(crate) fn require_user_key(&mut self) {
        self.needs_user_key = true;
    }

    /// Records that the DHCP/PPP request for an address went out.
    pub(crate) fn mark_ip_request_issued(&mut self) {
        self.ip_request_issued = true;
    }

    /// Registers the token for an outstanding secret request.
    ///
    /// The token is cancelled when the request leaves `NeedUserKey` by any
    /// path other than a supplied key.
    pub(crate) fn set_key_request(&mut self, token: CancellationToken) {
        if let Some(old) = self.key_request.replace(token) {
            old.cancel();
        }
    }

    /// Supplies the secret for a request suspended in `NeedUserKey`.
    ///
    /// Returns `false` (and leaves the request untouched) in any other stage.
    pub(crate) fn supply_user_key(&mut self, key: impl Into<String>) -> bool {
        if self.stage != ActStage::NeedUserKey {
            warn!(
                "Ignoring user key for {} on {}: stage is {}",
                self.id, self.device, self.stage
            );
            return false;
        }
        self.user_key = Some(key.into());
        self.key_request = None;
        true
    }

    /// Moves from `expected` to the next stage.
    ///
    /// `expected` must match the current stage, and the target stage's
    /// precondition must hold; otherwise the request fails with
    /// [`FailReason::StageViolation`]. From `DeviceConfig` the request skips
    /// `NeedUserKey` unless a key was required. Terminal requests are left
    /// alone. Returns the stage after the call.
    pub(crate) fn advance(&mut self, expected: ActStage) -> ActStage {
        if self.stage.is_terminal() {
            return self.stage;
        }
        if self.stage != expected {
            let attempted = expected.successor().unwrap_or(expected);
            self.fail(FailReason::StageViolation {
                from: self.stage,
                attempted,
            });
            return self.stage;
        }

        let Some(mut next) = self.stage.successor() else {
            return self.stage;
        };
        if next == ActStage::NeedUserKey && !self.needs_user_key {
            next = ActStage::IpConfigStart;
        }

        if !self.precondition_met(next) {
            self.fail(FailReason::StageViolation {
                from: self.stage,
                attempted: next,
            });
            return self.stage;
        }

        self.transition(next, None);
        self.stage
    }

    fn precondition_met(&self, next: ActStage) -> bool {
        match next {
            ActStage::IpConfigStart if self.stage == ActStage::NeedUserKey => {
                self.user_key.is_some()
            }
            ActStage::IpConfigGet => self.ip_request_issued,
            ActStage::IpConfigCommit | ActStage::Activated => self.ip4_config.is_some(),
            _ => true,
        }
    }

    /// Stores an IP configuration.
    ///
    /// In `IpConfigGet` this also moves the request to `IpConfigCommit`.
    /// Later stages (a lease renewal) replace the stored config. Earlier
    /// stages fail the request.
    pub(crate) fn set_ip_config(&mut self, config: Ip4Config) -> ActStage {
        match self.stage {
            ActStage::IpConfigGet => {
                self.ip4_config = Some(config);
                self.transition(ActStage::IpConfigCommit, None);
            }
            ActStage::IpConfigCommit | ActStage::Activated => {
                debug!("Replacing IPv4 config for {} on {}", self.id, self.device);
                self.ip4_config = Some(config);
            }
            stage if stage.is_terminal() => {}
            stage => {
                self.fail(FailReason::StageViolation {
                    from: stage,
                    attempted: ActStage::IpConfigCommit,
                });
            }
        }
        self.stage
    }

    /// Cancels the request. No-op once terminal.
    pub(crate) fn cancel(&mut self) {
        if self.stage.is_terminal() {
            return;
        }
        self.release_key_request();
        self.transition(ActStage::Cancelled, None);
    }

    /// Fails the request with `reason`. No-op once terminal.
    pub(crate) fn fail(&mut self, reason: FailReason) {
        if self.stage.is_terminal() {
            debug!(
                "Ignoring failure '{reason}' for {}: already {}",
                self.id, self.stage
            );
            return;
        }
        warn!("Activation {} on {} failed: {reason}", self.id, self.device);
        self.release_key_request();
        self.failure = Some(reason.clone());
        self.transition(ActStage::Failed, Some(reason));
    }

    /// Fails an activated request whose link went down. Only valid in
    /// `Activated`; every other stage is left alone.
    pub(crate) fn link_lost(&mut self, reason: FailReason) {
        if self.stage != ActStage::Activated {
            return;
        }
        warn!("Link of activation {} on {} went down: {reason}", self.id, self.device);
        self.failure = Some(reason.clone());
        self.transition(ActStage::Failed, Some(reason));
    }

    fn release_key_request(&mut self) {
        if let Some(token) = self.key_request.take() {
            token.cancel();
        }
    }

    fn transition(&mut self, new: ActStage, reason: Option<FailReason>) {
        let old = self.stage;
        self.stage = new;
        debug!(
            "Activation {} on {}: {old} -> {new}",
            self.id, self.device
        );
        // No subscribers is fine.
        let _ = self.events.send(StageChanged {
            request: self.id,
            device: self.device.clone(),
            old,
            new,
            reason,
        });
    }
}
