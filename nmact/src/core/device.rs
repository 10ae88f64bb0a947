//! Device-side ownership of activation requests.
//!
//! A [`Device`] owns at most one current [`ActivationRequest`]. Starting a
//! new one cancels whatever was current. Callers refer to requests by
//! [`RequestId`]; a stale id resolves to nothing rather than to the wrong
//! request.

use log::info;
use tokio::sync::broadcast;

use crate::api::models::{Error, RequestId, Result, StageChanged};
use crate::core::activation::{ActivationRequest, ActivationSpec};
use crate::types::constants::capacity;

/// A network device and its current activation attempt.
#[derive(Debug)]
pub struct Device {
    interface: String,
    current: Option<ActivationRequest>,
    events: broadcast::Sender<StageChanged>,
}

impl Device {
    pub fn new(interface: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(capacity::STAGE_EVENTS);
        Self {
            interface: interface.into(),
            current: None,
            events,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Subscribes to stage transitions of every request on this device.
    pub fn subscribe(&self) -> broadcast::Receiver<StageChanged> {
        self.events.subscribe()
    }

    pub(crate) fn events_sender(&self) -> broadcast::Sender<StageChanged> {
        self.events.clone()
    }

    /// Starts a new activation, superseding the current one.
    pub fn activate(&mut self, spec: ActivationSpec) -> &mut ActivationRequest {
        if let Some(prev) = self.current.as_mut()
            && !prev.is_terminal()
        {
            info!(
                "Activation {} on {} superseded by a new request",
                prev.id(),
                self.interface
            );
            prev.cancel();
        }
        let req = ActivationRequest::new(&self.interface, spec, self.events.clone());
        self.current.insert(req)
    }

    pub fn current(&self) -> Option<&ActivationRequest> {
        self.current.as_ref()
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut ActivationRequest> {
        self.current.as_mut()
    }

    /// Looks up the current request by id.
    pub fn request(&self, id: RequestId) -> Result<&ActivationRequest> {
        self.current
            .as_ref()
            .filter(|r| r.id() == id)
            .ok_or(Error::UnknownRequest(id))
    }

    pub(crate) fn request_mut(&mut self, id: RequestId) -> Result<&mut ActivationRequest> {
        self.current
            .as_mut()
            .filter(|r| r.id() == id)
            .ok_or(Error::UnknownRequest(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::ActStage;

    #[test]
    fn new_request_supersedes_current() {
        let mut dev = Device::new("ppp0");
        let mut rx = dev.subscribe();
        let first = dev.activate(ActivationSpec::default()).id();
        dev.current_mut().unwrap().advance(ActStage::Unknown);

        let second = dev.activate(ActivationSpec::default()).id();
        assert_ne!(first, second);
        assert!(matches!(dev.request(first), Err(Error::UnknownRequest(id)) if id == first));
        assert_eq!(dev.request(second).unwrap().stage(), ActStage::Unknown);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].request, first);
        assert_eq!(events[1].new, ActStage::Cancelled);
    }
}
