//! Activation engine.
//!
//! One [`ActivationEngine`] task owns a [`Device`] and the [`LinkSetup`] for
//! it, and is the only code that ever moves that device's requests between
//! stages. Everything else talks to it through an [`EngineHandle`]. Inputs
//! (commands, link events, the optional stage timer) are handled one at a
//! time, so no two transitions of a request can interleave.
//!
//! After each input the engine pumps the automatic stages: it keeps
//! advancing until the request is terminal or has to wait for something
//! external (a user key in `NeedUserKey`, an address in `IpConfigGet`).

use async_trait::async_trait;
use futures::future::{self, Either};
use futures::{FutureExt, select};
use futures_timer::Delay;
use log::{debug, info};
use std::pin::pin;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::api::config::EngineConfig;
use crate::api::models::{
    ActStage, Error, FailReason, Ip4Config, RequestId, Result, StageChanged,
};
use crate::core::activation::{ActivationRequest, ActivationSpec};
use crate::core::device::Device;
use crate::types::constants::capacity;

/// Asynchronous input from a link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// An address arrived (DHCP lease, PPP IPCP, ...).
    IpConfig(Ip4Config),
    /// The link went down or could not be brought up.
    Failed(FailReason),
}

/// Technology-specific steps of an activation.
///
/// The engine calls these in stage order. Every method gets the request it
/// is acting for; none of them may change its stage.
#[async_trait]
pub trait LinkSetup: Send {
    /// `DevicePrepare`: bring the device to a usable state.
    async fn prepare(&mut self, req: &ActivationRequest) -> std::result::Result<(), FailReason>;

    /// `DeviceConfig`: apply link-level settings. Returns `true` if a user
    /// secret is needed before IP configuration can start.
    async fn configure(&mut self, req: &ActivationRequest) -> std::result::Result<bool, FailReason>;

    /// Called on entering `NeedUserKey`. `cancel` fires if the request is
    /// cancelled or fails before a key arrives.
    async fn request_secrets(&mut self, _req: &ActivationRequest, _cancel: CancellationToken) {}

    /// `IpConfigStart`: issue the DHCP/PPP request.
    async fn start_ip_config(&mut self, req: &ActivationRequest) -> std::result::Result<(), FailReason>;

    /// Next asynchronous event. Must pend while there is nothing to report,
    /// and must not lose events when the returned future is dropped.
    async fn next_event(&mut self) -> LinkEvent;

    /// `IpConfigCommit`: apply the received configuration.
    async fn commit(
        &mut self,
        req: &ActivationRequest,
        config: &Ip4Config,
    ) -> std::result::Result<(), FailReason>;

    /// Undo everything; called when a request ends in `Failed`/`Cancelled`
    /// or is superseded.
    async fn teardown(&mut self);
}

enum Command {
    Activate {
        spec: ActivationSpec,
        reply: oneshot::Sender<RequestId>,
    },
    SupplyUserKey {
        id: RequestId,
        key: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SetIpConfig {
        id: RequestId,
        config: Ip4Config,
        reply: oneshot::Sender<Result<ActStage>>,
    },
    Cancel {
        id: RequestId,
        reply: oneshot::Sender<Result<()>>,
    },
    Fail {
        id: RequestId,
        reason: FailReason,
        reply: oneshot::Sender<Result<()>>,
    },
    Stage {
        id: RequestId,
        reply: oneshot::Sender<Result<ActStage>>,
    },
    Ip4Config {
        id: RequestId,
        reply: oneshot::Sender<Result<Option<Ip4Config>>>,
    },
}

enum Step {
    Command(Option<Command>),
    Link(LinkEvent),
    StageTimeout,
}

struct StageTimer {
    id: RequestId,
    stage: ActStage,
    delay: Delay,
}

/// Drives activation requests for one device.
pub struct ActivationEngine<L: LinkSetup> {
    device: Device,
    link: L,
    config: EngineConfig,
    commands: mpsc::Receiver<Command>,
    link_active: bool,
    timer: Option<StageTimer>,
}

impl<L: LinkSetup + 'static> ActivationEngine<L> {
    /// Creates the engine and its handle without starting it.
    pub fn new(interface: impl Into<String>, link: L, config: EngineConfig) -> (Self, EngineHandle) {
        let device = Device::new(interface);
        let (tx, commands) = mpsc::channel(capacity::COMMANDS);
        let handle = EngineHandle {
            commands: tx,
            events: device.events_sender(),
        };
        let engine = Self {
            device,
            link,
            config,
            commands,
            link_active: false,
            timer: None,
        };
        (engine, handle)
    }

    /// Spawns the engine on the current tokio runtime.
    pub fn spawn(interface: impl Into<String>, link: L, config: EngineConfig) -> EngineHandle {
        let (engine, handle) = Self::new(interface, link, config);
        tokio::spawn(engine.run());
        handle
    }

    /// Runs until every [`EngineHandle`] has been dropped.
    pub async fn run(mut self) {
        info!("Activation engine for {} started", self.device.interface());
        loop {
            self.sync_timer();
            let step = {
                let command = self.commands.recv().fuse();
                let link = self.link.next_event().fuse();
                let timer = match self.timer.as_mut() {
                    Some(t) => Either::Left(&mut t.delay),
                    None => Either::Right(future::pending::<()>()),
                }
                .fuse();
                let mut command = pin!(command);
                let mut link = pin!(link);
                let mut timer = pin!(timer);
                select! {
                    cmd = command => Step::Command(cmd),
                    ev = link => Step::Link(ev),
                    _ = timer => Step::StageTimeout,
                }
            };

            match step {
                Step::Command(None) => break,
                Step::Command(Some(cmd)) => self.handle_command(cmd).await,
                Step::Link(ev) => self.handle_link_event(ev),
                Step::StageTimeout => self.handle_stage_timeout(),
            }
            self.drive().await;
        }

        if let Some(req) = self.device.current_mut() {
            req.cancel();
        }
        self.teardown_link().await;
        info!("Activation engine for {} stopped", self.device.interface());
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Activate { spec, reply } => {
                let id = self.device.activate(spec).id();
                // The superseded request may still own the link.
                self.teardown_link().await;
                let _ = reply.send(id);
            }
            Command::SupplyUserKey { id, key, reply } => {
                let result = self.device.request_mut(id).and_then(|req| {
                    if req.supply_user_key(key) {
                        Ok(())
                    } else {
                        Err(Error::UnexpectedReply(format!(
                            "request {id} is not waiting for a key"
                        )))
                    }
                });
                let _ = reply.send(result);
            }
            Command::SetIpConfig { id, config, reply } => {
                let result = self.device.request_mut(id).map(|req| req.set_ip_config(config));
                let _ = reply.send(result);
            }
            Command::Cancel { id, reply } => {
                let result = self.device.request_mut(id).map(ActivationRequest::cancel);
                let _ = reply.send(result);
            }
            Command::Fail { id, reason, reply } => {
                let result = self.device.request_mut(id).map(|req| req.fail(reason));
                let _ = reply.send(result);
            }
            Command::Stage { id, reply } => {
                let _ = reply.send(self.device.request(id).map(ActivationRequest::stage));
            }
            Command::Ip4Config { id, reply } => {
                let result = self
                    .device
                    .request(id)
                    .map(|req| req.ip4_config().cloned());
                let _ = reply.send(result);
            }
        }
    }

    fn handle_link_event(&mut self, ev: LinkEvent) {
        let Some(req) = self.device.current_mut() else {
            debug!("Dropping link event with no current request: {ev:?}");
            return;
        };
        if req.is_terminal() && req.stage() != ActStage::Activated {
            debug!("Dropping link event for finished request {}: {ev:?}", req.id());
            return;
        }
        match ev {
            LinkEvent::IpConfig(config) => {
                req.set_ip_config(config);
            }
            LinkEvent::Failed(reason) => {
                if req.stage() == ActStage::Activated {
                    req.link_lost(reason);
                } else {
                    req.fail(reason);
                }
            }
        }
    }

    fn handle_stage_timeout(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        if let Some(req) = self.device.current_mut()
            && req.id() == timer.id
            && req.stage() == timer.stage
        {
            req.fail(FailReason::StageTimeout(timer.stage));
        }
    }

    /// Re-arms the stage timer when the current (request, stage) changes.
    fn sync_timer(&mut self) {
        let Some(limit) = self.config.stage_timeout else {
            return;
        };
        let target = self
            .device
            .current()
            .filter(|r| !r.is_terminal() && r.stage() != ActStage::NeedUserKey)
            .map(|r| (r.id(), r.stage()));

        match (target, self.timer.as_ref()) {
            (None, _) => self.timer = None,
            (Some((id, stage)), Some(t)) if t.id == id && t.stage == stage => {}
            (Some((id, stage)), _) => {
                self.timer = Some(StageTimer {
                    id,
                    stage,
                    delay: Delay::new(limit),
                });
            }
        }
    }

    /// Advances the current request until it has to wait.
    async fn drive(&mut self) {
        loop {
            let Some(req) = self.device.current_mut() else {
                return;
            };
            match req.stage() {
                ActStage::Unknown => {
                    req.advance(ActStage::Unknown);
                }
                ActStage::DevicePrepare => {
                    self.link_active = true;
                    match self.link.prepare(req).await {
                        Ok(()) => {
                            req.advance(ActStage::DevicePrepare);
                        }
                        Err(reason) => req.fail(reason),
                    }
                }
                ActStage::DeviceConfig => match self.link.configure(req).await {
                    Ok(needs_key) => {
                        if needs_key {
                            req.require_user_key();
                        }
                        if req.advance(ActStage::DeviceConfig) == ActStage::NeedUserKey {
                            let token = CancellationToken::new();
                            req.set_key_request(token.clone());
                            self.link.request_secrets(req, token).await;
                            return;
                        }
                    }
                    Err(reason) => req.fail(reason),
                },
                ActStage::NeedUserKey => {
                    if req.user_key().is_none() {
                        return;
                    }
                    req.advance(ActStage::NeedUserKey);
                }
                ActStage::IpConfigStart => match self.link.start_ip_config(req).await {
                    Ok(()) => {
                        req.mark_ip_request_issued();
                        req.advance(ActStage::IpConfigStart);
                    }
                    Err(reason) => req.fail(reason),
                },
                ActStage::IpConfigGet => return,
                ActStage::IpConfigCommit => {
                    let Some(config) = req.ip4_config().cloned() else {
                        req.fail(FailReason::CommitFailed("no IPv4 config".into()));
                        continue;
                    };
                    match self.link.commit(req, &config).await {
                        Ok(()) => {
                            req.advance(ActStage::IpConfigCommit);
                            info!("{} activated with {}", req.device(), config.address);
                        }
                        Err(reason) => req.fail(reason),
                    }
                }
                ActStage::Activated => return,
                ActStage::Failed | ActStage::Cancelled => {
                    self.teardown_link().await;
                    return;
                }
            }
        }
    }

    async fn teardown_link(&mut self) {
        if self.link_active {
            self.link_active = false;
            self.link.teardown().await;
        }
    }
}

/// Cloneable handle to a running [`ActivationEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<StageChanged>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Starts a new activation, superseding the device's current one.
    pub async fn activate(&self, spec: ActivationSpec) -> Result<RequestId> {
        self.request(|reply| Command::Activate { spec, reply }).await
    }

    /// Supplies the secret for a request waiting in `NeedUserKey`.
    pub async fn supply_user_key(&self, id: RequestId, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        self.request(|reply| Command::SupplyUserKey { id, key, reply })
            .await?
    }

    /// Feeds an externally obtained IP configuration to the request.
    pub async fn set_ip_config(&self, id: RequestId, config: Ip4Config) -> Result<ActStage> {
        self.request(|reply| Command::SetIpConfig { id, config, reply })
            .await?
    }

    pub async fn cancel(&self, id: RequestId) -> Result<()> {
        self.request(|reply| Command::Cancel { id, reply }).await?
    }

    pub async fn fail(&self, id: RequestId, reason: FailReason) -> Result<()> {
        self.request(|reply| Command::Fail { id, reason, reply })
            .await?
    }

    /// Current stage of `id`, or [`Error::UnknownRequest`] once superseded.
    pub async fn stage(&self, id: RequestId) -> Result<ActStage> {
        self.request(|reply| Command::Stage { id, reply }).await?
    }

    pub async fn ip4_config(&self, id: RequestId) -> Result<Option<Ip4Config>> {
        self.request(|reply| Command::Ip4Config { id, reply }).await?
    }

    /// Subscribes to stage transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<StageChanged> {
        self.events.subscribe()
    }

    /// Waits for `id` to reach a terminal stage.
    ///
    /// Subscribe-then-check: the receiver is created before the current
    /// stage is read, so a transition in between cannot be missed.
    pub async fn wait_terminal(&self, id: RequestId) -> Result<ActStage> {
        let mut events = self.subscribe();
        let stage = self.stage(id).await?;
        if stage.is_terminal() {
            return Ok(stage);
        }
        loop {
            match events.recv().await {
                Ok(ev) if ev.request == id && ev.new.is_terminal() => return Ok(ev.new),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    let stage = self.stage(id).await?;
                    if stage.is_terminal() {
                        return Ok(stage);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(Error::Shutdown),
            }
        }
    }
}
