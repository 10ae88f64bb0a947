//! PPP helper bridge.
//!
//! [`PppManager`] launches pppd with the NetworkManager plugin, waits for the
//! plugin to claim its bus name, then turns the plugin's `Status` and
//! `IP4Config` signals into [`PppEvent`]s.
//!
//! # Session lifecycle
//!
//! - `start()` spawns the helper and arms a watchdog (10 s by default).
//! - The helper claiming its bus name disarms the watchdog and subscribes
//!   to its signals.
//! - The watchdog firing first, the name vanishing, or the process exiting
//!   ends the session with [`PppEvent::Failed`].
//! - `stop()` tears everything down. It is idempotent and also runs on drop.
//!
//! All background work (watchdog, name watch, signal subscription, child
//! reaping) runs in small tasks that only forward tagged inputs into one
//! queue; every state change happens inside [`PppManager::next_event`].
//! Inputs tagged with an older session generation are discarded, so
//! nothing from a stopped session can leak into the next one.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use futures_timer::Delay;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::builders::ppp::PppOptions;
use crate::api::config::PppConfig;
use crate::api::models::{
    Error, FailReason, Ip4Config, PppFailure, PppState, PropValue, PropertyBag, Result,
};
use crate::core::cmd_line::pppd_args;
use crate::core::process::{HelperExit, ProcessRunner};
use crate::types::constants::ppp::{FALLBACK_NETMASK, keys};
use crate::util::utils::ipv4_from_raw;

/// A signal emitted by the helper on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum HelperSignal {
    /// `Status(u32)`: the helper's PPP phase.
    Status(u32),
    /// `IP4Config(a{sv})`: the negotiated configuration.
    Ip4Config(PropertyBag),
}

/// Bus access needed by the bridge.
#[async_trait]
pub trait HelperBus: Send + Sync {
    /// Ownership changes of `name`: `true` when claimed, `false` when lost.
    async fn watch_name(&self, name: &str) -> Result<BoxStream<'static, bool>>;

    /// Whether `name` currently has an owner.
    async fn has_owner(&self, name: &str) -> Result<bool>;

    /// Signals published by the owner of `name`.
    async fn helper_signals(&self, name: &str) -> Result<BoxStream<'static, HelperSignal>>;
}

/// Events surfaced by the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum PppEvent {
    StateChanged(PppState),
    Ip4Config { interface: String, config: Ip4Config },
    /// The session is over; the bridge has already stopped itself.
    Failed(FailReason),
}

#[derive(Debug)]
enum HelperInput {
    WatchdogFired,
    NameOwner(bool),
    Signal(HelperSignal),
    Exited(HelperExit),
    BusError(String),
}

#[derive(Debug)]
struct Session {
    device: String,
    pid: Option<u32>,
    registered: bool,
    watchdog: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns one pppd process at a time.
pub struct PppManager {
    config: PppConfig,
    runner: Arc<dyn ProcessRunner>,
    bus: Arc<dyn HelperBus>,
    session: Option<Session>,
    generation: u64,
    inputs_tx: mpsc::UnboundedSender<(u64, HelperInput)>,
    inputs_rx: mpsc::UnboundedReceiver<(u64, HelperInput)>,
}

impl PppManager {
    pub fn new(config: PppConfig, runner: Arc<dyn ProcessRunner>, bus: Arc<dyn HelperBus>) -> Self {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        Self {
            config,
            runner,
            bus,
            session: None,
            generation: 0,
            inputs_tx,
            inputs_rx,
        }
    }

    /// Returns `true` while a helper session exists.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Pid of the running helper, if any.
    pub fn pid(&self) -> Option<u32> {
        self.session.as_ref().and_then(|s| s.pid)
    }

    /// Launches pppd on `device`.
    ///
    /// Any previous session is stopped first. Must be called from within a
    /// tokio runtime.
    pub fn start(&mut self, device: &str, opts: &PppOptions) -> Result<()> {
        self.stop();

        let binary = self.config.locate_binary().ok_or(Error::BinaryNotFound)?;
        let argv = pppd_args(binary, device, opts, &self.config.plugin_path);
        info!("Starting pppd: {}", argv.join(" "));

        let helper = self
            .runner
            .spawn(&argv)
            .map_err(|e| Error::SpawnFailed(e.to_string()))?;
        debug!("pppd started with pid {}", helper.pid);

        self.generation += 1;
        let generation = self.generation;

        let watchdog = {
            let tx = self.inputs_tx.clone();
            let timeout = self.config.watchdog;
            tokio::spawn(async move {
                Delay::new(timeout).await;
                let _ = tx.send((generation, HelperInput::WatchdogFired));
            })
        };

        let name_watch = {
            let tx = self.inputs_tx.clone();
            let bus = Arc::clone(&self.bus);
            let name = self.config.bus_name.clone();
            tokio::spawn(async move {
                match bus.watch_name(&name).await {
                    Ok(mut owners) => {
                        // Subscribed already, so a claim made before this
                        // point is either seen here or in the stream.
                        match bus.has_owner(&name).await {
                            Ok(true) => {
                                if tx.send((generation, HelperInput::NameOwner(true))).is_err() {
                                    return;
                                }
                            }
                            Ok(false) => {}
                            Err(e) => {
                                let _ = tx.send((generation, HelperInput::BusError(e.to_string())));
                                return;
                            }
                        }
                        while let Some(owned) = owners.next().await {
                            if tx.send((generation, HelperInput::NameOwner(owned))).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send((generation, HelperInput::BusError(e.to_string())));
                    }
                }
            })
        };

        let reaper = {
            let tx = self.inputs_tx.clone();
            let exit = helper.exit;
            tokio::spawn(async move {
                if let Ok(status) = exit.await {
                    let _ = tx.send((generation, HelperInput::Exited(status)));
                }
            })
        };

        self.session = Some(Session {
            device: device.to_owned(),
            pid: Some(helper.pid),
            registered: false,
            watchdog: Some(watchdog),
            tasks: vec![name_watch, reaper],
        });
        Ok(())
    }

    /// Waits for the next event of the current session.
    ///
    /// Pends forever while no session is running. Safe to drop mid-wait:
    /// inputs are only consumed once they are fully handled.
    pub async fn next_event(&mut self) -> PppEvent {
        loop {
            let Some((generation, input)) = self.inputs_rx.recv().await else {
                // We hold a sender, so the queue never closes.
                continue;
            };
            if generation != self.generation || self.session.is_none() {
                debug!("Dropping stale helper input {input:?}");
                continue;
            }
            if let Some(event) = self.handle(input) {
                return event;
            }
        }
    }

    fn handle(&mut self, input: HelperInput) -> Option<PppEvent> {
        let session = self.session.as_mut()?;
        match input {
            HelperInput::WatchdogFired => {
                if session.registered {
                    return None;
                }
                warn!("pppd did not register within {:?}", self.config.watchdog);
                self.stop();
                Some(PppEvent::Failed(FailReason::HelperWatchdog))
            }
            HelperInput::NameOwner(true) => {
                if session.registered {
                    return None;
                }
                info!("pppd registered as {}", self.config.bus_name);
                session.registered = true;
                if let Some(watchdog) = session.watchdog.take() {
                    watchdog.abort();
                }
                let listener = self.spawn_signal_listener();
                if let Some(session) = self.session.as_mut() {
                    session.tasks.push(listener);
                }
                None
            }
            HelperInput::NameOwner(false) => {
                if !session.registered {
                    debug!("Ignoring name loss before registration");
                    return None;
                }
                warn!("pppd disappeared from the bus");
                self.stop();
                Some(PppEvent::Failed(FailReason::HelperVanished))
            }
            HelperInput::Signal(HelperSignal::Status(code)) => {
                let state = PppState::from(code);
                debug!("pppd state changed to {state}");
                Some(PppEvent::StateChanged(state))
            }
            HelperInput::Signal(HelperSignal::Ip4Config(props)) => {
                match parse_ip4_config(&props) {
                    Ok((interface, config)) => {
                        let interface = interface.unwrap_or_else(|| session.device.clone());
                        info!("pppd reported IPv4 config on {interface}: {}", config.address);
                        Some(PppEvent::Ip4Config { interface, config })
                    }
                    Err(e) => {
                        warn!("Invalid IPv4 config from pppd: {e}");
                        self.stop();
                        Some(PppEvent::Failed(FailReason::IpConfigStartFailed(e)))
                    }
                }
            }
            HelperInput::Exited(exit) => {
                // Already reaped; nothing left to signal.
                session.pid = None;
                let reason = match exit.code {
                    Some(code) if code > 0 => {
                        let failure = PppFailure::from(code.unsigned_abs());
                        warn!("pppd exited: {failure}");
                        FailReason::Ppp(failure)
                    }
                    Some(_) => FailReason::Other("pppd exited".into()),
                    None => FailReason::Other("pppd was killed by a signal".into()),
                };
                self.stop();
                Some(PppEvent::Failed(reason))
            }
            HelperInput::BusError(e) => {
                warn!("Lost bus access while supervising pppd: {e}");
                self.stop();
                Some(PppEvent::Failed(FailReason::Other(e)))
            }
        }
    }

    fn spawn_signal_listener(&self) -> JoinHandle<()> {
        let tx = self.inputs_tx.clone();
        let bus = Arc::clone(&self.bus);
        let name = self.config.bus_name.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            match bus.helper_signals(&name).await {
                Ok(mut signals) => {
                    while let Some(signal) = signals.next().await {
                        if tx.send((generation, HelperInput::Signal(signal))).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send((generation, HelperInput::BusError(e.to_string())));
                }
            }
        })
    }

    /// Stops the current session.
    ///
    /// Cancels the watchdog, drops the bus subscriptions, sends SIGTERM to
    /// the helper if it is still running and forgets the session. Calling
    /// it again is a no-op.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        // Anything still queued for this session is now stale.
        self.generation += 1;

        if let Some(watchdog) = session.watchdog.take() {
            watchdog.abort();
        }
        for task in session.tasks.drain(..) {
            task.abort();
        }
        if let Some(pid) = session.pid.take() {
            info!("Stopping pppd (pid {pid})");
            self.runner.terminate(pid);
        }
    }
}

impl Drop for PppManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Parses the helper's `IP4Config` dictionary.
///
/// Returns the interface the helper reported (if any) and the config. A
/// zero or missing netmask becomes [`FALLBACK_NETMASK`]; every `dns_server`
/// entry is kept in order. WINS servers are not supported and are dropped.
pub(crate) fn parse_ip4_config(
    props: &PropertyBag,
) -> std::result::Result<(Option<String>, Ip4Config), String> {
    let raw = |key: &str| props.get(key).and_then(PropValue::as_u32).filter(|v| *v != 0);

    let address = raw(keys::ADDRESS)
        .map(ipv4_from_raw)
        .ok_or_else(|| "missing address".to_string())?;
    let netmask = raw(keys::NETMASK).map_or(FALLBACK_NETMASK, ipv4_from_raw);
    let gateway = raw(keys::GATEWAY).map(ipv4_from_raw);

    let nameservers = match props.get(keys::DNS) {
        Some(PropValue::U32List(list)) => list.iter().copied().map(ipv4_from_raw).collect(),
        Some(PropValue::U32(single)) => vec![ipv4_from_raw(*single)],
        _ => Vec::new(),
    };

    if props.contains_key(keys::WINS) {
        debug!("Ignoring WINS servers reported by pppd; WINS is not supported");
    }

    let interface = props
        .get(keys::INTERFACE)
        .and_then(PropValue::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);

    Ok((
        interface,
        Ip4Config {
            address,
            netmask,
            gateway,
            nameservers,
        },
    ))
}
