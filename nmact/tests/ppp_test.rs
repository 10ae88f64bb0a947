//! PPP bridge tests against a fake process runner and helper bus.

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use nmact::{
    ActStage, ActivationEngine, ActivationSpec, EngineConfig, Error, FailReason, HelperBus,
    HelperExit, HelperSignal, PppConfig, PppEvent, PppFailure, PppLink, PppManager, PppOptions,
    PppOptionsBuilder, PppState, ProcessRunner, PropValue, PropertyBag, Result, SpawnedHelper,
};

const PID: u32 = 4242;

#[derive(Default)]
struct FakeRunner {
    refuse_spawn: AtomicBool,
    spawned: Mutex<Vec<Vec<String>>>,
    terminated: Mutex<Vec<u32>>,
    exits: Mutex<Vec<oneshot::Sender<HelperExit>>>,
}

impl FakeRunner {
    fn exit_with(&self, code: Option<i32>) {
        let tx = self.exits.lock().unwrap().pop().expect("no running helper");
        // The reaper is gone once the session was stopped.
        let _ = tx.send(HelperExit { code });
    }

    fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }
}

impl ProcessRunner for FakeRunner {
    fn spawn(&self, argv: &[String]) -> io::Result<SpawnedHelper> {
        if self.refuse_spawn.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "not permitted"));
        }
        self.spawned.lock().unwrap().push(argv.to_vec());
        let (tx, rx) = oneshot::channel();
        self.exits.lock().unwrap().push(tx);
        Ok(SpawnedHelper { pid: PID, exit: rx })
    }

    fn terminate(&self, pid: u32) {
        self.terminated.lock().unwrap().push(pid);
    }
}

struct FakeBus {
    /// Whether the helper name is already owned when the bridge asks.
    owned: AtomicBool,
    owners: Mutex<Option<mpsc::UnboundedReceiver<bool>>>,
    signals: Mutex<Option<mpsc::UnboundedReceiver<HelperSignal>>>,
}

#[async_trait]
impl HelperBus for FakeBus {
    async fn watch_name(&self, _name: &str) -> Result<BoxStream<'static, bool>> {
        match self.owners.lock().unwrap().take() {
            Some(rx) => Ok(rx.boxed()),
            None => Err(Error::Transport("name already watched".into())),
        }
    }

    async fn has_owner(&self, _name: &str) -> Result<bool> {
        Ok(self.owned.load(Ordering::SeqCst))
    }

    async fn helper_signals(&self, _name: &str) -> Result<BoxStream<'static, HelperSignal>> {
        match self.signals.lock().unwrap().take() {
            Some(rx) => Ok(rx.boxed()),
            None => Err(Error::Transport("signals already taken".into())),
        }
    }
}

struct Rig {
    runner: Arc<FakeRunner>,
    owners: mpsc::UnboundedSender<bool>,
    signals: mpsc::UnboundedSender<HelperSignal>,
    config: PppConfig,
    bus: Arc<FakeBus>,
}

impl Rig {
    fn new() -> Self {
        let (owners, owners_rx) = mpsc::unbounded();
        let (signals, signals_rx) = mpsc::unbounded();
        let bus = Arc::new(FakeBus {
            owned: AtomicBool::new(false),
            owners: Mutex::new(Some(owners_rx)),
            signals: Mutex::new(Some(signals_rx)),
        });
        // Any existing file will do as the binary; nothing is executed.
        let binary = std::env::current_exe().unwrap();
        Self {
            runner: Arc::default(),
            owners,
            signals,
            config: PppConfig::new()
                .with_search_paths([PathBuf::from("/nonexistent/pppd"), binary])
                .with_plugin_path("/usr/lib/pppd/nm-pppd-plugin.so")
                .with_watchdog(Duration::from_millis(200)),
            bus,
        }
    }

    fn manager(&self) -> PppManager {
        PppManager::new(
            self.config.clone(),
            Arc::clone(&self.runner) as Arc<dyn ProcessRunner>,
            Arc::clone(&self.bus) as Arc<dyn HelperBus>,
        )
    }
}

async fn next(manager: &mut PppManager) -> PppEvent {
    tokio::time::timeout(Duration::from_secs(5), manager.next_event())
        .await
        .expect("no event from the bridge")
}

fn ip4_bag(interface: Option<&str>) -> PropertyBag {
    let mut bag = PropertyBag::new();
    bag.insert(
        "address".into(),
        PropValue::U32(u32::from_ne_bytes([10, 0, 0, 7])),
    );
    bag.insert(
        "gateway".into(),
        PropValue::U32(u32::from_ne_bytes([10, 0, 0, 1])),
    );
    bag.insert(
        "dns_server".into(),
        PropValue::U32List(vec![u32::from_ne_bytes([9, 9, 9, 9])]),
    );
    if let Some(name) = interface {
        bag.insert("interface".into(), PropValue::Str(name.into()));
    }
    bag
}

#[tokio::test]
async fn test_start_builds_command_line_with_plugin_last() {
    let rig = Rig::new();
    let mut manager = rig.manager();
    let opts = PppOptionsBuilder::new().baud(115_200).mtu(1400).build();
    manager.start("ttyUSB0", &opts).unwrap();

    assert!(manager.is_running());
    assert_eq!(manager.pid(), Some(PID));
    let argv = rig.runner.spawned.lock().unwrap()[0].clone();
    assert_eq!(PathBuf::from(&argv[0]), std::env::current_exe().unwrap());
    assert_eq!(&argv[1..5], ["nodetach", "lock", "ttyUSB0", "115200"]);
    assert!(argv.windows(2).any(|w| w == ["mtu", "1400"]));
    assert_eq!(
        &argv[argv.len() - 2..],
        ["plugin", "/usr/lib/pppd/nm-pppd-plugin.so"]
    );
}

#[tokio::test]
async fn test_missing_binary_is_reported() {
    let rig = Rig::new();
    let mut manager = PppManager::new(
        rig.config.clone().with_search_paths(["/nonexistent/pppd"]),
        Arc::clone(&rig.runner) as Arc<dyn ProcessRunner>,
        Arc::clone(&rig.bus) as Arc<dyn HelperBus>,
    );
    let err = manager.start("ttyS0", &PppOptions::default()).unwrap_err();
    assert_eq!(err, Error::BinaryNotFound);
    assert!(!manager.is_running());
    assert!(rig.runner.spawned.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_spawn_failure_is_reported_without_a_session() {
    let rig = Rig::new();
    rig.runner.refuse_spawn.store(true, Ordering::SeqCst);
    let mut manager = rig.manager();

    let err = manager.start("ttyS0", &PppOptions::default()).unwrap_err();
    assert!(matches!(err, Error::SpawnFailed(ref msg) if msg.contains("not permitted")));
    assert!(!manager.is_running());
    assert_eq!(manager.pid(), None);

    // No watchdog was armed, so nothing follows.
    let waited = tokio::time::timeout(Duration::from_millis(400), manager.next_event()).await;
    assert!(waited.is_err(), "failed start produced {waited:?}");
    assert!(rig.runner.terminated().is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let rig = Rig::new();
    let mut manager = rig.manager();
    manager.start("ttyS0", &PppOptions::default()).unwrap();

    manager.stop();
    manager.stop();
    drop(manager);
    assert_eq!(rig.runner.terminated(), [PID]);
}

#[tokio::test]
async fn test_watchdog_fails_unregistered_helper() {
    let rig = Rig::new();
    let mut manager = rig.manager();
    manager.start("ttyS0", &PppOptions::default()).unwrap();

    assert_eq!(
        next(&mut manager).await,
        PppEvent::Failed(FailReason::HelperWatchdog)
    );
    assert!(!manager.is_running());
    assert_eq!(rig.runner.terminated(), [PID]);
}

#[tokio::test]
async fn test_registration_disarms_watchdog() {
    let rig = Rig::new();
    let mut manager = rig.manager();
    manager.start("ttyS0", &PppOptions::default()).unwrap();
    rig.owners.unbounded_send(true).unwrap();

    // Past the watchdog deadline, a status update is the next thing seen.
    tokio::time::sleep(Duration::from_millis(400)).await;
    rig.signals.unbounded_send(HelperSignal::Status(9)).unwrap();
    assert_eq!(
        next(&mut manager).await,
        PppEvent::StateChanged(PppState::Running)
    );
    assert!(manager.is_running());
}

#[tokio::test]
async fn test_name_claimed_before_watch_counts_as_registration() {
    let rig = Rig::new();
    // The helper grabbed its name before the watch was in place, so no
    // ownership change will ever be signalled.
    rig.bus.owned.store(true, Ordering::SeqCst);
    let mut manager = rig.manager();
    manager.start("ttyS0", &PppOptions::default()).unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    rig.signals.unbounded_send(HelperSignal::Status(9)).unwrap();
    assert_eq!(
        next(&mut manager).await,
        PppEvent::StateChanged(PppState::Running)
    );
    assert!(manager.is_running());
    assert!(rig.runner.terminated().is_empty());
}

#[tokio::test]
async fn test_name_loss_after_registration_is_fatal() {
    let rig = Rig::new();
    let mut manager = rig.manager();
    manager.start("ttyS0", &PppOptions::default()).unwrap();
    rig.owners.unbounded_send(true).unwrap();
    rig.owners.unbounded_send(false).unwrap();

    assert_eq!(
        next(&mut manager).await,
        PppEvent::Failed(FailReason::HelperVanished)
    );
    assert_eq!(rig.runner.terminated(), [PID]);
}

#[tokio::test]
async fn test_ip4_config_falls_back_to_device_name() {
    let rig = Rig::new();
    let mut manager = rig.manager();
    manager.start("ttyACM0", &PppOptions::default()).unwrap();
    rig.owners.unbounded_send(true).unwrap();
    rig.signals
        .unbounded_send(HelperSignal::Ip4Config(ip4_bag(None)))
        .unwrap();

    let PppEvent::Ip4Config { interface, config } = next(&mut manager).await else {
        panic!("expected an IPv4 config");
    };
    assert_eq!(interface, "ttyACM0");
    assert_eq!(config.address, Ipv4Addr::new(10, 0, 0, 7));
    assert_eq!(config.netmask, Ipv4Addr::new(255, 0, 0, 0));
    assert_eq!(config.gateway, Some(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(config.nameservers, [Ipv4Addr::new(9, 9, 9, 9)]);
}

#[tokio::test]
async fn test_ip4_config_prefers_reported_interface() {
    let rig = Rig::new();
    let mut manager = rig.manager();
    manager.start("ttyACM0", &PppOptions::default()).unwrap();
    rig.owners.unbounded_send(true).unwrap();
    rig.signals
        .unbounded_send(HelperSignal::Ip4Config(ip4_bag(Some("ppp0"))))
        .unwrap();

    let PppEvent::Ip4Config { interface, .. } = next(&mut manager).await else {
        panic!("expected an IPv4 config");
    };
    assert_eq!(interface, "ppp0");
}

#[tokio::test]
async fn test_exit_code_is_classified() {
    let rig = Rig::new();
    let mut manager = rig.manager();
    manager.start("ttyS0", &PppOptions::default()).unwrap();
    rig.runner.exit_with(Some(16));

    assert_eq!(
        next(&mut manager).await,
        PppEvent::Failed(FailReason::Ppp(PppFailure::Hangup))
    );
    // Already reaped, so there is nobody left to signal.
    assert!(rig.runner.terminated().is_empty());
}

#[tokio::test]
async fn test_stale_inputs_do_not_leak_into_next_session() {
    let rig = Rig::new();
    let mut manager = rig.manager();
    manager.start("ttyS0", &PppOptions::default()).unwrap();
    manager.stop();
    // Exit of the stopped helper arrives late.
    rig.runner.exit_with(Some(16));

    let waited = tokio::time::timeout(Duration::from_millis(100), manager.next_event()).await;
    assert!(waited.is_err(), "stopped session produced {waited:?}");
}

#[tokio::test]
async fn test_ppp_link_drives_activation_to_completion() {
    let rig = Rig::new();
    let link = PppLink::new(rig.manager(), "ttyUSB1", PppOptions::default());
    let engine = ActivationEngine::spawn("ttyUSB1", link, EngineConfig::new());
    let mut events = engine.subscribe();

    let id = engine.activate(ActivationSpec::default()).await.unwrap();
    loop {
        let ev = events.recv().await.unwrap();
        if ev.new == ActStage::IpConfigGet {
            break;
        }
    }
    assert_eq!(rig.runner.spawned.lock().unwrap().len(), 1);

    rig.owners.unbounded_send(true).unwrap();
    rig.signals.unbounded_send(HelperSignal::Status(8)).unwrap();
    rig.signals
        .unbounded_send(HelperSignal::Ip4Config(ip4_bag(Some("ppp0"))))
        .unwrap();

    let stage = tokio::time::timeout(Duration::from_secs(5), engine.wait_terminal(id))
        .await
        .unwrap();
    assert_eq!(stage, Ok(ActStage::Activated));
    assert_eq!(
        engine.ip4_config(id).await.unwrap().map(|c| c.address),
        Some(Ipv4Addr::new(10, 0, 0, 7))
    );

    engine.cancel(id).await.unwrap();
    assert_eq!(engine.stage(id).await, Ok(ActStage::Activated));
}

#[tokio::test]
async fn test_ppp_link_watchdog_fails_activation() {
    let rig = Rig::new();
    let link = PppLink::new(rig.manager(), "ttyUSB1", PppOptions::default());
    let engine = ActivationEngine::spawn("ttyUSB1", link, EngineConfig::new());

    let id = engine.activate(ActivationSpec::default()).await.unwrap();
    let stage = tokio::time::timeout(Duration::from_secs(5), engine.wait_terminal(id))
        .await
        .unwrap();
    assert_eq!(stage, Ok(ActStage::Failed));
}
