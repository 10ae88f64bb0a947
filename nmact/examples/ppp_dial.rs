/// Example dialing a PPP link on a serial modem with the activation engine.
///
/// Requires pppd and the NetworkManager pppd plugin. Usage:
/// `cargo run --example ppp_dial -- ttyUSB0`
use nmact::{
    ActStage, ActivationEngine, ActivationSpec, EngineConfig, PppConfig, PppLink, PppManager,
    PppOptionsBuilder, TokioRunner, ZbusHelperBus,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> nmact::Result<()> {
    let port = std::env::args().nth(1).unwrap_or_else(|| "ttyUSB0".to_string());

    let bus = ZbusHelperBus::system().await?;
    let manager = PppManager::new(
        PppConfig::new().with_watchdog(Duration::from_secs(20)),
        Arc::new(TokioRunner),
        Arc::new(bus),
    );
    let options = PppOptionsBuilder::new()
        .baud(115_200)
        .noauth(true)
        .usepeerdns(true)
        .lcp_echo(30, 4)
        .build();
    let link = PppLink::new(manager, &port, options);

    // Give every stage a minute before giving up
    let config = EngineConfig::new().with_stage_timeout(Duration::from_secs(60));
    let engine = ActivationEngine::spawn(&port, link, config);

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            match &ev.reason {
                Some(reason) => println!("{}: {} -> {} ({reason})", ev.request, ev.old, ev.new),
                None => println!("{}: {} -> {}", ev.request, ev.old, ev.new),
            }
        }
    });

    let id = engine
        .activate(ActivationSpec {
            user_requested: true,
            ..Default::default()
        })
        .await?;

    if engine.wait_terminal(id).await? == ActStage::Activated
        && let Some(ip) = engine.ip4_config(id).await?
    {
        println!("Up with {}/{} via {:?}", ip.address, ip.netmask, ip.gateway);
        tokio::time::sleep(Duration::from_secs(60)).await;
    }

    // The engine tears the link down once its last handle is gone.
    drop(engine);
    tokio::time::sleep(Duration::from_millis(500)).await;

    Ok(())
}
