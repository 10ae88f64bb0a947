/// Example activating a saved connection by its id and waiting for the result.
///
/// Usage: `cargo run --example activate -- "Office VPN"`
use nmact::{ActiveConnectionState, Client, ClientConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> nmact::Result<()> {
    let id = std::env::args().nth(1).unwrap_or_else(|| "Wired connection 1".to_string());

    let config = ClientConfig::from_env().with_wait_timeout(Duration::from_secs(20));
    let client = Client::with_config(config).await?;

    let Some(conn) = client.connection_by_id(&id).await? else {
        println!("No visible connection named {id:?}");
        return Ok(());
    };
    println!("Activating {} ({})", id, conn.path());

    let active = client
        .activate_connection(Some(conn.path()), None, None, None)
        .await?;
    println!("Active connection: {}", active.path());

    match client.wait_for_activation(active.path(), None).await? {
        ActiveConnectionState::Activated => println!("Connected"),
        state => println!("Activation ended in state {state}"),
    }

    Ok(())
}
