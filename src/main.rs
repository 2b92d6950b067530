//! Interactive demo against a simulated mesh.
//!
//! Runs the plugin on an in-process transport that announces a few
//! canned propagation nodes, then drops into a small REPL for the
//! operator commands. Useful for exercising the command surface and
//! the notification stream without a real network.

use anyhow::Result;
use propsync::announce::PROPAGATION_ASPECT;
use propsync::transport::{Announce, DeliveryMethod, FailedDelivery, NodeHash, SimTransport, StaticDirectory};
use propsync::PropagationPlugin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let transport = SimTransport::new();
    transport.enable_auto_script();

    let directory = StaticDirectory::new();
    directory.add_peer("id-bob", "Bob");
    directory.add_peer("id-carol", "Carol");
    directory.add_contact("alice", NodeHash::parse("d00d1234feedbeef")?);
    transport.learn_identity(NodeHash::parse("d00d1234feedbeef")?, "id-alice");

    let storage = tempfile::tempdir()?;
    let (plugin, mut events) =
        PropagationPlugin::attach(transport.clone(), directory, storage.path());

    // Notification lines print as they arrive, like a host chat pane.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("* {}", event.render());
        }
    });

    // A couple of relays announce themselves shortly after startup, and
    // one direct delivery fails so the retry path has something to do.
    let sim = transport.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        announce_relay(&sim, "9f86d081884c7d65", "id-bob", true);
        tokio::time::sleep(Duration::from_millis(400)).await;
        announce_relay(&sim, "60303ae22b998861", "id-carol", false);

        tokio::time::sleep(Duration::from_secs(2)).await;
        sim.publish_delivery_failure(FailedDelivery {
            destination: NodeHash::parse("d00d1234feedbeef").unwrap(),
            content: "are you there?".into(),
            title: String::new(),
            fields: Default::default(),
            desired_method: DeliveryMethod::Direct,
        });
    });

    println!("Simulated mesh running; 'help' lists commands, 'quit' exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            break;
        }

        println!("{}", plugin.handle_command(trimmed).await);
    }

    plugin.detach().await;
    Ok(())
}

fn announce_relay(sim: &Arc<SimTransport>, hash: &str, identity: &str, enabled: bool) {
    let hash = NodeHash::parse(hash).expect("valid demo hash");
    sim.learn_identity(hash.clone(), identity);

    let capability = bincode::serialize(&(1_700_000_000u64, enabled, 8_000_000u64))
        .expect("capability record serializes");
    sim.publish_announce(
        PROPAGATION_ASPECT,
        Announce {
            destination_hash: hash,
            identity_hash: identity.to_string(),
            app_data: Some(capability),
        },
    );
}
