//! EzVille bridge entry point
//!
//! Wires the long-running tasks together: the MQTT client and gateway link
//! feed one inbound channel drained by the bridge coordinator; the
//! transmitter drains the command channel; the watchdog watches the
//! receive clock. Ctrl+C flips the shutdown watch channel.

use clap::Parser;
use ezville_bridge::infra::{CommMode, Config};
use ezville_bridge::io::{Ew11Link, Transport};
use ezville_bridge::services::{AckRegistry, Bridge, Transmitter, Watchdog};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// EzVille wallpad RS-485 to MQTT bridge
#[derive(Parser, Debug)]
#[command(name = "ezville-bridge", version, about)]
struct Args {
    /// Path to the add-on options JSON file
    #[arg(short, long, default_value = "/data/options.json")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default INFO; use RUST_LOG=debug for full traffic visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "ezville_bridge_starting");

    let args = Args::parse();

    // A missing or malformed option is the only fatal runtime error
    let config = Config::from_file(&args.config)?;
    info!(
        config_file = %args.config,
        mode = ?config.mode(),
        mqtt_server = %config.mqtt_server(),
        ew11_addr = %config.ew11_addr(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (inbound_tx, inbound_rx) = mpsc::channel(1000);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (discovery_done_tx, discovery_done_rx) = watch::channel(false);
    let acks = Arc::new(AckRegistry::new());
    let last_received = Arc::new(Mutex::new(None));

    // MQTT client: command subscriptions, broker-bridged gateway stream,
    // and every outbound publish
    let mqtt =
        ezville_bridge::io::mqtt::start_mqtt_client(&config, inbound_tx.clone(), shutdown_rx.clone());

    // Gateway link and outbound transport, per transport mode
    let transport = match config.mode() {
        CommMode::Mqtt => Transport::Broker(mqtt.clone()),
        CommMode::Socket | CommMode::Mixed => {
            let (frame_tx, frame_rx) = mpsc::channel(64);
            let link = Ew11Link::new(&config, inbound_tx.clone(), frame_rx);
            tokio::spawn(link.run(shutdown_rx.clone()));
            Transport::Socket(frame_tx)
        }
    };

    let transmitter =
        Transmitter::new(&config, cmd_rx, transport, acks.clone(), discovery_done_rx);
    tokio::spawn(transmitter.run());

    let watchdog = Watchdog::new(&config, last_received.clone());
    tokio::spawn(watchdog.run(shutdown_rx.clone()));

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run the coordinator - consumes inbound messages until shutdown
    let mut bridge =
        Bridge::new(config, mqtt, cmd_tx, acks, discovery_done_tx, last_received);
    bridge.run(inbound_rx, shutdown_rx).await;

    info!("ezville-bridge shutdown complete");
    Ok(())
}
