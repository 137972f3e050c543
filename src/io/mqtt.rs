//! MQTT client for Home Assistant commands and the gateway broker bridge
//!
//! One client carries all broker traffic: command subscriptions under
//! `ezville/#`, the raw gateway stream on `ew11/recv` when the transport
//! runs over the broker, and every outbound publish (state, discovery and
//! raw `ew11/send` frames). Subscriptions are re-established on every
//! ConnAck so broker reconnects recover them.

use crate::infra::config::{CommMode, Config};
use crate::io::Inbound;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Topic prefix for Home Assistant state/command traffic
pub const HA_PREFIX: &str = "ezville";
/// Raw gateway stream topics
pub const EW11_RECV_TOPIC: &str = "ew11/recv";
pub const EW11_SEND_TOPIC: &str = "ew11/send";

const MQTT_PORT: u16 = 1883;

/// Cloneable publishing handle shared by the bridge and the transmitter
#[derive(Clone)]
pub struct MqttHandle {
    client: AsyncClient,
    mqtt_log: bool,
}

impl MqttHandle {
    pub fn new(client: AsyncClient, mqtt_log: bool) -> Self {
        Self { client, mqtt_log }
    }

    /// Publish one state attribute for a device instance
    pub async fn publish_state(&self, slug: &str, attr: &str, payload: &str) {
        let topic = format!("{HA_PREFIX}/{slug}/{attr}/state");
        if self.mqtt_log {
            info!(topic = %topic, payload = %payload, "ha_state_published");
        }
        if let Err(e) = self.client.publish(&topic, QoS::AtMostOnce, false, payload).await {
            error!(topic = %topic, error = %e, "mqtt_state_publish_failed");
        }
    }

    /// Publish a discovery registration payload
    pub async fn publish_discovery(&self, topic: &str, payload: &Value) {
        let body = payload.to_string();
        if let Err(e) = self.client.publish(topic, QoS::AtMostOnce, false, body).await {
            error!(topic = %topic, error = %e, "mqtt_discovery_publish_failed");
        }
    }

    /// Publish a raw RS-485 frame to the gateway send topic
    pub async fn publish_frame(&self, frame: &[u8]) {
        if let Err(e) =
            self.client.publish(EW11_SEND_TOPIC, QoS::AtMostOnce, false, frame.to_vec()).await
        {
            error!(error = %e, "mqtt_frame_publish_failed");
        }
    }
}

/// Start the MQTT client and route inbound publishes to the coordinator.
///
/// Returns the publishing handle; the event loop runs on its own task until
/// shutdown. Inbound messages are forwarded with `try_send` so a stalled
/// coordinator cannot block the broker keep-alive.
pub fn start_mqtt_client(
    config: &Config,
    inbound_tx: mpsc::Sender<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) -> MqttHandle {
    let mut options = MqttOptions::new("ezville-bridge", config.mqtt_server(), MQTT_PORT);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_credentials(config.mqtt_id(), config.mqtt_password());

    let (client, mut eventloop) = AsyncClient::new(options, 100);
    let handle = MqttHandle::new(client.clone(), config.mqtt_log());

    let mode = config.mode();
    let server = config.mqtt_server().to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_shutdown");
                        return;
                    }
                }
                result = eventloop.poll() => {
                    match result {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!(server = %server, "mqtt_connected");
                            subscribe(&client, mode).await;
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            route_publish(&publish.topic, &publish.payload, &inbound_tx);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "mqtt_error");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    });

    handle
}

async fn subscribe(client: &AsyncClient, mode: CommMode) {
    let command_filter = format!("{HA_PREFIX}/#");
    if let Err(e) = client.subscribe(&command_filter, QoS::AtMostOnce).await {
        error!(error = %e, "mqtt_subscribe_failed");
    }
    if matches!(mode, CommMode::Mqtt | CommMode::Mixed) {
        if let Err(e) = client.subscribe(EW11_RECV_TOPIC, QoS::AtMostOnce).await {
            error!(error = %e, "mqtt_subscribe_failed");
        }
    }
    info!(filter = %command_filter, "mqtt_subscribed");
}

fn route_publish(topic: &str, payload: &[u8], inbound_tx: &mpsc::Sender<Inbound>) {
    let msg = if topic == EW11_RECV_TOPIC {
        Inbound::Gateway(payload.to_vec())
    } else if topic.starts_with(HA_PREFIX) && topic.ends_with("/command") {
        match std::str::from_utf8(payload) {
            Ok(value) => Inbound::Command { topic: topic.to_string(), payload: value.to_string() },
            Err(e) => {
                warn!(topic = %topic, error = %e, "mqtt_payload_not_utf8");
                return;
            }
        }
    } else {
        // Our own state/discovery publishes echo back through the wildcard
        debug!(topic = %topic, "mqtt_message_ignored");
        return;
    };

    if inbound_tx.try_send(msg).is_err() {
        warn!(topic = %topic, "inbound_dropped: channel full");
    }
}
