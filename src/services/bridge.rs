//! Bridge coordinator - owns all mutable wallpad state
//!
//! A single task serializes every mutation: the home-state map, the
//! message cache, the discovery set, the batch latches and the framer
//! residue all live here. The MQTT client and the gateway link only
//! enqueue inbound messages; the transmitter only consumes encoded
//! command entries. Once a frame is dequeued its decode and publishes
//! run to completion before the next frame is touched.

use crate::domain::device::{BatchBits, DeviceKey};
use crate::domain::protocol::HEADER_LEN;
use crate::infra::config::Config;
use crate::io::{Inbound, MqttHandle};
use crate::services::command::{self, AckRegistry, CommandEntry, CommandTopic};
use crate::services::decoder::{self, Decoded, PacketKind};
use crate::services::discovery;
use crate::services::framer::Framer;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Startup window during which observed devices are registered instead of
/// published
const DISCOVERY_DURATION: Duration = Duration::from_secs(20);

/// Cadence and length of the periodic full-state refresh
const FORCE_PERIOD: Duration = Duration::from_secs(300);
const FORCE_DURATION: Duration = Duration::from_secs(3);

/// One device instance's attribute readings from a single frame
struct InstanceState {
    key: DeviceKey,
    attrs: Vec<(&'static str, String)>,
}

pub struct Bridge {
    config: Config,
    mqtt: MqttHandle,
    cmd_tx: mpsc::Sender<CommandEntry>,
    acks: Arc<AckRegistry>,
    discovery_done_tx: watch::Sender<bool>,
    last_received: Arc<Mutex<Option<Instant>>>,
    framer: Framer,
    home_state: FxHashMap<(DeviceKey, &'static str), String>,
    msg_cache: FxHashMap<[u8; HEADER_LEN], Vec<u8>>,
    discovered: FxHashSet<DeviceKey>,
    latches: BatchBits,
    discovery_open: bool,
    discovery_deadline: Instant,
    force_update: bool,
    force_start_at: Instant,
    force_end_at: Instant,
}

impl Bridge {
    pub fn new(
        config: Config,
        mqtt: MqttHandle,
        cmd_tx: mpsc::Sender<CommandEntry>,
        acks: Arc<AckRegistry>,
        discovery_done_tx: watch::Sender<bool>,
        last_received: Arc<Mutex<Option<Instant>>>,
    ) -> Self {
        let discovery_deadline = Instant::now() + DISCOVERY_DURATION;
        let force_start_at = discovery_deadline + FORCE_PERIOD;
        Self {
            config,
            mqtt,
            cmd_tx,
            acks,
            discovery_done_tx,
            last_received,
            framer: Framer::new(),
            home_state: FxHashMap::default(),
            msg_cache: FxHashMap::default(),
            discovered: FxHashSet::default(),
            latches: BatchBits::default(),
            discovery_open: true,
            discovery_deadline,
            force_update: false,
            force_start_at,
            force_end_at: force_start_at,
        }
    }

    /// Drain the inbound channel until it closes or shutdown is signalled
    pub async fn run(
        &mut self,
        mut inbound_rx: mpsc::Receiver<Inbound>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            duration_secs = DISCOVERY_DURATION.as_secs(),
            "discovery_started"
        );

        let tick_period = self.config.state_loop_delay().max(Duration::from_millis(10));
        let mut tick = tokio::time::interval(tick_period);

        loop {
            tokio::select! {
                msg = inbound_rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_inbound(msg).await,
                        None => break,
                    }
                }
                _ = tick.tick() => self.advance_windows(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("bridge_shutdown");
                        break;
                    }
                }
            }
        }
    }

    /// Advance the discovery and force-update windows
    fn advance_windows(&mut self) {
        let now = Instant::now();

        if self.discovery_open && now >= self.discovery_deadline {
            self.discovery_open = false;
            let _ = self.discovery_done_tx.send(true);
            info!("discovery_window_closed");
        }

        if !self.force_update && now >= self.force_start_at {
            self.force_update = true;
            self.force_end_at = now + FORCE_DURATION;
            debug!("force_update_opened");
        }

        if self.force_update && now >= self.force_end_at {
            self.force_update = false;
            self.force_start_at = now + FORCE_PERIOD;
            debug!("force_update_closed");
        }
    }

    pub async fn handle_inbound(&mut self, msg: Inbound) {
        match msg {
            Inbound::Command { topic, payload } => {
                self.handle_ha_command(&topic, &payload).await;
            }
            Inbound::Gateway(bytes) => {
                *self.last_received.lock() = Some(Instant::now());
                if self.config.ew11_log() {
                    info!(raw = %hex::encode_upper(&bytes), "bus_chunk_received");
                }
                let frames = self.framer.feed(&bytes);
                for frame in frames {
                    self.handle_frame(&frame).await;
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: &[u8]) {
        // Unknown device ids and command codes are dropped silently
        let Some((class, kind)) = decoder::classify(frame) else {
            return;
        };

        if self.discovery_open {
            if let Some(decoded) = decoder::decode(class, kind, frame) {
                self.latch_batch(&decoded);
                self.handle_discovery(&decoded).await;
            }
            return;
        }

        if kind == PacketKind::Ack && self.acks.complete(frame) {
            debug!(frame = %hex::encode_upper(frame), "command_ack_matched");
        }

        let Some(decoded) = decoder::decode(class, kind, frame) else {
            return;
        };
        self.latch_batch(&decoded);

        // Frames whose body matches the last one seen for this header are
        // skipped wholesale unless the force window is open
        let Ok(header) = <[u8; HEADER_LEN]>::try_from(&frame[..HEADER_LEN]) else {
            return;
        };
        let body = frame[HEADER_LEN..].to_vec();
        if !self.force_update && self.msg_cache.get(&header).is_some_and(|b| *b == body) {
            return;
        }
        self.msg_cache.insert(header, body);

        for instance in self.instance_states(&decoded) {
            for (attr, value) in instance.attrs {
                self.publish_state(instance.key, attr, &value).await;
            }
        }
    }

    /// Register unseen instances; instances already registered get their
    /// state published normally even while the window is open
    async fn handle_discovery(&mut self, decoded: &Decoded) {
        for instance in self.instance_states(decoded) {
            if self.discovered.insert(instance.key) {
                for (topic, payload) in discovery::registrations(instance.key) {
                    info!(topic = %topic, "device_registered");
                    self.mqtt.publish_discovery(&topic, &payload).await;
                }
            } else {
                for (attr, value) in instance.attrs {
                    self.publish_state(instance.key, attr, &value).await;
                }
            }
        }
    }

    fn latch_batch(&mut self, decoded: &Decoded) {
        if let Decoded::Batch { bits } = decoded {
            self.latches = *bits;
        }
    }

    /// Flatten a decoded frame into per-instance attribute lists, in the
    /// fixed publish order for each class
    fn instance_states(&self, decoded: &Decoded) -> Vec<InstanceState> {
        fn onoff(on: bool) -> String {
            if on { "ON".to_string() } else { "OFF".to_string() }
        }

        match decoded {
            Decoded::Light { room, lights } => lights
                .iter()
                .enumerate()
                .map(|(i, &on)| InstanceState {
                    key: DeviceKey::new(crate::domain::DeviceClass::Light, *room, i as u8 + 1),
                    attrs: vec![("power", onoff(on))],
                })
                .collect(),
            Decoded::Thermostat { zones } => zones
                .iter()
                .map(|zone| InstanceState {
                    key: DeviceKey::new(crate::domain::DeviceClass::Thermostat, zone.room, 1),
                    attrs: vec![
                        ("power", onoff(zone.power)),
                        ("away", onoff(zone.away)),
                        ("curTemp", zone.cur_temp.to_string()),
                        ("setTemp", zone.set_temp.to_string()),
                    ],
                })
                .collect(),
            Decoded::Plug { room, outlets } => outlets
                .iter()
                .enumerate()
                .map(|(i, outlet)| InstanceState {
                    key: DeviceKey::new(crate::domain::DeviceClass::Plug, *room, i as u8 + 1),
                    attrs: vec![
                        ("power", onoff(outlet.power)),
                        ("auto", onoff(outlet.auto)),
                        ("current", format!("{:.2}", outlet.centiwatts as f64 / 100.0)),
                    ],
                })
                .collect(),
            Decoded::GasValve { open } => vec![InstanceState {
                key: DeviceKey::new(crate::domain::DeviceClass::GasValve, 1, 1),
                attrs: vec![("power", onoff(*open))],
            }],
            Decoded::Batch { bits } => vec![InstanceState {
                key: DeviceKey::new(crate::domain::DeviceClass::Batch, 1, 1),
                attrs: vec![
                    ("group", onoff(bits.group_on())),
                    ("outing", onoff(bits.outing_on())),
                ],
            }],
        }
    }

    /// Equality gate: record the value and report whether it needs
    /// publishing (changed, or the force window is open)
    fn note_state(&mut self, key: DeviceKey, attr: &'static str, value: &str) -> bool {
        let slot = (key, attr);
        if !self.force_update && self.home_state.get(&slot).is_some_and(|v| v == value) {
            return false;
        }
        self.home_state.insert(slot, value.to_string());
        true
    }

    async fn publish_state(&mut self, key: DeviceKey, attr: &'static str, value: &str) {
        if self.note_state(key, attr, value) {
            self.mqtt.publish_state(&key.slug(), attr, value).await;
        } else if self.config.debug() {
            debug!(device = %key, attr, value, "state_unchanged");
        }
    }

    async fn handle_ha_command(&mut self, topic: &str, payload: &str) {
        if self.config.mqtt_log() {
            info!(topic = %topic, payload = %payload, "ha_command_received");
        }
        let Some(cmd) = command::parse_command_topic(topic) else {
            if self.config.debug() {
                debug!(topic = %topic, "command_topic_unrecognized");
            }
            return;
        };
        let value = command::normalize_value(payload);

        if let Some(entry) = self.build_command(&cmd, &value) {
            if self.config.debug() {
                debug!(
                    sendcmd = %hex::encode_upper(&entry.frame),
                    recvcmd = ?entry.ack.map(hex::encode_upper),
                    "command_queued"
                );
            }
            if self.cmd_tx.try_send(entry).is_err() {
                warn!(topic = %topic, "command_queue_full");
            }
        }
    }

    /// Translate a command topic and value into an encoded entry.
    ///
    /// Commands whose requested value matches the known home state are
    /// dropped with a log line instead of occupying the bus.
    fn build_command(&mut self, cmd: &CommandTopic, value: &str) -> Option<CommandEntry> {
        use crate::domain::DeviceClass;

        let key = cmd.key;
        match (key.class, cmd.attr.as_str()) {
            (DeviceClass::Light, "power") => {
                if self.already_set(key, "power", value) {
                    return None;
                }
                Some(command::light_power(key.room, key.sub, value == "ON"))
            }
            (DeviceClass::Plug, "power") => {
                if self.already_set(key, "power", value) {
                    return None;
                }
                Some(command::plug_power(key.room, key.sub, value == "ON"))
            }
            (DeviceClass::GasValve, "power") => {
                // Closing over the bus is safe; opening is never encoded
                if value != "OFF" {
                    info!(device = %key, value = %value, "gasvalve_open_rejected");
                    return None;
                }
                if self.already_set(key, "power", value) {
                    return None;
                }
                Some(command::gasvalve_close(key.room))
            }
            (DeviceClass::Thermostat, "away") => {
                if self.already_set(key, "away", value) {
                    return None;
                }
                Some(command::thermostat_away(key.room, value == "ON"))
            }
            (DeviceClass::Thermostat, "setTemp") => {
                let target = value.parse::<f64>().ok()? as u8;
                if let Some(current) = self.home_state.get(&(key, "setTemp")) {
                    if current.parse::<u8>() == Ok(target) {
                        info!(device = %key, target, "command_skipped_already_set");
                        return None;
                    }
                }
                Some(command::thermostat_target(key.room, target))
            }
            (DeviceClass::Batch, button) => {
                match button {
                    "elevator-up" => self.latches.elevator_up = true,
                    "elevator-down" => self.latches.elevator_down = true,
                    // Group-on is a cleared bit on the wire
                    "group" => self.latches.group = false,
                    "outing" => self.latches.outing = true,
                    _ => {
                        debug!(device = %key, attr = %button, "command_unsupported");
                        return None;
                    }
                }
                Some(command::batch_state(key.room, self.latches))
            }
            _ => {
                debug!(device = %key, attr = %cmd.attr, "command_unsupported");
                None
            }
        }
    }

    fn already_set(&self, key: DeviceKey, attr: &'static str, value: &str) -> bool {
        if self.home_state.get(&(key, attr)).is_some_and(|v| v == value) {
            info!(device = %key, attr, value, "command_skipped_already_set");
            true
        } else {
            false
        }
    }
}
