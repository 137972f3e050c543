//! Command encoding, the pending-ack table and the retry transmitter
//!
//! Commands arrive as broker topics, are encoded into checksummed RS-485
//! frames and queued on a channel. The transmitter sends each frame in a
//! short burst and waits for the wallpad's acknowledge; the decoder path
//! completes the matching pending-ack entry, which wakes the transmitter
//! immediately even mid-sleep. Entries without an acknowledge code (the
//! thermostat away command and the batch state override) are single-shot.

use crate::domain::device::{
    BatchBits, DeviceClass, DeviceKey, CMD_GASVALVE_POWER, CMD_LIGHT_POWER, CMD_PLUG_POWER,
    CMD_THERMOSTAT_AWAY, CMD_THERMOSTAT_TARGET,
};
use crate::domain::protocol::{seal, FRAME_START};
use crate::infra::config::Config;
use crate::io::Transport;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

/// Acks are matched on the first four frame bytes: start, device id,
/// group+room, ack code
pub const ACK_PREFIX_LEN: usize = 4;

/// Grace period before the first retry; the bus broadcasts state many times
/// a second, so an acknowledge normally lands well within this.
const FIRST_ACK_WAIT: Duration = Duration::from_millis(100);

/// An encoded command frame and the acknowledge that retires it
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEntry {
    pub frame: Vec<u8>,
    pub ack: Option<[u8; ACK_PREFIX_LEN]>,
}

fn ack_prefix(class: DeviceClass, room: u8) -> [u8; ACK_PREFIX_LEN] {
    [FRAME_START, class.device_id(), 0x10 | (room & 0x0F), class.ack_cmd()]
}

/// `F7 0E 1r 41 03 0s pp 00` + checksum
pub fn light_power(room: u8, sub: u8, on: bool) -> CommandEntry {
    let class = DeviceClass::Light;
    let frame = seal(vec![
        FRAME_START,
        class.device_id(),
        0x10 | (room & 0x0F),
        CMD_LIGHT_POWER,
        0x03,
        sub & 0x0F,
        on as u8,
        0x00,
    ]);
    CommandEntry { frame, ack: Some(ack_prefix(class, room)) }
}

/// `F7 50 1r 43 02 0s pp` + checksum
pub fn plug_power(room: u8, sub: u8, on: bool) -> CommandEntry {
    let class = DeviceClass::Plug;
    let frame = seal(vec![
        FRAME_START,
        class.device_id(),
        0x10 | (room & 0x0F),
        CMD_PLUG_POWER,
        0x02,
        sub & 0x0F,
        on as u8,
    ]);
    CommandEntry { frame, ack: Some(ack_prefix(class, room)) }
}

/// `F7 12 0r 41 01 00` + checksum. Closing is the only control the valve
/// accepts; there is no open frame.
pub fn gasvalve_close(room: u8) -> CommandEntry {
    let class = DeviceClass::GasValve;
    let frame = seal(vec![
        FRAME_START,
        class.device_id(),
        room & 0x0F,
        CMD_GASVALVE_POWER,
        0x01,
        0x00,
    ]);
    CommandEntry { frame, ack: Some(ack_prefix(class, room)) }
}

/// `F7 36 1r 44 01 TT` + checksum
pub fn thermostat_target(room: u8, temp: u8) -> CommandEntry {
    let class = DeviceClass::Thermostat;
    let frame = seal(vec![
        FRAME_START,
        class.device_id(),
        0x10 | (room & 0x0F),
        CMD_THERMOSTAT_TARGET,
        0x01,
        temp,
    ]);
    CommandEntry { frame, ack: Some(ack_prefix(class, room)) }
}

/// `F7 36 1r 45 01 xx` + checksum. The wallpad never acknowledges away
/// mode, so the entry is single-shot.
pub fn thermostat_away(room: u8, on: bool) -> CommandEntry {
    let frame = seal(vec![
        FRAME_START,
        DeviceClass::Thermostat.device_id(),
        0x10 | (room & 0x0F),
        CMD_THERMOSTAT_AWAY,
        0x01,
        on as u8,
    ]);
    CommandEntry { frame, ack: None }
}

/// `F7 33 0r 81 03 00 BB 00` + checksum. Batch buttons are requested by
/// feeding the wallpad a state frame with the latch bits set; it reacts by
/// changing its own broadcast state, so there is no acknowledge to wait for.
pub fn batch_state(room: u8, latches: BatchBits) -> CommandEntry {
    let class = DeviceClass::Batch;
    let frame = seal(vec![
        FRAME_START,
        class.device_id(),
        room & 0x0F,
        class.state_cmd(),
        0x03,
        0x00,
        latches.to_command_byte(),
        0x00,
    ]);
    CommandEntry { frame, ack: None }
}

/// Parsed `ezville/<class>_<rr>_<ss>/<attr>/command` topic
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTopic {
    pub key: DeviceKey,
    pub attr: String,
}

pub fn parse_command_topic(topic: &str) -> Option<CommandTopic> {
    let mut parts = topic.split('/');
    (parts.next()? == "ezville").then_some(())?;
    let slug = parts.next()?;
    let attr = parts.next()?;
    (parts.next()? == "command").then_some(())?;
    if parts.next().is_some() {
        return None;
    }

    let mut seg = slug.split('_');
    let class = DeviceClass::from_name(seg.next()?)?;
    let room: u8 = seg.next()?.parse().ok()?;
    let sub: u8 = seg.next()?.parse().ok()?;
    if seg.next().is_some() {
        return None;
    }

    Some(CommandTopic { key: DeviceKey::new(class, room, sub), attr: attr.to_string() })
}

/// Normalize a command payload: `heat` (climate mode) counts as ON,
/// everything else is matched case-insensitively.
pub fn normalize_value(value: &str) -> String {
    if value == "heat" {
        "ON".to_string()
    } else {
        value.to_uppercase()
    }
}

struct PendingAck {
    id: u64,
    prefix: [u8; ACK_PREFIX_LEN],
    notify: Arc<Notify>,
}

/// Ticket held by the transmitter while its command awaits an acknowledge
pub struct AckTicket {
    id: u64,
    pub notify: Arc<Notify>,
}

/// Pending-ack table shared between the transmitter and the decoder path.
///
/// The decoder completes the first entry whose prefix matches an incoming
/// ACK frame; completion wakes the waiting transmitter and removes the
/// entry, so one ACK retires at most one command.
pub struct AckRegistry {
    pending: Mutex<Vec<PendingAck>>,
    next_id: AtomicU64,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self { pending: Mutex::new(Vec::new()), next_id: AtomicU64::new(0) }
    }

    pub fn register(&self, prefix: [u8; ACK_PREFIX_LEN]) -> AckTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let notify = Arc::new(Notify::new());
        self.pending.lock().push(PendingAck { id, prefix, notify: notify.clone() });
        AckTicket { id, notify }
    }

    /// Complete the first pending entry matching the frame head
    pub fn complete(&self, frame: &[u8]) -> bool {
        if frame.len() < ACK_PREFIX_LEN {
            return false;
        }
        let mut pending = self.pending.lock();
        if let Some(pos) = pending.iter().position(|p| frame[..ACK_PREFIX_LEN] == p.prefix) {
            let entry = pending.remove(pos);
            // notify_one stores a permit, so an ACK arriving before the
            // transmitter reaches its wait still counts.
            entry.notify.notify_one();
            true
        } else {
            false
        }
    }

    /// Drop a ticket whose command exhausted its retries
    pub fn cancel(&self, ticket: &AckTicket) {
        self.pending.lock().retain(|p| p.id != ticket.id);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for AckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Pops command entries and drives the burst/retry/ack cycle
pub struct Transmitter {
    rx: mpsc::Receiver<CommandEntry>,
    transport: Transport,
    acks: Arc<AckRegistry>,
    discovery_done: watch::Receiver<bool>,
    send_count: u32,
    interval: Duration,
    retry_count: u32,
    random_backoff: bool,
    loop_delay: Duration,
    ew11_log: bool,
}

impl Transmitter {
    pub fn new(
        config: &Config,
        rx: mpsc::Receiver<CommandEntry>,
        transport: Transport,
        acks: Arc<AckRegistry>,
        discovery_done: watch::Receiver<bool>,
    ) -> Self {
        Self {
            rx,
            transport,
            acks,
            discovery_done,
            send_count: config.command_send_count(),
            interval: config.command_interval(),
            retry_count: config.command_retry_count(),
            random_backoff: config.random_backoff(),
            loop_delay: config.command_loop_delay(),
            ew11_log: config.ew11_log(),
        }
    }

    pub async fn run(mut self) {
        // Commands queued during the discovery window wait until it closes.
        while !*self.discovery_done.borrow() {
            if self.discovery_done.changed().await.is_err() {
                return;
            }
        }
        info!("command_loop_started");

        while let Some(entry) = self.rx.recv().await {
            self.dispatch(entry).await;
            tokio::time::sleep(self.loop_delay).await;
        }
    }

    async fn dispatch(&mut self, entry: CommandEntry) {
        let ticket = entry.ack.map(|prefix| self.acks.register(prefix));
        let mut acked = false;
        let mut attempt = 0u32;

        loop {
            for _ in 0..self.send_count {
                self.transport.send(&entry.frame).await;
            }
            if self.ew11_log {
                info!(
                    frame = %hex::encode_upper(&entry.frame),
                    attempt,
                    "bus_command_sent"
                );
            }

            let Some(ref ticket) = ticket else {
                // Single-shot command: pace the bus briefly, then move on
                tokio::time::sleep(FIRST_ACK_WAIT).await;
                break;
            };

            let wait = if attempt == 0 {
                FIRST_ACK_WAIT
            } else if self.random_backoff {
                let max_ms = self.interval.as_millis() as u64;
                Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
            } else {
                self.interval
            };

            if tokio::time::timeout(wait, ticket.notify.notified()).await.is_ok() {
                acked = true;
                debug!(frame = %hex::encode_upper(&entry.frame), "command_acknowledged");
                break;
            }

            if attempt >= self.retry_count {
                warn!(
                    frame = %hex::encode_upper(&entry.frame),
                    retries = self.retry_count,
                    "command_unacknowledged_dropped"
                );
                break;
            }
            attempt += 1;
        }

        if let Some(ticket) = ticket {
            if !acked {
                self.acks.cancel(&ticket);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::protocol::validate;

    #[test]
    fn test_light_power_frame() {
        let entry = light_power(1, 1, true);
        assert_eq!(entry.frame[..8], [0xF7, 0x0E, 0x11, 0x41, 0x03, 0x01, 0x01, 0x00]);
        assert_eq!(entry.frame.len(), 10);
        assert!(validate(&entry.frame));
        assert_eq!(entry.ack, Some([0xF7, 0x0E, 0x11, 0xC1]));
    }

    #[test]
    fn test_plug_power_frame() {
        let entry = plug_power(2, 1, false);
        assert_eq!(entry.frame[..7], [0xF7, 0x50, 0x12, 0x43, 0x02, 0x01, 0x00]);
        assert!(validate(&entry.frame));
        assert_eq!(entry.ack, Some([0xF7, 0x50, 0x12, 0xC3]));
    }

    #[test]
    fn test_gasvalve_close_frame() {
        let entry = gasvalve_close(1);
        assert_eq!(entry.frame[..6], [0xF7, 0x12, 0x01, 0x41, 0x01, 0x00]);
        assert!(validate(&entry.frame));
        // The valve sends its acknowledge from the command group
        assert_eq!(entry.ack, Some([0xF7, 0x12, 0x11, 0xC1]));
    }

    #[test]
    fn test_thermostat_target_frame() {
        let entry = thermostat_target(1, 25);
        assert_eq!(entry.frame[..6], [0xF7, 0x36, 0x11, 0x44, 0x01, 0x19]);
        assert!(validate(&entry.frame));
        assert_eq!(entry.ack, Some([0xF7, 0x36, 0x11, 0xC4]));
    }

    #[test]
    fn test_thermostat_away_has_no_ack() {
        let entry = thermostat_away(3, true);
        assert_eq!(entry.frame[..6], [0xF7, 0x36, 0x13, 0x45, 0x01, 0x01]);
        assert!(validate(&entry.frame));
        assert_eq!(entry.ack, None);
    }

    #[test]
    fn test_batch_state_frame() {
        let latches = BatchBits { elevator_up: true, ..Default::default() };
        let entry = batch_state(1, latches);
        assert_eq!(entry.frame[..8], [0xF7, 0x33, 0x01, 0x81, 0x03, 0x00, 0x10, 0x00]);
        assert!(validate(&entry.frame));
        assert_eq!(entry.ack, None);
    }

    #[test]
    fn test_parse_command_topic() {
        let cmd = parse_command_topic("ezville/light_01_02/power/command").unwrap();
        assert_eq!(cmd.key, DeviceKey::new(DeviceClass::Light, 1, 2));
        assert_eq!(cmd.attr, "power");

        assert!(parse_command_topic("ezville/light_01_02/power/state").is_none());
        assert!(parse_command_topic("ezville/fan_01_01/power/command").is_none());
        assert!(parse_command_topic("ezville/light_01/power/command").is_none());
        assert!(parse_command_topic("other/light_01_01/power/command").is_none());
    }

    #[test]
    fn test_normalize_value() {
        assert_eq!(normalize_value("heat"), "ON");
        assert_eq!(normalize_value("on"), "ON");
        assert_eq!(normalize_value("Off"), "OFF");
        assert_eq!(normalize_value("22.5"), "22.5");
    }

    #[test]
    fn test_ack_registry_completes_at_most_once() {
        let registry = AckRegistry::new();
        let first = registry.register([0xF7, 0x0E, 0x11, 0xC1]);
        let second = registry.register([0xF7, 0x0E, 0x11, 0xC1]);

        let ack_frame = [0xF7, 0x0E, 0x11, 0xC1, 0x03, 0x01, 0x01, 0x00, 0x00, 0x00];
        assert!(registry.complete(&ack_frame));
        assert_eq!(registry.pending_len(), 1);
        // A second identical ACK retires the second entry, not the first twice
        assert!(registry.complete(&ack_frame));
        assert_eq!(registry.pending_len(), 0);
        assert!(!registry.complete(&ack_frame));

        registry.cancel(&first);
        registry.cancel(&second);
    }

    #[test]
    fn test_ack_registry_ignores_other_prefixes() {
        let registry = AckRegistry::new();
        let ticket = registry.register([0xF7, 0x0E, 0x11, 0xC1]);
        assert!(!registry.complete(&[0xF7, 0x50, 0x11, 0xC3, 0x00, 0x00]));
        assert_eq!(registry.pending_len(), 1);
        registry.cancel(&ticket);
        assert_eq!(registry.pending_len(), 0);
    }

    fn test_config(send_count: u32, retry_count: u32) -> Config {
        Config::default()
            .with_command_timing(send_count, Duration::from_millis(20), retry_count)
            .with_command_loop_delay(Duration::from_millis(1))
    }

    fn started_watch() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(true)
    }

    #[tokio::test]
    async fn test_transmitter_retry_cap() {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (frame_tx, mut frame_rx) = mpsc::channel(64);
        let acks = Arc::new(AckRegistry::new());
        let (_discovery_tx, discovery_rx) = started_watch();

        let transmitter = Transmitter::new(
            &test_config(2, 2),
            cmd_rx,
            Transport::Socket(frame_tx),
            acks.clone(),
            discovery_rx,
        );
        tokio::spawn(transmitter.run());

        // Never acknowledged: expect (retry_count + 1) * send_count frames
        cmd_tx.send(light_power(1, 1, true)).await.unwrap();
        drop(cmd_tx);

        let mut sent = 0;
        while tokio::time::timeout(Duration::from_millis(500), frame_rx.recv())
            .await
            .ok()
            .flatten()
            .is_some()
        {
            sent += 1;
        }
        assert_eq!(sent, 6);
        assert_eq!(acks.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_transmitter_stops_on_ack() {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (frame_tx, mut frame_rx) = mpsc::channel(64);
        let acks = Arc::new(AckRegistry::new());
        let (_discovery_tx, discovery_rx) = started_watch();

        let transmitter = Transmitter::new(
            &test_config(1, 10),
            cmd_rx,
            Transport::Socket(frame_tx),
            acks.clone(),
            discovery_rx,
        );
        tokio::spawn(transmitter.run());

        let entry = light_power(1, 1, true);
        cmd_tx.send(entry.clone()).await.unwrap();

        // First transmission appears, then we acknowledge
        let first = tokio::time::timeout(Duration::from_millis(500), frame_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, entry.frame);
        let ack_frame = [0xF7, 0x0E, 0x11, 0xC1, 0x03, 0x01, 0x01, 0x00, 0x00, 0x00];
        assert!(acks.complete(&ack_frame));

        drop(cmd_tx);
        // No retries follow the acknowledge
        assert!(tokio::time::timeout(Duration::from_millis(200), frame_rx.recv())
            .await
            .ok()
            .flatten()
            .is_none());
    }

    #[tokio::test]
    async fn test_transmitter_single_shot_without_ack() {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (frame_tx, mut frame_rx) = mpsc::channel(64);
        let acks = Arc::new(AckRegistry::new());
        let (_discovery_tx, discovery_rx) = started_watch();

        let transmitter = Transmitter::new(
            &test_config(1, 10),
            cmd_rx,
            Transport::Socket(frame_tx),
            acks.clone(),
            discovery_rx,
        );
        tokio::spawn(transmitter.run());

        cmd_tx.send(thermostat_away(1, true)).await.unwrap();
        drop(cmd_tx);

        let mut sent = 0;
        while tokio::time::timeout(Duration::from_millis(400), frame_rx.recv())
            .await
            .ok()
            .flatten()
            .is_some()
        {
            sent += 1;
        }
        assert_eq!(sent, 1);
        assert_eq!(acks.pending_len(), 0);
    }
}
