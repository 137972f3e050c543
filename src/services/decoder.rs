//! Packet classification and per-class state decoding
//!
//! Classification uses the fixed device-id / command-code tables: a frame is
//! a STATE packet when byte 1 is a known device id and byte 3 carries that
//! class's state code, an ACK packet when byte 3 carries the ack code, and
//! discarded otherwise. Decoding turns a validated frame into the typed
//! per-instance readings the bridge publishes.
//!
//! Only the gas valve reports usable state in its ACK packets; every other
//! class is decoded from STATE broadcasts alone.

use crate::domain::device::{BatchBits, DeviceClass};
use crate::domain::protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    State,
    Ack,
}

/// Classify a validated frame by device id and command code
pub fn classify(frame: &[u8]) -> Option<(DeviceClass, PacketKind)> {
    if frame.len() < protocol::HEADER_LEN {
        return None;
    }
    let class = DeviceClass::from_device_id(frame[1])?;
    if frame[3] == class.state_cmd() {
        Some((class, PacketKind::State))
    } else if frame[3] == class.ack_cmd() {
        Some((class, PacketKind::Ack))
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatZone {
    pub room: u8,
    pub power: bool,
    pub away: bool,
    pub set_temp: u8,
    pub cur_temp: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlugOutlet {
    pub power: bool,
    pub auto: bool,
    /// Measured draw in hundredths of a watt
    pub centiwatts: u16,
}

/// Typed readings of one decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Per-light power, index 0 is sub-id 1
    Light { room: u8, lights: Vec<bool> },
    Thermostat { zones: Vec<ThermostatZone> },
    Plug { room: u8, outlets: Vec<PlugOutlet> },
    GasValve { open: bool },
    Batch { bits: BatchBits },
}

/// Decode the state carried by a classified frame.
///
/// Returns `None` for packets that carry no decodable state (most ACKs) or
/// whose payload is too short for the counts they claim.
pub fn decode(class: DeviceClass, kind: PacketKind, frame: &[u8]) -> Option<Decoded> {
    match (class, kind) {
        (DeviceClass::Light, PacketKind::State) => decode_light(frame),
        (DeviceClass::Thermostat, PacketKind::State) => decode_thermostat(frame),
        (DeviceClass::Plug, PacketKind::State) => decode_plug(frame),
        (DeviceClass::GasValve, _) => decode_gasvalve(frame),
        (DeviceClass::Batch, PacketKind::State) => decode_batch(frame),
        _ => None,
    }
}

fn decode_light(frame: &[u8]) -> Option<Decoded> {
    let room = protocol::room_id(frame);
    // The length byte is the light count plus one
    let count = protocol::data_length(frame) as usize;
    let mut lights = Vec::with_capacity(count.saturating_sub(1));
    for id in 1..count {
        lights.push(*frame.get(5 + id)? > 0);
    }
    Some(Decoded::Light { room, lights })
}

fn decode_thermostat(frame: &[u8]) -> Option<Decoded> {
    let data_length = protocol::data_length(frame) as usize;
    if data_length < 5 {
        return None;
    }
    let rooms = (data_length - 5) / 2;
    let power_bitmap = *frame.get(6)?;
    let away_bitmap = *frame.get(7)?;

    let mut zones = Vec::with_capacity(rooms);
    for rid in 1..=rooms {
        let set_temp = *frame.get(8 + 2 * rid)?;
        let cur_temp = *frame.get(9 + 2 * rid)?;
        let shift = rooms - rid;
        zones.push(ThermostatZone {
            room: rid as u8,
            power: (power_bitmap & 0x1F) >> shift & 1 == 1,
            away: (away_bitmap & 0x1F) >> shift & 1 == 1,
            set_temp,
            cur_temp,
        });
    }
    Some(Decoded::Thermostat { zones })
}

fn decode_plug(frame: &[u8]) -> Option<Decoded> {
    let room = protocol::room_id(frame);
    let count = *frame.get(5)? as usize;

    let mut outlets = Vec::with_capacity(count);
    for id in 1..=count {
        let flags = *frame.get(3 + 3 * id)?;
        let centiwatts =
            u16::from_be_bytes([*frame.get(4 + 3 * id)?, *frame.get(5 + 3 * id)?]);
        outlets.push(PlugOutlet {
            auto: flags >> 4 > 0,
            power: flags & 0x0F > 0,
            centiwatts,
        });
    }
    Some(Decoded::Plug { room, outlets })
}

fn decode_gasvalve(frame: &[u8]) -> Option<Decoded> {
    Some(Decoded::GasValve { open: *frame.get(6)? == 0x01 })
}

fn decode_batch(frame: &[u8]) -> Option<Decoded> {
    Some(Decoded::Batch { bits: BatchBits::from_state_byte(*frame.get(6)?) })
}
