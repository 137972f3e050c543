//! Device classes of the EzVille wallpad bus and their fixed packet codes
//!
//! Every class broadcasts STATE packets with command code 0x81. Control
//! commands and their acknowledge codes differ per class; the thermostat
//! away command and the batch state-override frame are never acknowledged.

use std::fmt;

/// Control command codes used by the encoder
pub const CMD_LIGHT_POWER: u8 = 0x41;
pub const CMD_PLUG_POWER: u8 = 0x43;
pub const CMD_GASVALVE_POWER: u8 = 0x41;
pub const CMD_THERMOSTAT_TARGET: u8 = 0x44;
pub const CMD_THERMOSTAT_AWAY: u8 = 0x45;

/// The five wallpad device classes the bridge decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Light,
    Thermostat,
    Plug,
    GasValve,
    Batch,
}

impl DeviceClass {
    pub const ALL: [DeviceClass; 5] = [
        DeviceClass::Light,
        DeviceClass::Thermostat,
        DeviceClass::Plug,
        DeviceClass::GasValve,
        DeviceClass::Batch,
    ];

    /// Name used in MQTT topic slugs
    pub fn name(self) -> &'static str {
        match self {
            DeviceClass::Light => "light",
            DeviceClass::Thermostat => "thermostat",
            DeviceClass::Plug => "plug",
            DeviceClass::GasValve => "gasvalve",
            DeviceClass::Batch => "batch",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Fixed bus device id (frame byte 1)
    pub fn device_id(self) -> u8 {
        match self {
            DeviceClass::Light => 0x0E,
            DeviceClass::Thermostat => 0x36,
            DeviceClass::Plug => 0x50,
            DeviceClass::GasValve => 0x12,
            DeviceClass::Batch => 0x33,
        }
    }

    pub fn from_device_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.device_id() == id)
    }

    /// STATE broadcast command code (frame byte 3)
    pub fn state_cmd(self) -> u8 {
        0x81
    }

    /// Acknowledge command code for this class's control commands
    pub fn ack_cmd(self) -> u8 {
        match self {
            DeviceClass::Light => 0xC1,
            DeviceClass::Thermostat => 0xC4,
            DeviceClass::Plug => 0xC3,
            DeviceClass::GasValve => 0xC1,
            DeviceClass::Batch => 0xC1,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of one device instance: class + room id + sub id.
///
/// Room ids come from the low nibble of frame byte 2; sub ids index
/// sub-devices inside a room (lights, plug outlets, thermostat zones).
/// The gas valve and batch switch are singletons with room=1, sub=1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub class: DeviceClass,
    pub room: u8,
    pub sub: u8,
}

impl DeviceKey {
    pub fn new(class: DeviceClass, room: u8, sub: u8) -> Self {
        Self { class, room, sub }
    }

    /// Topic slug, e.g. `light_01_02`
    pub fn slug(&self) -> String {
        format!("{}_{:02}_{:02}", self.class.name(), self.room, self.sub)
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:02}_{:02}", self.class.name(), self.room, self.sub)
    }
}

/// The four latched request bits of the batch breaker switch.
///
/// The wallpad reports and accepts these in different bit positions:
/// a STATE packet carries elevator-down in bit 2, elevator-up in bit 3,
/// group in bit 5 and outing in bit 6, while the state-override frame the
/// bridge sends back packs them as `0 0 ED EU 0 GROUP OUTING 0`.
/// Group polarity is inverted on the wire: a cleared group bit means
/// group control is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchBits {
    pub elevator_down: bool,
    pub elevator_up: bool,
    pub group: bool,
    pub outing: bool,
}

impl BatchBits {
    /// Latch bits from the state byte of a batch STATE packet
    pub fn from_state_byte(byte: u8) -> Self {
        Self {
            elevator_down: byte >> 2 & 1 == 1,
            elevator_up: byte >> 3 & 1 == 1,
            group: byte >> 5 & 1 == 1,
            outing: byte >> 6 & 1 == 1,
        }
    }

    /// Pack the latches into the state-override command byte
    pub fn to_command_byte(self) -> u8 {
        (self.elevator_down as u8) << 5
            | (self.elevator_up as u8) << 4
            | (self.group as u8) << 2
            | (self.outing as u8) << 1
    }

    pub fn group_on(self) -> bool {
        !self.group
    }

    pub fn outing_on(self) -> bool {
        self.outing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_round_trip() {
        for class in DeviceClass::ALL {
            assert_eq!(DeviceClass::from_device_id(class.device_id()), Some(class));
            assert_eq!(DeviceClass::from_name(class.name()), Some(class));
        }
        assert_eq!(DeviceClass::from_device_id(0x99), None);
        assert_eq!(DeviceClass::from_name("fan"), None);
    }

    #[test]
    fn test_device_key_slug() {
        let key = DeviceKey::new(DeviceClass::Light, 1, 2);
        assert_eq!(key.slug(), "light_01_02");
        assert_eq!(DeviceKey::new(DeviceClass::GasValve, 1, 1).slug(), "gasvalve_01_01");
    }

    #[test]
    fn test_batch_bits_state_byte() {
        // elevator-up request reported in bit 3
        let bits = BatchBits::from_state_byte(0b0000_1000);
        assert!(bits.elevator_up);
        assert!(!bits.elevator_down);
        // group bit cleared means group control on
        assert!(bits.group_on());
        assert!(!bits.outing_on());
    }

    #[test]
    fn test_batch_bits_command_byte() {
        // a lone elevator-up latch packs to 0x10
        let bits = BatchBits { elevator_up: true, ..Default::default() };
        assert_eq!(bits.to_command_byte(), 0x10);

        let bits = BatchBits { elevator_down: true, outing: true, ..Default::default() };
        assert_eq!(bits.to_command_byte(), 0b0010_0010);
    }
}
