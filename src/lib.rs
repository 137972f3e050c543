//! EzVille wallpad RS-485 to MQTT bridge
//!
//! Parses the wallpad's RS-485 stream (exposed over TCP or MQTT by an EW11
//! serial-to-IP gateway) into per-device state topics, announces devices via
//! Home Assistant MQTT discovery, and translates command topics back into
//! checksummed bus frames with retry-until-acknowledged delivery.
//!
//! Module structure:
//! - `domain/` - Protocol vocabulary (device classes, frame layout, checksums)
//! - `io/` - External interfaces (MQTT client, EW11 TCP link, telnet console)
//! - `services/` - Protocol engine (framer, decoder, bridge, commands, watchdog)
//! - `infra/` - Infrastructure (configuration)

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
