//! Domain models - the EzVille RS-485 protocol vocabulary
//!
//! This module contains the canonical protocol types used throughout the bridge:
//! - `DeviceClass` - the five decoded wallpad device classes and their bus codes
//! - `DeviceKey` - (class, room, sub) identity of a single device instance
//! - `BatchBits` - the latched request bits of the batch breaker switch
//! - `protocol` - frame layout, checksum and seal/validate helpers

pub mod device;
pub mod protocol;

// Re-export commonly used types
pub use device::{BatchBits, DeviceClass, DeviceKey};
