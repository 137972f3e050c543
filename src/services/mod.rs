//! Services - the protocol engine
//!
//! - `framer` - splits the raw gateway byte stream into validated frames
//! - `decoder` - packet classification and per-class state decoding
//! - `discovery` - Home Assistant discovery registration payloads
//! - `bridge` - the coordinator owning all mutable wallpad state
//! - `command` - command encoding, pending acks and the retry transmitter
//! - `watchdog` - gateway staleness detection and telnet reboot

pub mod bridge;
pub mod command;
pub mod decoder;
pub mod discovery;
pub mod framer;
pub mod watchdog;

// Re-export commonly used types
pub use bridge::Bridge;
pub use command::{AckRegistry, CommandEntry, Transmitter};
pub use framer::Framer;
pub use watchdog::Watchdog;
