//! IO modules - external system interfaces
//!
//! - `mqtt` - broker client: command/raw-stream subscriptions and publishing
//! - `ew11` - TCP link to the serial-to-IP gateway with reconnect
//! - `telnet` - gateway reboot over its telnet console

pub mod ew11;
pub mod mqtt;
pub mod telnet;

use tokio::sync::mpsc;
use tracing::warn;

// Re-export commonly used types
pub use ew11::Ew11Link;
pub use mqtt::MqttHandle;

/// Messages flowing into the bridge coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A Home Assistant command publish (`ezville/<device>/<attr>/command`)
    Command { topic: String, payload: String },
    /// Raw bytes from the RS-485 gateway, via TCP read or `ew11/recv`
    Gateway(Vec<u8>),
}

/// Outbound path for encoded RS-485 command frames
#[derive(Clone)]
pub enum Transport {
    /// Direct TCP write through the EW11 link actor
    Socket(mpsc::Sender<Vec<u8>>),
    /// Publish to `ew11/send` for gateways bridged over the broker
    Broker(MqttHandle),
}

impl Transport {
    pub async fn send(&self, frame: &[u8]) {
        match self {
            Transport::Socket(tx) => {
                if tx.send(frame.to_vec()).await.is_err() {
                    warn!("ew11_write_channel_closed");
                }
            }
            Transport::Broker(mqtt) => mqtt.publish_frame(frame).await,
        }
    }
}
