//! Configuration loading from the add-on options JSON file
//!
//! The bridge runs as a Home Assistant add-on and reads its options once at
//! startup from `/data/options.json` (overridable with `--config`). A missing
//! or malformed required key is fatal; everything after startup is expected
//! to run with a fixed configuration.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Transport selection for the EW11 gateway link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommMode {
    /// Receive and transmit over a direct TCP connection
    Socket,
    /// Both directions bridged over the broker (`ew11/recv` / `ew11/send`)
    Mqtt,
    /// Receive via the broker, transmit over TCP
    Mixed,
}

/// Raw shape of the options file
#[derive(Debug, Deserialize)]
struct RawConfig {
    mode: CommMode,
    mqtt_server: String,
    mqtt_id: String,
    mqtt_password: String,
    ew11_server: String,
    ew11_port: u16,
    ew11_id: String,
    ew11_password: String,
    ew11_buffer_size: usize,
    ew11_timeout: u64,
    command_send_count: u32,
    command_interval: f64,
    command_retry_count: u32,
    random_backoff: bool,
    state_loop_delay: f64,
    command_loop_delay: f64,
    serial_recv_delay: f64,
    #[serde(rename = "DEBUG")]
    debug: bool,
    mqtt_log: bool,
    ew11_log: bool,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    mode: CommMode,
    mqtt_server: String,
    mqtt_id: String,
    mqtt_password: String,
    ew11_server: String,
    ew11_port: u16,
    ew11_id: String,
    ew11_password: String,
    ew11_buffer_size: usize,
    ew11_timeout_secs: u64,
    command_send_count: u32,
    command_interval_secs: f64,
    command_retry_count: u32,
    random_backoff: bool,
    state_loop_delay_secs: f64,
    command_loop_delay_secs: f64,
    serial_recv_delay_secs: f64,
    debug: bool,
    mqtt_log: bool,
    ew11_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: CommMode::Socket,
            mqtt_server: "localhost".to_string(),
            mqtt_id: "ezville".to_string(),
            mqtt_password: String::new(),
            ew11_server: "192.168.0.2".to_string(),
            ew11_port: 8899,
            ew11_id: "admin".to_string(),
            ew11_password: "admin".to_string(),
            ew11_buffer_size: 64,
            ew11_timeout_secs: 300,
            command_send_count: 1,
            command_interval_secs: 0.3,
            command_retry_count: 10,
            random_backoff: false,
            state_loop_delay_secs: 0.02,
            command_loop_delay_secs: 0.05,
            serial_recv_delay_secs: 0.1,
            debug: false,
            mqtt_log: false,
            ew11_log: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON options file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let raw: RawConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            mode: raw.mode,
            mqtt_server: raw.mqtt_server,
            mqtt_id: raw.mqtt_id,
            mqtt_password: raw.mqtt_password,
            ew11_server: raw.ew11_server,
            ew11_port: raw.ew11_port,
            ew11_id: raw.ew11_id,
            ew11_password: raw.ew11_password,
            ew11_buffer_size: raw.ew11_buffer_size,
            ew11_timeout_secs: raw.ew11_timeout,
            command_send_count: raw.command_send_count,
            command_interval_secs: raw.command_interval,
            command_retry_count: raw.command_retry_count,
            random_backoff: raw.random_backoff,
            state_loop_delay_secs: raw.state_loop_delay,
            command_loop_delay_secs: raw.command_loop_delay,
            serial_recv_delay_secs: raw.serial_recv_delay,
            debug: raw.debug,
            mqtt_log: raw.mqtt_log,
            ew11_log: raw.ew11_log,
        })
    }

    pub fn mode(&self) -> CommMode {
        self.mode
    }

    pub fn mqtt_server(&self) -> &str {
        &self.mqtt_server
    }

    pub fn mqtt_id(&self) -> &str {
        &self.mqtt_id
    }

    pub fn mqtt_password(&self) -> &str {
        &self.mqtt_password
    }

    pub fn ew11_server(&self) -> &str {
        &self.ew11_server
    }

    pub fn ew11_port(&self) -> u16 {
        self.ew11_port
    }

    /// `host:port` address of the gateway data channel
    pub fn ew11_addr(&self) -> String {
        format!("{}:{}", self.ew11_server, self.ew11_port)
    }

    pub fn ew11_id(&self) -> &str {
        &self.ew11_id
    }

    pub fn ew11_password(&self) -> &str {
        &self.ew11_password
    }

    pub fn ew11_buffer_size(&self) -> usize {
        self.ew11_buffer_size
    }

    /// Staleness threshold and wake period of the gateway watchdog
    pub fn ew11_timeout(&self) -> Duration {
        Duration::from_secs(self.ew11_timeout_secs)
    }

    /// Back-to-back transmissions per command attempt
    pub fn command_send_count(&self) -> u32 {
        self.command_send_count
    }

    /// Ack wait between retry attempts
    pub fn command_interval(&self) -> Duration {
        Duration::from_secs_f64(self.command_interval_secs)
    }

    pub fn command_retry_count(&self) -> u32 {
        self.command_retry_count
    }

    pub fn random_backoff(&self) -> bool {
        self.random_backoff
    }

    pub fn state_loop_delay(&self) -> Duration {
        Duration::from_secs_f64(self.state_loop_delay_secs)
    }

    pub fn command_loop_delay(&self) -> Duration {
        Duration::from_secs_f64(self.command_loop_delay_secs)
    }

    pub fn serial_recv_delay(&self) -> Duration {
        Duration::from_secs_f64(self.serial_recv_delay_secs)
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn mqtt_log(&self) -> bool {
        self.mqtt_log
    }

    pub fn ew11_log(&self) -> bool {
        self.ew11_log
    }

    /// Builder method for tests to set the retry parameters
    #[cfg(test)]
    pub fn with_command_timing(
        mut self,
        send_count: u32,
        interval: Duration,
        retry_count: u32,
    ) -> Self {
        self.command_send_count = send_count;
        self.command_interval_secs = interval.as_secs_f64();
        self.command_retry_count = retry_count;
        self
    }

    /// Builder method for tests to set the command loop delay
    #[cfg(test)]
    pub fn with_command_loop_delay(mut self, delay: Duration) -> Self {
        self.command_loop_delay_secs = delay.as_secs_f64();
        self
    }
}
