//! Integration tests for configuration loading

use ezville_bridge::infra::{CommMode, Config};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_options(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_config_from_file() {
    let file = write_options(
        r#"{
            "mode": "mixed",
            "mqtt_server": "192.168.0.10",
            "mqtt_id": "homeassistant",
            "mqtt_password": "secret",
            "ew11_server": "192.168.0.20",
            "ew11_port": 8899,
            "ew11_id": "admin",
            "ew11_password": "admin",
            "ew11_buffer_size": 128,
            "ew11_timeout": 120,
            "command_send_count": 2,
            "command_interval": 0.5,
            "command_retry_count": 5,
            "random_backoff": true,
            "state_loop_delay": 0.02,
            "command_loop_delay": 0.05,
            "serial_recv_delay": 0.1,
            "DEBUG": true,
            "mqtt_log": false,
            "ew11_log": true
        }"#,
    );

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.mode(), CommMode::Mixed);
    assert_eq!(config.mqtt_server(), "192.168.0.10");
    assert_eq!(config.mqtt_id(), "homeassistant");
    assert_eq!(config.ew11_addr(), "192.168.0.20:8899");
    assert_eq!(config.ew11_buffer_size(), 128);
    assert_eq!(config.ew11_timeout(), Duration::from_secs(120));
    assert_eq!(config.command_send_count(), 2);
    assert_eq!(config.command_interval(), Duration::from_millis(500));
    assert_eq!(config.command_retry_count(), 5);
    assert!(config.random_backoff());
    assert!(config.debug());
    assert!(!config.mqtt_log());
    assert!(config.ew11_log());
}

#[test]
fn test_missing_required_key_is_an_error() {
    // No mqtt_server
    let file = write_options(
        r#"{
            "mode": "socket",
            "mqtt_id": "homeassistant",
            "mqtt_password": "secret"
        }"#,
    );

    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_unknown_mode_is_an_error() {
    let file = write_options(r#"{ "mode": "serial" }"#);
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    let err = Config::from_file("/nonexistent/options.json").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
