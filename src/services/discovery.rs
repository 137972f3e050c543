//! Home Assistant MQTT discovery payloads
//!
//! Each device instance observed on the bus during the discovery window is
//! announced with one template per integration it maps to. The payloads use
//! the abbreviated discovery keys (`stat_t`, `cmd_t`, `~`, ...) and share a
//! common `device` block so Home Assistant groups everything under one
//! wallpad device.

use crate::domain::device::{DeviceClass, DeviceKey};
use serde_json::{json, Value};

const DISCOVERY_PREFIX: &str = "homeassistant";
const NODE_ID: &str = "ezville_wallpad";

fn device_block() -> Value {
    json!({
        "ids": ["ezville_wallpad"],
        "name": "ezville_wallpad",
        "mf": "EzVille",
        "mdl": "EzVille Wallpad",
        "sw": "ezville-bridge",
    })
}

fn config_topic(integration: &str, name: &str) -> String {
    format!("{DISCOVERY_PREFIX}/{integration}/{NODE_ID}/{name}/config")
}

/// Build the registration (topic, payload) pairs for one device instance
pub fn registrations(key: DeviceKey) -> Vec<(String, Value)> {
    let base = format!("ezville/{}", key.slug());
    let device = device_block();
    let (room, sub) = (key.room, key.sub);

    match key.class {
        DeviceClass::Light => {
            let name = format!("ezville_light_{room:02}_{sub:02}");
            vec![(
                config_topic("light", &name),
                json!({
                    "~": base,
                    "name": name.clone(),
                    "opt": true,
                    "stat_t": "~/power/state",
                    "cmd_t": "~/power/command",
                    "device": device,
                    "uniq_id": name,
                }),
            )]
        }
        DeviceClass::Thermostat => {
            let name = format!("ezville_thermostat_{room:02}_{sub:02}");
            vec![(
                config_topic("climate", &name),
                json!({
                    "~": base,
                    "name": name.clone(),
                    "mode_stat_t": "~/power/state",
                    "temp_stat_t": "~/setTemp/state",
                    "temp_cmd_t": "~/setTemp/command",
                    "curr_temp_t": "~/curTemp/state",
                    "away_mode_stat_t": "~/away/state",
                    "away_mode_cmd_t": "~/away/command",
                    "modes": ["off", "heat"],
                    "min_temp": "5",
                    "max_temp": 40,
                    "device": device,
                    "uniq_id": name,
                }),
            )]
        }
        DeviceClass::Plug => {
            let name = format!("ezville_plug_{room:02}_{sub:02}");
            let auto_name = format!("ezville_plug-automode_{room:02}_{sub:02}");
            let meter_name = format!("ezville_plug_{room:02}_{sub:02}_powermeter");
            vec![
                (
                    config_topic("switch", &name),
                    json!({
                        "~": base.clone(),
                        "name": name.clone(),
                        "stat_t": "~/power/state",
                        "cmd_t": "~/power/command",
                        "icon": "mdi:leaf",
                        "device": device.clone(),
                        "uniq_id": name,
                    }),
                ),
                (
                    config_topic("binary_sensor", &auto_name),
                    json!({
                        "~": base.clone(),
                        "name": auto_name.clone(),
                        "stat_t": "~/auto/state",
                        "icon": "mdi:leaf",
                        "device": device.clone(),
                        "uniq_id": auto_name,
                    }),
                ),
                (
                    config_topic("sensor", &meter_name),
                    json!({
                        "~": base,
                        "name": meter_name.clone(),
                        "stat_t": "~/current/state",
                        "unit_of_meas": "W",
                        "device": device,
                        "uniq_id": meter_name,
                    }),
                ),
            ]
        }
        DeviceClass::GasValve => {
            let name = format!("ezville_gasvalve_{room:02}_{sub:02}");
            vec![(
                config_topic("switch", &name),
                json!({
                    "~": base,
                    "name": name.clone(),
                    "stat_t": "~/power/state",
                    "cmd_t": "~/power/command",
                    "icon": "mdi:valve",
                    "device": device,
                    "uniq_id": name,
                }),
            )]
        }
        DeviceClass::Batch => {
            let up_name = format!("ezville_batch-elevator-up_{room:02}_{sub:02}");
            let down_name = format!("ezville_batch-elevator-down_{room:02}_{sub:02}");
            let group_name = format!("ezville_batch-groupcontrol_{room:02}_{sub:02}");
            let outing_name = format!("ezville_batch-outing_{room:02}_{sub:02}");
            vec![
                (
                    config_topic("button", &up_name),
                    json!({
                        "~": base.clone(),
                        "name": up_name.clone(),
                        "cmd_t": "~/elevator-up/command",
                        "icon": "mdi:elevator-up",
                        "device": device.clone(),
                        "uniq_id": up_name,
                    }),
                ),
                (
                    config_topic("button", &down_name),
                    json!({
                        "~": base.clone(),
                        "name": down_name.clone(),
                        "cmd_t": "~/elevator-down/command",
                        "icon": "mdi:elevator-down",
                        "device": device.clone(),
                        "uniq_id": down_name,
                    }),
                ),
                (
                    config_topic("binary_sensor", &group_name),
                    json!({
                        "~": base.clone(),
                        "name": group_name.clone(),
                        "stat_t": "~/group/state",
                        "icon": "mdi:lightbulb-group",
                        "device": device.clone(),
                        "uniq_id": group_name,
                    }),
                ),
                (
                    config_topic("binary_sensor", &outing_name),
                    json!({
                        "~": base,
                        "name": outing_name.clone(),
                        "stat_t": "~/outing/state",
                        "icon": "mdi:home-circle",
                        "device": device,
                        "uniq_id": outing_name,
                    }),
                ),
            ]
        }
    }
}
