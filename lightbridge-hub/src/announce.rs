//! The retained device announcement published once a light is ready
//!
//! The payload follows the Home Assistant MQTT light discovery schema so the
//! hub picks the light up without manual configuration.

use serde::Serialize;

use lightbridge_proto::{DeviceConfig, DeviceProfile, MAX_MIREDS, MIN_MIREDS};

use crate::topics::{Capability, PAYLOAD_OFF, PAYLOAD_ON, Topics};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Announcement {
    /// Left empty, the hub would otherwise prefix entity names with the device name twice
    pub name: String,
    pub unique_id: String,
    pub command_topic: String,
    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness_command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness_state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rgb_command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rgb_state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp_command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp_state_topic: Option<String>,
    pub payload_on: &'static str,
    pub payload_off: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness_scale: Option<u8>,
    pub supported_color_modes: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_mireds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_mireds: Option<u32>,
    pub device: AnnouncedDevice,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnouncedDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl Announcement {
    pub fn new(config: &DeviceConfig, profile: &DeviceProfile, topics: &Topics) -> Self {
        let id = config.unique_id.as_str();
        let has = |c: Capability| Capability::supported_by(profile).any(|s| s == c);
        let command = |c: Capability| has(c).then(|| topics.command(id, c));
        let state = |c: Capability| has(c).then(|| topics.state(id, c));

        let color_temp = has(Capability::ColorTemp);

        Self {
            name: String::new(),
            unique_id: config.unique_id.clone(),
            command_topic: topics.command(id, Capability::Power),
            state_topic: topics.state(id, Capability::Power),
            brightness_command_topic: command(Capability::Brightness),
            brightness_state_topic: state(Capability::Brightness),
            rgb_command_topic: command(Capability::Color),
            rgb_state_topic: state(Capability::Color),
            color_temp_command_topic: command(Capability::ColorTemp),
            color_temp_state_topic: state(Capability::ColorTemp),
            payload_on: PAYLOAD_ON,
            payload_off: PAYLOAD_OFF,
            brightness_scale: has(Capability::Brightness).then_some(100),
            supported_color_modes: color_modes(profile),
            min_mireds: color_temp.then_some(MIN_MIREDS),
            max_mireds: color_temp.then_some(MAX_MIREDS),
            device: AnnouncedDevice {
                identifiers: vec![config.unique_id.clone()],
                name: config.name.clone(),
                manufacturer: profile.manufacturer.clone(),
                model: profile.model.clone(),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn color_modes(profile: &DeviceProfile) -> Vec<&'static str> {
    let mut modes = Vec::new();
    for capability in Capability::supported_by(profile) {
        match capability {
            Capability::Color => modes.push("rgb"),
            Capability::ColorTemp => modes.push("color_temp"),
            _ => {}
        }
    }
    if modes.is_empty() {
        if profile.commands.brightness.is_some() {
            modes.push("brightness");
        } else {
            modes.push("onoff");
        }
    }
    modes
}
