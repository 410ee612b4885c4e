//! Device profiles and the high-level commands they can encode

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::template::{ChecksumRule, Placeholder, Template, encode};

/// Lowest color temperature the lights accept, in kelvin
pub const MIN_KELVIN: u16 = 2700;
/// Highest color temperature the lights accept, in kelvin
pub const MAX_KELVIN: u16 = 6500;

/// Capability descriptor for a product family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Short identifier, e.g. "govee-gu10"
    pub id: String,
    /// Substring of the advertised name that identifies this product
    pub device_name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    pub service_uuid: Uuid,
    pub write_characteristic_uuid: Uuid,
    pub read_characteristic_uuid: Uuid,
    pub commands: CommandSet,
}

/// One template per supported capability
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<BrightnessCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<ColorCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temperature: Option<ColorTemperatureCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<KeepAliveCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerCommand {
    pub data: Template,
    /// Value substituted for `state` when switching on
    pub on: u8,
    /// Value substituted for `state` when switching off
    pub off: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrightnessCommand {
    pub data: Template,
    /// Device value for 0%
    pub min: u8,
    /// Device value for 100%
    pub max: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorCommand {
    pub data: Template,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorTemperatureCommand {
    pub data: Template,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepAliveCommand {
    pub data: Template,
}

/// High-level command addressed to a light
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Power(bool),
    /// Brightness in percent, values above 100 are treated as 100
    Brightness(u8),
    Color { red: u8, green: u8, blue: u8 },
    /// Color temperature in mireds (reciprocal megakelvin)
    ColorTemperature { mireds: u32 },
    KeepAlive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Power,
    Brightness,
    Color,
    ColorTemperature,
    KeepAlive,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandKind::Power => "power",
            CommandKind::Brightness => "brightness",
            CommandKind::Color => "color",
            CommandKind::ColorTemperature => "color temperature",
            CommandKind::KeepAlive => "keep-alive",
        })
    }
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Power(_) => CommandKind::Power,
            Command::Brightness(_) => CommandKind::Brightness,
            Command::Color { .. } => CommandKind::Color,
            Command::ColorTemperature { .. } => CommandKind::ColorTemperature,
            Command::KeepAlive => CommandKind::KeepAlive,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("profile {profile} has no {kind} template")]
    Unsupported { profile: String, kind: CommandKind },
}

impl DeviceProfile {
    /// Does an advertised name belong to this product?
    pub fn matches(&self, advertised_name: &str) -> bool {
        !self.device_name.is_empty() && advertised_name.contains(&self.device_name)
    }

    pub fn supports(&self, kind: CommandKind) -> bool {
        let c = &self.commands;
        match kind {
            CommandKind::Power => c.power.is_some(),
            CommandKind::Brightness => c.brightness.is_some(),
            CommandKind::Color => c.color.is_some(),
            CommandKind::ColorTemperature => c.color_temperature.is_some(),
            CommandKind::KeepAlive => c.keep_alive.is_some(),
        }
    }

    /// Encode a command into the bytes written to the control endpoint
    pub fn frame(&self, command: &Command) -> Result<Vec<u8>, EncodeError> {
        let unsupported = || EncodeError::Unsupported {
            profile: self.id.clone(),
            kind: command.kind(),
        };
        let c = &self.commands;

        let frame = match *command {
            Command::Power(on) => {
                let power = c.power.as_ref().ok_or_else(unsupported)?;
                let state = if on { power.on } else { power.off };
                encode(&power.data, &[(Placeholder::State, state)], ChecksumRule::TaggedSlot)
            }
            Command::Brightness(percent) => {
                let b = c.brightness.as_ref().ok_or_else(unsupported)?;
                let value = scale_brightness(percent, b.min, b.max);
                encode(&b.data, &[(Placeholder::Brightness, value)], ChecksumRule::TaggedSlot)
            }
            Command::Color { red, green, blue } => {
                let color = c.color.as_ref().ok_or_else(unsupported)?;
                encode(
                    &color.data,
                    &[
                        (Placeholder::Red, red),
                        (Placeholder::Green, green),
                        (Placeholder::Blue, blue),
                    ],
                    ChecksumRule::TaggedSlot,
                )
            }
            Command::ColorTemperature { mireds } => {
                let ct = c.color_temperature.as_ref().ok_or_else(unsupported)?;
                let [high, low] = kelvin_from_mireds(mireds).to_be_bytes();
                encode(
                    &ct.data,
                    &[(Placeholder::TempHighByte, high), (Placeholder::TempLowByte, low)],
                    ChecksumRule::TrailingByte,
                )
            }
            Command::KeepAlive => {
                let keep_alive = c.keep_alive.as_ref().ok_or_else(unsupported)?;
                encode(&keep_alive.data, &[], ChecksumRule::TaggedSlot)
            }
        };

        Ok(frame)
    }
}

/// Rescale a percentage into a device range, rounding to the nearest integer.
pub fn scale_brightness(percent: u8, min: u8, max: u8) -> u8 {
    let percent = f64::from(percent.min(100));
    let (min, max) = (f64::from(min), f64::from(max));
    // always between min and max, so the cast cannot truncate
    ((max - min) * percent / 100.0 + min).round() as u8
}

/// Convert mireds to kelvin, clamped to what the lights accept.
/// Zero mireds is an infinitely cold white and maps to the upper bound.
pub fn kelvin_from_mireds(mireds: u32) -> u16 {
    if mireds == 0 {
        return MAX_KELVIN;
    }
    let kelvin = (1_000_000.0 / f64::from(mireds)).round();
    kelvin.clamp(f64::from(MIN_KELVIN), f64::from(MAX_KELVIN)) as u16
}
