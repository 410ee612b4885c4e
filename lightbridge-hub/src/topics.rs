//! Bus topic layout and parsing of inbound command messages
//!
//! Commands arrive on `<root>/<unique_id>/set` (power) and
//! `<root>/<unique_id>/<capability>/set` for everything else. Every command
//! topic has a matching `.../state` topic the payload is echoed to.

use std::fmt;

use lightbridge_proto::{Command, CommandKind, DeviceProfile};

pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";

/// A light capability addressable over the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Power,
    Brightness,
    Color,
    ColorTemp,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Power,
        Capability::Brightness,
        Capability::Color,
        Capability::ColorTemp,
    ];

    /// Topic segment between the unique id and `set`/`state`; power has none
    fn segment(self) -> Option<&'static str> {
        match self {
            Capability::Power => None,
            Capability::Brightness => Some("brightness"),
            Capability::Color => Some("color"),
            Capability::ColorTemp => Some("color_temp"),
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.segment() == Some(segment))
    }

    pub fn kind(self) -> CommandKind {
        match self {
            Capability::Power => CommandKind::Power,
            Capability::Brightness => CommandKind::Brightness,
            Capability::Color => CommandKind::Color,
            Capability::ColorTemp => CommandKind::ColorTemperature,
        }
    }

    /// Capabilities the profile has a template for, in [`Capability::ALL`] order
    pub fn supported_by(profile: &DeviceProfile) -> impl Iterator<Item = Capability> + '_ {
        Self::ALL
            .into_iter()
            .filter(|c| profile.supports(c.kind()))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment().unwrap_or("power"))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("not a command topic: {0}")]
    UnknownTopic(String),
    #[error("invalid {capability} payload {payload:?}")]
    InvalidPayload {
        capability: Capability,
        payload: String,
    },
}

/// A parsed command message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub unique_id: String,
    pub command: Command,
    /// Where the raw payload is echoed once the command was handled
    pub echo_topic: String,
}

#[derive(Debug, Clone)]
pub struct Topics {
    root: String,
    discovery_prefix: String,
}

impl Topics {
    pub fn new(root: impl Into<String>, discovery_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
            discovery_prefix: discovery_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    fn base(&self, unique_id: &str, capability: Capability) -> String {
        match capability.segment() {
            None => format!("{}/{unique_id}", self.root),
            Some(segment) => format!("{}/{unique_id}/{segment}", self.root),
        }
    }

    pub fn command(&self, unique_id: &str, capability: Capability) -> String {
        format!("{}/set", self.base(unique_id, capability))
    }

    pub fn state(&self, unique_id: &str, capability: Capability) -> String {
        format!("{}/state", self.base(unique_id, capability))
    }

    /// Retained device announcement, `<prefix>/light/<unique_id>/config`
    pub fn announcement(&self, unique_id: &str) -> String {
        format!("{}/light/{unique_id}/config", self.discovery_prefix)
    }

    pub fn parse(&self, topic: &str, payload: &[u8]) -> Result<InboundCommand, CommandError> {
        let unknown = || CommandError::UnknownTopic(topic.to_string());

        let rest = topic
            .strip_prefix(self.root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(unknown)?;

        let parts: Vec<&str> = rest.split('/').collect();
        let (unique_id, capability) = match parts.as_slice() {
            [id, "set"] => (*id, Capability::Power),
            [id, segment, "set"] => (*id, Capability::from_segment(segment).ok_or_else(unknown)?),
            _ => return Err(unknown()),
        };
        if unique_id.is_empty() {
            return Err(unknown());
        }

        let payload = std::str::from_utf8(payload).map_err(|_| CommandError::NotUtf8)?;
        let command = parse_payload(capability, payload.trim()).ok_or_else(|| {
            CommandError::InvalidPayload {
                capability,
                payload: payload.to_string(),
            }
        })?;

        Ok(InboundCommand {
            unique_id: unique_id.to_string(),
            command,
            echo_topic: self.state(unique_id, capability),
        })
    }
}

fn parse_payload(capability: Capability, payload: &str) -> Option<Command> {
    match capability {
        Capability::Power => match payload {
            PAYLOAD_ON => Some(Command::Power(true)),
            PAYLOAD_OFF => Some(Command::Power(false)),
            _ => None,
        },
        Capability::Brightness => {
            let percent: u32 = payload.parse().ok()?;
            Some(Command::Brightness(percent.min(100) as u8))
        }
        Capability::Color => {
            let (red, green, blue) = parse_rgb(payload)?;
            Some(Command::Color { red, green, blue })
        }
        Capability::ColorTemp => Some(Command::ColorTemperature {
            mireds: payload.parse().ok()?,
        }),
    }
}

/// `"r,g,b"` with each channel 0..=255
pub fn parse_rgb(s: &str) -> Option<(u8, u8, u8)> {
    let mut channels = s.split(',').map(|v| v.trim().parse::<u8>());
    match (
        channels.next(),
        channels.next(),
        channels.next(),
        channels.next(),
    ) {
        (Some(Ok(red)), Some(Ok(green)), Some(Ok(blue)), None) => Some((red, green, blue)),
        _ => None,
    }
}
