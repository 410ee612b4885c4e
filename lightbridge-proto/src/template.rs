//! Command templates and the frame encoder
//!
//! A template is an ordered list of slots. Each slot is either a literal byte
//! or a named placeholder that gets resolved when the frame is built. In JSON
//! a template is written as a mixed array, e.g. `[51, 1, "state", 0, "checksum"]`.

use serde::{Deserialize, Serialize};

/// Named slot in a command template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placeholder {
    State,
    Brightness,
    Red,
    Green,
    Blue,
    TempHighByte,
    TempLowByte,
    Checksum,
}

/// One position of a command template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Slot {
    Literal(u8),
    Placeholder(Placeholder),
}

/// Ordered slot sequence for one command kind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(pub Vec<Slot>);

impl Template {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Index of the first slot tagged `checksum`
    pub fn checksum_index(&self) -> Option<usize> {
        self.0
            .iter()
            .position(|slot| *slot == Slot::Placeholder(Placeholder::Checksum))
    }
}

impl From<Vec<Slot>> for Template {
    fn from(slots: Vec<Slot>) -> Self {
        Self(slots)
    }
}

/// Where the checksum of a frame goes. The two frame families of the
/// supported lights disagree on this, so the rule is chosen per command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumRule {
    /// XOR of every byte (checksum slot counted as zero), written into the
    /// slot tagged `checksum`. Frames without such a slot are left as is.
    TaggedSlot,
    /// XOR of every byte except the last, always written into the last byte.
    TrailingByte,
}

/// Build a frame from a template and the values for its placeholders.
///
/// Placeholders without a value (including `checksum` before it is computed)
/// encode as zero.
pub fn encode(template: &Template, values: &[(Placeholder, u8)], rule: ChecksumRule) -> Vec<u8> {
    let mut frame: Vec<u8> = template
        .0
        .iter()
        .map(|slot| match *slot {
            Slot::Literal(byte) => byte,
            Slot::Placeholder(Placeholder::Checksum) => 0,
            Slot::Placeholder(name) => lookup(values, name).unwrap_or(0),
        })
        .collect();

    match rule {
        ChecksumRule::TaggedSlot => {
            let checksum = xor(&frame);
            if let Some(index) = template.checksum_index() {
                frame[index] = checksum;
            }
        }
        ChecksumRule::TrailingByte => {
            if let Some((last, head)) = frame.split_last_mut() {
                *last = xor(head);
            }
        }
    }

    frame
}

/// XOR of all bytes
pub fn xor(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, byte| acc ^ byte)
}

fn lookup(values: &[(Placeholder, u8)], name: Placeholder) -> Option<u8> {
    values.iter().find(|(p, _)| *p == name).map(|(_, v)| *v)
}
