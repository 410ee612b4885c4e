//! Lightbridge protocol - device profiles and command frame encoding
//!
//! Everything in this crate is pure: it turns a high-level [`Command`] and a
//! [`DeviceProfile`] into the bytes a light expects on its control endpoint,
//! and resolves advertisements against the known products and devices.

pub mod products;
mod profile;
mod registry;
mod template;

pub use profile::{
    BrightnessCommand, ColorCommand, ColorTemperatureCommand, Command, CommandKind, CommandSet,
    DeviceProfile, EncodeError, KeepAliveCommand, MAX_KELVIN, MIN_KELVIN, PowerCommand,
    kelvin_from_mireds, scale_brightness,
};
pub use registry::{DeviceConfig, Registry};
pub use template::{ChecksumRule, Placeholder, Slot, Template, encode, xor};

/// Mired range announced to the bus, the reciprocal of [`MAX_KELVIN`]..[`MIN_KELVIN`]
pub const MIN_MIREDS: u32 = 153;
pub const MAX_MIREDS: u32 = 370;
