//! Built-in product table
//!
//! Govee lights speak 20-byte frames on a vendor GATT service. Byte 0 is the
//! frame family (0x33 command, 0xaa keep-alive), byte 1 the command, and the
//! last byte an XOR checksum over the rest.

use uuid::Uuid;

use crate::profile::{
    BrightnessCommand, ColorCommand, ColorTemperatureCommand, CommandSet, DeviceProfile,
    KeepAliveCommand, PowerCommand,
};
use crate::template::{Placeholder, Slot, Template};

/// Govee control service: 00010203-0405-0607-0809-0a0b0c0d1910
pub const GOVEE_SERVICE_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1910);

/// Govee write characteristic: 00010203-0405-0607-0809-0a0b0c0d2b11
pub const GOVEE_WRITE_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d2b11);

/// Govee notify characteristic: 00010203-0405-0607-0809-0a0b0c0d2b10
pub const GOVEE_READ_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d2b10);

const FRAME_LEN: usize = 20;

const COMMAND: u8 = 0x33;
const KEEP_ALIVE: u8 = 0xaa;

const CMD_POWER: u8 = 0x01;
const CMD_BRIGHTNESS: u8 = 0x04;
const CMD_COLOR: u8 = 0x05;
const MODE_MANUAL: u8 = 0x02;

/// All products compiled into the bridge
pub fn builtin() -> Vec<DeviceProfile> {
    vec![govee_gu10()]
}

/// Govee GU10 spot bulb
pub fn govee_gu10() -> DeviceProfile {
    use Placeholder::*;
    use Slot::{Literal as L, Placeholder as P};

    DeviceProfile {
        id: "govee-gu10".to_string(),
        device_name: "H6008".to_string(),
        manufacturer: "Govee".to_string(),
        model: "GU10".to_string(),
        service_uuid: GOVEE_SERVICE_UUID,
        write_characteristic_uuid: GOVEE_WRITE_UUID,
        read_characteristic_uuid: GOVEE_READ_UUID,
        commands: CommandSet {
            power: Some(PowerCommand {
                data: frame(&[L(COMMAND), L(CMD_POWER), P(State)], P(Checksum)),
                on: 0x01,
                off: 0x00,
            }),
            brightness: Some(BrightnessCommand {
                data: frame(&[L(COMMAND), L(CMD_BRIGHTNESS), P(Brightness)], P(Checksum)),
                min: 0x01,
                max: 0xfe,
            }),
            color: Some(ColorCommand {
                data: frame(
                    &[L(COMMAND), L(CMD_COLOR), L(MODE_MANUAL), P(Red), P(Green), P(Blue)],
                    P(Checksum),
                ),
            }),
            // white mode: rgb all on, then the kelvin value; checksum in the last byte
            color_temperature: Some(ColorTemperatureCommand {
                data: frame(
                    &[
                        L(COMMAND),
                        L(CMD_COLOR),
                        L(MODE_MANUAL),
                        L(0xff),
                        L(0xff),
                        L(0xff),
                        L(0x01),
                        P(TempHighByte),
                        P(TempLowByte),
                    ],
                    L(0x00),
                ),
            }),
            keep_alive: Some(KeepAliveCommand {
                data: frame(&[L(KEEP_ALIVE), L(0x01)], L(KEEP_ALIVE ^ 0x01)),
            }),
        },
    }
}

/// Pad `head` with zeros up to a full frame ending in `tail`
fn frame(head: &[Slot], tail: Slot) -> Template {
    let mut slots = head.to_vec();
    slots.resize(FRAME_LEN - 1, Slot::Literal(0));
    slots.push(tail);
    Template(slots)
}
