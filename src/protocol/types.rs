//! Wire-level domain values.
//!
//! Each enum doubles as one of the protocol's lookup tables: the
//! discriminant is the wire byte, the variant name is the textual
//! enumerant (parseable case-insensitively). Decoding is total -- a byte
//! the table does not contain maps to the table's first entry.

use super::encoding::*;
use enum_repr::EnumRepr;
use strum::{Display, EnumString};

#[EnumRepr(type = "u8")]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Power {
    Off = 0x00,
    On = 0x01,
}

impl Power {
    pub fn from_wire(byte: u8) -> Self {
        Self::from_repr(byte).unwrap_or(Power::Off)
    }
}

impl OneByteEncodable for Power {
    fn encoded_as_byte(&self) -> u8 {
        self.repr()
    }
}

one_byte_encodable_enum!(Power, Mode, Fan, Vane, WideVane);

#[EnumRepr(type = "u8")]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Mode {
    Heat = 0x01,
    Dry = 0x02,
    Cool = 0x03,
    Fan = 0x07,
    Auto = 0x08,
}

impl Mode {
    pub fn from_wire(byte: u8) -> Self {
        Self::from_repr(byte).unwrap_or(Mode::Heat)
    }
}

impl OneByteEncodable for Mode {
    fn encoded_as_byte(&self) -> u8 {
        self.repr()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
#[repr(u8)]
pub enum Fan {
    Auto = 0x00,
    Quiet = 0x01,
    #[strum(serialize = "F1", serialize = "1")]
    F1 = 0x02,
    #[strum(serialize = "F2", serialize = "2")]
    F2 = 0x03,
    #[strum(serialize = "F3", serialize = "3")]
    F3 = 0x05,
    #[strum(serialize = "F4", serialize = "4")]
    F4 = 0x06,
}

impl Fan {
    pub fn repr(self) -> u8 {
        self as u8
    }

    pub fn from_wire(byte: u8) -> Self {
        match byte {
            0x01 => Fan::Quiet,
            0x02 => Fan::F1,
            0x03 => Fan::F2,
            0x05 => Fan::F3,
            0x06 => Fan::F4,
            _ => Fan::Auto,
        }
    }
}

impl OneByteEncodable for Fan {
    fn encoded_as_byte(&self) -> u8 {
        self.repr()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
#[repr(u8)]
pub enum Vane {
    Auto = 0x00,
    #[strum(serialize = "V1", serialize = "1")]
    V1 = 0x01,
    #[strum(serialize = "V2", serialize = "2")]
    V2 = 0x02,
    #[strum(serialize = "V3", serialize = "3")]
    V3 = 0x03,
    #[strum(serialize = "V4", serialize = "4")]
    V4 = 0x04,
    #[strum(serialize = "V5", serialize = "5")]
    V5 = 0x05,
    Swing = 0x07,
}

impl Vane {
    pub fn repr(self) -> u8 {
        self as u8
    }

    pub fn from_wire(byte: u8) -> Self {
        match byte {
            0x01 => Vane::V1,
            0x02 => Vane::V2,
            0x03 => Vane::V3,
            0x04 => Vane::V4,
            0x05 => Vane::V5,
            0x07 => Vane::Swing,
            _ => Vane::Auto,
        }
    }
}

impl OneByteEncodable for Vane {
    fn encoded_as_byte(&self) -> u8 {
        self.repr()
    }
}

/// Horizontal vane. Decoded from the low nibble of its settings byte; the
/// high nibble carries the adjustment flag and is handled by the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
#[repr(u8)]
pub enum WideVane {
    #[strum(serialize = "LL", serialize = "<<")]
    LL = 0x01,
    #[strum(serialize = "L", serialize = "<")]
    L = 0x02,
    #[strum(serialize = "Center", serialize = "|")]
    Center = 0x03,
    #[strum(serialize = "R", serialize = ">")]
    R = 0x04,
    #[strum(serialize = "RR", serialize = ">>")]
    RR = 0x05,
    #[strum(serialize = "LR", serialize = "<>")]
    LR = 0x08,
    Swing = 0x0c,
}

impl WideVane {
    pub fn repr(self) -> u8 {
        self as u8
    }

    pub fn from_wire(byte: u8) -> Self {
        match byte {
            0x02 => WideVane::L,
            0x03 => WideVane::Center,
            0x04 => WideVane::R,
            0x05 => WideVane::RR,
            0x08 => WideVane::LR,
            0x0c => WideVane::Swing,
            _ => WideVane::LL,
        }
    }
}

impl OneByteEncodable for WideVane {
    fn encoded_as_byte(&self) -> u8 {
        self.repr()
    }
}

#[EnumRepr(type = "u8")]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum TimerMode {
    None = 0x00,
    Off = 0x01,
    On = 0x02,
    Both = 0x03,
}

impl TimerMode {
    pub fn from_wire(byte: u8) -> Self {
        Self::from_repr(byte).unwrap_or(TimerMode::None)
    }
}

/// Set-point lookup table: whole degrees 31 down to 16, wire bytes
/// 0x00..=0x0f, in tenths of a degree.
const SETPOINT_MAP: [i16; 16] = [
    310, 300, 290, 280, 270, 260, 250, 240, 230, 220, 210, 200, 190, 180, 170, 160,
];

/// Room-temperature lookup table: whole degrees 10 through 41, wire bytes
/// 0x00..=0x1f, in tenths of a degree.
const ROOM_TEMP_MAP: [i16; 32] = [
    100, 110, 120, 130, 140, 150, 160, 170, 180, 190, 200, 210, 220, 230, 240, 250, 260, 270, 280,
    290, 300, 310, 320, 330, 340, 350, 360, 370, 380, 390, 400, 410,
];

const HALF_DEGREE_OFFSET: i16 = 128;

/// A temperature in tenths of a degree Celsius.
///
/// The protocol never carries finer than half-degree resolution, but tenths
/// keep every wire encoding exactly representable without floating point.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
pub struct TenthDegreesC(pub i16);

impl TenthDegreesC {
    pub const fn new(tenths: i16) -> Self {
        TenthDegreesC(tenths)
    }

    /// Nearest representable (half-degree) temperature to `deg` °C.
    pub fn from_celsius(deg: f32) -> Self {
        let halves = if deg >= 0.0 {
            (deg * 2.0 + 0.5) as i16
        } else {
            (deg * 2.0 - 0.5) as i16
        };
        TenthDegreesC(halves * 5)
    }

    pub fn celsius(self) -> f32 {
        self.0 as f32 / 10.0
    }

    /// Nearest half degree to `deg` °F.
    pub fn from_fahrenheit(deg: f32) -> Self {
        Self::from_celsius((deg - 32.0) / 1.8)
    }

    /// Whole degrees Fahrenheit, rounded.
    pub fn fahrenheit(self) -> i16 {
        let deg = self.celsius() * 1.8 + 32.0;
        if deg >= 0.0 {
            (deg + 0.5) as i16
        } else {
            (deg - 0.5) as i16
        }
    }

    pub fn round_to_half(self) -> Self {
        let halves = if self.0 >= 0 {
            (self.0 * 2 + 5) / 10
        } else {
            (self.0 * 2 - 5) / 10
        };
        TenthDegreesC(halves * 5)
    }

    /// Nearest set-point table entry, defaulting to the table head when the
    /// rounded degree falls outside the table.
    pub fn snap_to_setpoint(self) -> Self {
        let tenths = ((self.0 + 5) / 10) * 10;
        match SETPOINT_MAP.iter().position(|&t| t == tenths) {
            Some(_) => TenthDegreesC(tenths),
            None => TenthDegreesC(SETPOINT_MAP[0]),
        }
    }

    /// Round to a half degree and clamp into the continuous set-point range.
    pub fn clamp_fine(self) -> Self {
        let rounded = self.round_to_half().0;
        TenthDegreesC(rounded.max(ROOM_TEMP_MAP[0]).min(SETPOINT_MAP[0]))
    }

    /// Set-point table byte. Only meaningful for values staged through
    /// [`snap_to_setpoint`](Self::snap_to_setpoint); anything else encodes
    /// as the table head.
    pub fn encode_setpoint(self) -> u8 {
        SETPOINT_MAP.iter().position(|&t| t == self.0).unwrap_or(0) as u8
    }

    pub fn decode_setpoint(byte: u8) -> Self {
        TenthDegreesC(
            SETPOINT_MAP
                .get(byte as usize)
                .copied()
                .unwrap_or(SETPOINT_MAP[0]),
        )
    }

    pub fn decode_room_temp(byte: u8) -> Self {
        TenthDegreesC(
            ROOM_TEMP_MAP
                .get(byte as usize)
                .copied()
                .unwrap_or(ROOM_TEMP_MAP[0]),
        )
    }

    /// Half-degrees-plus-offset byte used by fine temperature mode.
    pub fn encode_half_degrees(self) -> u8 {
        (self.0 / 5 + HALF_DEGREE_OFFSET) as u8
    }

    pub fn decode_half_degrees(byte: u8) -> Self {
        TenthDegreesC((byte as i16 - HALF_DEGREE_OFFSET) * 5)
    }
}
