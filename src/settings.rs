//! Device state as the driver tracks it: configuration settings, runtime
//! status, timer programs, and the vendor function-code set.
//!
//! Decoding works on the payload of an info-response frame (`data[0]` is the
//! sub-code, field bytes sit at fixed offsets after it). Every lookup-backed
//! field decodes totally: unknown wire codes land on the table default.

use crate::protocol::types::{Fan, Mode, Power, TenthDegreesC, TimerMode, Vane, WideVane};

/// Minutes represented by one count in a timer duration byte.
pub const TIMER_INCREMENT_MINUTES: u16 = 10;

/// Slots in the vendor function-code set, split into two 15-byte halves.
pub const MAX_FUNCTION_CODES: usize = 30;

/// Desired or device-confirmed configuration.
///
/// A fresh value has every field unset; fields become `Some` when staged by
/// a setter or when a settings frame is decoded. Two values compare equal
/// only when all seven fields agree.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Settings {
    pub power: Option<Power>,
    pub mode: Option<Mode>,
    pub temperature: Option<TenthDegreesC>,
    pub fan: Option<Fan>,
    pub vane: Option<Vane>,
    pub wide_vane: Option<WideVane>,
    pub isee: Option<bool>,
}

/// A decoded settings frame plus the two line-state facts that ride along
/// with it: whether the device reported a fine-resolution temperature and
/// whether the wide-vane adjustment flag is set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecodedSettings {
    pub settings: Settings,
    pub fine_temp: bool,
    pub wide_vane_adj: bool,
}

impl Settings {
    pub fn is_empty(&self) -> bool {
        self.power.is_none()
            && self.mode.is_none()
            && self.temperature.is_none()
            && self.fan.is_none()
            && self.vane.is_none()
            && self.wide_vane.is_none()
            && self.isee.is_none()
    }

    /// Decode a settings info payload (sub-code 0x02). `data` must hold the
    /// full 16-byte payload.
    pub fn decode(data: &[u8]) -> DecodedSettings {
        let isee = data[4] > 0x08;
        let mode_byte = if isee { data[4] - 0x08 } else { data[4] };
        let fine_temp = data[11] != 0x00;
        let temperature = if fine_temp {
            TenthDegreesC::decode_half_degrees(data[11])
        } else {
            TenthDegreesC::decode_setpoint(data[5])
        };

        DecodedSettings {
            settings: Settings {
                power: Some(Power::from_wire(data[3])),
                mode: Some(Mode::from_wire(mode_byte)),
                temperature: Some(temperature),
                fan: Some(Fan::from_wire(data[6])),
                vane: Some(Vane::from_wire(data[7])),
                wide_vane: Some(WideVane::from_wire(data[10] & 0x0f)),
                isee: Some(isee),
            },
            fine_temp,
            wide_vane_adj: (data[10] & 0xf0) == 0x80,
        }
    }
}

/// Timer program reported by the device. Durations are minutes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timers {
    pub mode: TimerMode,
    pub on_minutes_set: u16,
    pub on_minutes_remaining: u16,
    pub off_minutes_set: u16,
    pub off_minutes_remaining: u16,
}

impl Default for Timers {
    fn default() -> Self {
        Timers {
            mode: TimerMode::None,
            on_minutes_set: 0,
            on_minutes_remaining: 0,
            off_minutes_set: 0,
            off_minutes_remaining: 0,
        }
    }
}

impl Timers {
    /// Decode a timer info payload (sub-code 0x05). The device reports
    /// counts of [`TIMER_INCREMENT_MINUTES`].
    pub fn decode(data: &[u8]) -> Timers {
        Timers {
            mode: TimerMode::from_wire(data[3]),
            on_minutes_set: data[4] as u16 * TIMER_INCREMENT_MINUTES,
            off_minutes_set: data[5] as u16 * TIMER_INCREMENT_MINUTES,
            on_minutes_remaining: data[6] as u16 * TIMER_INCREMENT_MINUTES,
            off_minutes_remaining: data[7] as u16 * TIMER_INCREMENT_MINUTES,
        }
    }
}

/// Compressor-side telemetry from a status frame (sub-code 0x06).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OperatingStatus {
    pub operating: bool,
    pub compressor_frequency: u8,
    pub power: u16,
}

impl OperatingStatus {
    pub fn decode(data: &[u8]) -> OperatingStatus {
        OperatingStatus {
            compressor_frequency: data[3],
            operating: data[4] != 0x00,
            power: u16::from_be_bytes([data[5], data[6]]),
        }
    }
}

/// Aggregate runtime telemetry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Status {
    pub room_temperature: TenthDegreesC,
    pub operating: bool,
    pub compressor_frequency: u8,
    pub power: u16,
    pub timers: Timers,
}

impl Status {
    /// Decode a room-temperature payload (sub-code 0x03): a high-resolution
    /// offset byte when present, the 32-entry table otherwise.
    pub fn decode_room_temperature(data: &[u8]) -> TenthDegreesC {
        if data[6] != 0x00 {
            TenthDegreesC::decode_half_degrees(data[6])
        } else {
            TenthDegreesC::decode_room_temp(data[3])
        }
    }
}

/// Which half of the function-code set a frame carries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FunctionsPart {
    One,
    Two,
}

/// Vendor-defined function codes (101..=128), each holding a value 1..=3.
///
/// The set is only trustworthy once both 15-byte halves have been received;
/// until then [`is_valid`](Self::is_valid) is false and the driver refuses
/// to transmit it.
#[derive(Clone, Copy, Debug)]
pub struct Functions {
    raw: [u8; MAX_FUNCTION_CODES],
    half1: bool,
    half2: bool,
}

impl Default for Functions {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Functions {
    fn eq(&self, other: &Self) -> bool {
        self.is_valid() == other.is_valid() && self.raw[..] == other.raw[..]
    }
}

impl Eq for Functions {}

impl Functions {
    pub const fn new() -> Self {
        Functions {
            raw: [0; MAX_FUNCTION_CODES],
            half1: false,
            half2: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.half1 && self.half2
    }

    pub fn clear(&mut self) {
        self.raw = [0; MAX_FUNCTION_CODES];
        self.half1 = false;
        self.half2 = false;
    }

    pub(crate) fn set_half(&mut self, part: FunctionsPart, data: &[u8; 15]) {
        match part {
            FunctionsPart::One => {
                self.raw[..15].copy_from_slice(data);
                self.half1 = true;
            }
            FunctionsPart::Two => {
                self.raw[15..].copy_from_slice(data);
                self.half2 = true;
            }
        }
    }

    pub fn half(&self, part: FunctionsPart) -> [u8; 15] {
        let mut out = [0u8; 15];
        match part {
            FunctionsPart::One => out.copy_from_slice(&self.raw[..15]),
            FunctionsPart::Two => out.copy_from_slice(&self.raw[15..]),
        }
        out
    }

    fn code_of(byte: u8) -> u8 {
        (byte >> 2) + 100
    }

    fn value_of(byte: u8) -> u8 {
        byte & 0x03
    }

    /// Value for `code`, or `None` if the set does not carry that code.
    pub fn value(&self, code: u8) -> Option<u8> {
        if !(101..=128).contains(&code) {
            return None;
        }
        self.raw
            .iter()
            .find(|&&b| Self::code_of(b) == code)
            .map(|&b| Self::value_of(b))
    }

    /// Stage `value` for `code`. Fails when the code is outside 101..=128,
    /// the value outside 1..=3, or the set does not carry the code.
    pub fn set_value(&mut self, code: u8, value: u8) -> bool {
        if !(101..=128).contains(&code) || !(1..=3).contains(&value) {
            return false;
        }
        for slot in self.raw.iter_mut() {
            if Self::code_of(*slot) == code {
                *slot = ((code - 100) << 2) | value;
                return true;
            }
        }
        false
    }

    /// All codes the set carries, in slot order.
    pub fn codes(&self) -> impl Iterator<Item = u8> + '_ {
        self.raw
            .iter()
            .map(|&b| Self::code_of(b))
            .filter(|code| (101..=128).contains(code))
    }
}
