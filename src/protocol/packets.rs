//! Typed packet payloads: builders for every outbound frame and the
//! dispatch of inbound frames into a closed result enum.

use super::encoding::{Encodable, EncodingError, OneByteEncodable};
use super::frame::{DataType, Frame};
use super::types::{Fan, Mode, Power, TenthDegreesC, Vane, WideVane};
use crate::settings::{DecodedSettings, FunctionsPart, OperatingStatus, Settings, Status, Timers};

/// Every CN105 payload is padded to this length.
pub const PAYLOAD_LEN: usize = 16;

/// The fixed connect handshake frame, sent verbatim.
pub const CONNECT_PACKET: [u8; 8] = [0xfc, 0x5a, 0x01, 0x30, 0x02, 0xca, 0x01, 0xa8];

// First payload byte of a set-request, selecting what the packet writes.
const SET_SETTINGS: u8 = 0x01;
const SET_REMOTE_TEMP: u8 = 0x07;
const SET_FUNCTIONS_PART1: u8 = 0x1f;
const SET_FUNCTIONS_PART2: u8 = 0x21;

// Info-response sub-codes (first payload byte).
const INFO_SETTINGS: u8 = 0x02;
const INFO_ROOM_TEMP: u8 = 0x03;
const INFO_TIMERS: u8 = 0x05;
const INFO_STATUS: u8 = 0x06;
const INFO_FUNCTIONS_PART1: u8 = 0x20;
const INFO_FUNCTIONS_PART2: u8 = 0x22;

/// Telemetry category an info-request asks for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum InfoType {
    Settings = 0x02,
    RoomTemp = 0x03,
    Timers = 0x05,
    Status = 0x06,
    FunctionsPart1 = 0x20,
    FunctionsPart2 = 0x22,
}

impl InfoType {
    pub fn repr(self) -> u8 {
        self as u8
    }
}

/// Which wire encoding a staged temperature uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Setpoint {
    /// 16-entry coarse table byte.
    Mapped(TenthDegreesC),
    /// Continuous half-degrees-plus-offset byte (fine temperature mode).
    HalfDegrees(TenthDegreesC),
}

/// Payload of a settings-update frame.
///
/// Fields are present only where the staged settings differ from the
/// confirmed ones; each present field contributes its wire byte at a fixed
/// offset plus a bit in one of the two control-flag bytes. The device
/// applies flagged fields and ignores the rest.
///
/// Layout (16 bytes):
///
/// ```text
///  0   1   2   3   4   5   6   7   8 .. 12  13  14  15
/// 01  F0  F1  PW  MO  TM  FA  VA   zeroes   WV  T2  00
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SetRequestData {
    pub power: Option<Power>,
    pub mode: Option<Mode>,
    pub temp: Option<Setpoint>,
    pub fan: Option<Fan>,
    pub vane: Option<Vane>,
    pub wide_vane: Option<WideVane>,
    pub wide_vane_adj: bool,
}

impl SetRequestData {
    /// Field-wise difference `wanted - current`. `fine_temp` selects the
    /// temperature encoding; `wide_vane_adj` is echoed back to the device
    /// alongside any wide-vane change.
    pub fn diff(
        wanted: &Settings,
        current: &Settings,
        fine_temp: bool,
        wide_vane_adj: bool,
    ) -> Self {
        fn changed<T: Copy + PartialEq>(wanted: Option<T>, current: Option<T>) -> Option<T> {
            match wanted {
                Some(value) if wanted != current => Some(value),
                _ => None,
            }
        }

        SetRequestData {
            power: changed(wanted.power, current.power),
            mode: changed(wanted.mode, current.mode),
            temp: changed(wanted.temperature, current.temperature).map(|t| {
                if fine_temp {
                    Setpoint::HalfDegrees(t)
                } else {
                    Setpoint::Mapped(t)
                }
            }),
            fan: changed(wanted.fan, current.fan),
            vane: changed(wanted.vane, current.vane),
            wide_vane: changed(wanted.wide_vane, current.wide_vane),
            wide_vane_adj,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_none()
            && self.mode.is_none()
            && self.temp.is_none()
            && self.fan.is_none()
            && self.vane.is_none()
            && self.wide_vane.is_none()
    }

    // The two control-flag groups are distinct on the wire: the first five
    // fields share one byte, wide-vane sits alone in the second.
    fn flags(&self) -> (u8, u8) {
        let mut group1 = 0x00u8;
        if self.power.is_some() {
            group1 |= 0x01;
        }
        if self.mode.is_some() {
            group1 |= 0x02;
        }
        if self.temp.is_some() {
            group1 |= 0x04;
        }
        if self.fan.is_some() {
            group1 |= 0x08;
        }
        if self.vane.is_some() {
            group1 |= 0x10;
        }
        let mut group2 = 0x00u8;
        if self.wide_vane.is_some() {
            group2 |= 0x01;
        }
        (group1, group2)
    }
}

impl Encodable for SetRequestData {
    fn encode(&self, into: &mut [u8]) -> Result<(), EncodingError> {
        if into.len() != PAYLOAD_LEN {
            return Err(EncodingError);
        }
        for b in into.iter_mut() {
            *b = 0x00;
        }
        into[0] = SET_SETTINGS;
        let (group1, group2) = self.flags();
        into[1] = group1;
        into[2] = group2;
        self.power.encode(&mut into[3..4])?;
        self.mode.encode(&mut into[4..5])?;
        if let Some(Setpoint::Mapped(t)) = self.temp {
            into[5] = t.encode_setpoint();
        }
        self.fan.encode(&mut into[6..7])?;
        self.vane.encode(&mut into[7..8])?;
        if let Some(wv) = self.wide_vane {
            into[13] = wv.encoded_as_byte() | if self.wide_vane_adj { 0x80 } else { 0x00 };
        }
        if let Some(Setpoint::HalfDegrees(t)) = self.temp {
            into[14] = t.encode_half_degrees();
        }
        Ok(())
    }
}

/// Payload of an info-request frame: the sub-command then zero padding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InfoRequestData(pub InfoType);

impl Encodable for InfoRequestData {
    fn encode(&self, into: &mut [u8]) -> Result<(), EncodingError> {
        if into.len() != PAYLOAD_LEN {
            return Err(EncodingError);
        }
        into[0] = self.0.repr();
        for b in into[1..].iter_mut() {
            *b = 0x00;
        }
        Ok(())
    }
}

/// Payload feeding an external room-temperature reading to the unit.
/// `None` hands control back to the internal sensor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RemoteTempData(pub Option<TenthDegreesC>);

impl Encodable for RemoteTempData {
    fn encode(&self, into: &mut [u8]) -> Result<(), EncodingError> {
        if into.len() != PAYLOAD_LEN {
            return Err(EncodingError);
        }
        for b in into.iter_mut() {
            *b = 0x00;
        }
        into[0] = SET_REMOTE_TEMP;
        match self.0 {
            Some(temp) => {
                let temp = temp.round_to_half();
                into[1] = 0x01;
                into[2] = (3 + (temp.0 - 100) / 5) as u8;
                into[3] = temp.encode_half_degrees();
            }
            None => {
                into[1] = 0x00;
                // the official controller sends 0x80 here even though the
                // control byte already disables the override
                into[3] = 0x80;
            }
        }
        Ok(())
    }
}

/// Payload writing one half of the function-code set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SetFunctionsData {
    pub part: FunctionsPart,
    pub data: [u8; 15],
}

impl Encodable for SetFunctionsData {
    fn encode(&self, into: &mut [u8]) -> Result<(), EncodingError> {
        if into.len() != PAYLOAD_LEN {
            return Err(EncodingError);
        }
        into[0] = match self.part {
            FunctionsPart::One => SET_FUNCTIONS_PART1,
            FunctionsPart::Two => SET_FUNCTIONS_PART2,
        };
        into[1..].copy_from_slice(&self.data);
        Ok(())
    }
}

/// Decoded contents of an info-response frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InfoData {
    Settings(DecodedSettings),
    RoomTemperature(TenthDegreesC),
    Timers(Timers),
    Status(OperatingStatus),
    Functions { part: FunctionsPart, data: [u8; 15] },
    /// Sub-codes the protocol sends but nobody has decoded (0x04, 0x09, ...).
    /// Deliberately not an error.
    Unrecognized(u8),
}

impl InfoData {
    fn parse(data: &[u8]) -> InfoData {
        if data.len() < PAYLOAD_LEN {
            return InfoData::Unrecognized(data.first().copied().unwrap_or(0x00));
        }
        match data[0] {
            INFO_SETTINGS => InfoData::Settings(Settings::decode(data)),
            INFO_ROOM_TEMP => InfoData::RoomTemperature(Status::decode_room_temperature(data)),
            INFO_TIMERS => InfoData::Timers(Timers::decode(data)),
            INFO_STATUS => InfoData::Status(OperatingStatus::decode(data)),
            INFO_FUNCTIONS_PART1 | INFO_FUNCTIONS_PART2 => {
                let mut bytes = [0u8; 15];
                bytes.copy_from_slice(&data[1..16]);
                InfoData::Functions {
                    part: if data[0] == INFO_FUNCTIONS_PART1 {
                        FunctionsPart::One
                    } else {
                        FunctionsPart::Two
                    },
                    data: bytes,
                }
            }
            code => InfoData::Unrecognized(code),
        }
    }
}

/// Every frame the device sends, as one closed union.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketData {
    /// The previously sent settings update was applied.
    UpdateAck,
    /// Connect handshake acknowledged.
    ConnectAck,
    Info(InfoData),
    /// Checksum-valid frame with a category this driver does not speak.
    Unknown,
}

impl PacketData {
    pub fn parse(frame: &Frame) -> PacketData {
        match frame.data_type {
            DataType::UpdateAck => PacketData::UpdateAck,
            DataType::ConnectAck => PacketData::ConnectAck,
            DataType::InfoResponse => PacketData::Info(InfoData::parse(frame.data)),
            _ => PacketData::Unknown,
        }
    }
}
