//! Frame layer: the five-byte header, payload, and trailing checksum that
//! wrap every CN105 message in either direction.

use super::encoding::EncodingError;
use nom::number::streaming::be_u8;

pub const FRAME_START: u8 = 0xfc;
const FRAME_B3: u8 = 0x01;
const FRAME_B4: u8 = 0x30;

/// Header bytes preceding the payload.
pub const FRAME_HEADER_LEN: usize = 5;

/// Longest frame the protocol uses: header, 16-byte payload, checksum.
pub const MAX_PACKET_LEN: usize = 22;

/// Packet category carried in the second header byte.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum DataType {
    SetRequest = 0x41,
    InfoRequest = 0x42,
    ConnectRequest = 0x5a,

    UpdateAck = 0x61,
    InfoResponse = 0x62,
    ConnectAck = 0x7a,

    Unknown = 0xff,
}

impl DataType {
    pub fn repr(self) -> u8 {
        self as u8
    }
}

impl From<u8> for DataType {
    fn from(byte: u8) -> Self {
        match byte {
            0x41 => DataType::SetRequest,
            0x42 => DataType::InfoRequest,
            0x5a => DataType::ConnectRequest,

            0x61 => DataType::UpdateAck,
            0x62 => DataType::InfoResponse,
            0x7a => DataType::ConnectAck,

            _ => DataType::Unknown,
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum FrameError {
    /// Header or structure did not match the protocol's fixed prefix.
    Malformed,
    /// More bytes are needed before the frame can be judged.
    Incomplete(Option<usize>),
    /// Structure was sound but the trailing checksum byte disagreed.
    ChecksumMismatch { received: u8, calculated: u8 },
}

/// One parsed or to-be-encoded frame. Borrows its payload.
#[derive(Debug, Eq, PartialEq)]
pub struct Frame<'a> {
    pub data_type: DataType,
    pub data: &'a [u8],
    checksum: u8,
}

impl<'a> Frame<'a> {
    pub fn new(data_type: DataType, data: &'a [u8]) -> Self {
        Frame {
            data_type,
            data,
            checksum: Self::checksum(data_type, data),
        }
    }

    /// `(0xfc - sum(header + payload)) & 0xff`.
    pub fn checksum(data_type: DataType, data: &[u8]) -> u8 {
        let mut sum = FRAME_START
            .wrapping_add(data_type.repr())
            .wrapping_add(FRAME_B3)
            .wrapping_add(FRAME_B4)
            .wrapping_add(data.len() as u8);
        for b in data {
            sum = sum.wrapping_add(*b);
        }
        0xfcu8.wrapping_sub(sum)
    }

    /// Parse one frame off the front of `input`.
    ///
    /// Streaming: a prefix of a valid frame yields [`FrameError::Incomplete`]
    /// so a byte-at-a-time reader can keep feeding the buffer, while the
    /// first byte that cannot extend a valid frame yields
    /// [`FrameError::Malformed`] immediately.
    pub fn parse(input: &'a [u8]) -> Result<(Self, &'a [u8]), FrameError> {
        let result: nom::IResult<&'a [u8], Frame<'a>> = do_parse!(
            input,
            tag!(&[FRAME_START]) >>
            data_type: map!(be_u8, DataType::from) >>
            tag!(&[FRAME_B3, FRAME_B4]) >>
            data_len: map!(be_u8, |b| b as usize) >>
            data: take!(data_len) >>
            checksum: be_u8 >>
            (Frame { data_type, data, checksum })
        );

        match result {
            Ok((remaining, frame)) => {
                let calculated = Self::checksum(frame.data_type, frame.data);
                if calculated == frame.checksum {
                    Ok((frame, remaining))
                } else {
                    Err(FrameError::ChecksumMismatch {
                        received: frame.checksum,
                        calculated,
                    })
                }
            }

            Err(nom::Err::Incomplete(needed)) => match needed {
                nom::Needed::Size(size) => Err(FrameError::Incomplete(Some(size))),
                nom::Needed::Unknown => Err(FrameError::Incomplete(None)),
            },

            Err(_) => Err(FrameError::Malformed),
        }
    }

    /// Encode header, payload and checksum into `into`, returning the
    /// number of bytes written.
    pub fn encode(&self, into: &mut [u8]) -> Result<usize, EncodingError> {
        let total = FRAME_HEADER_LEN + self.data.len() + 1;
        if into.len() < total {
            return Err(EncodingError);
        }
        into[0] = FRAME_START;
        into[1] = self.data_type.repr();
        into[2] = FRAME_B3;
        into[3] = FRAME_B4;
        into[4] = self.data.len() as u8;
        into[FRAME_HEADER_LEN..FRAME_HEADER_LEN + self.data.len()].copy_from_slice(self.data);
        into[total - 1] = Self::checksum(self.data_type, self.data);
        Ok(total)
    }
}

/// Checksum over an arbitrary byte run, for callers assembling raw packets
/// outside the typed builders.
pub fn raw_checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0xfcu8.wrapping_sub(sum)
}
