mod frame;
mod packets;

#[macro_use]
pub mod encoding;
pub mod types;

pub use encoding::{Encodable, EncodingError};
pub use frame::{
    raw_checksum, DataType, Frame, FrameError, FRAME_HEADER_LEN, FRAME_START, MAX_PACKET_LEN,
};
pub use packets::*;
