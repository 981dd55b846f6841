#![no_std]

//! cn105
//!
//! Driver for the reverse-engineered serial protocol spoken by Mitsubishi
//! heat pumps (aka air conditioners) on their CN105 connector.
//!
//! The crate has two layers:
//!
//! * [`protocol`] -- the packet codec: framing, checksum, and the typed
//!   payload builders/parsers, usable on their own.
//! * [`driver`] -- a [`HeatPump`] state machine that owns one serial
//!   channel, keeps the confirmed and staged settings reconciled, paces its
//!   sends the way the hardware requires, and polls telemetry round-robin.
//!
//! There is no code to actually talk to a serial device here. The CN105
//! link runs at 2400 baud, 8 bits per byte, even parity, 1 stop bit (2400
//! 8E1, with some units answering at 9600). You bring the port and a
//! millisecond clock by implementing the two small traits in
//! [`interface`].
//!
//! ## Driving a unit
//!
//! ```no_run
//! # use cn105::interface::{Channel, Clock};
//! # use embedded_hal::serial::{Read, Write};
//! # struct Port;
//! # impl Read<u8> for Port {
//! #     type Error = ();
//! #     fn read(&mut self) -> nb::Result<u8, ()> { Err(nb::Error::WouldBlock) }
//! # }
//! # impl Write<u8> for Port {
//! #     type Error = ();
//! #     fn write(&mut self, _: u8) -> nb::Result<(), ()> { Ok(()) }
//! #     fn flush(&mut self) -> nb::Result<(), ()> { Ok(()) }
//! # }
//! # impl Channel for Port { fn set_bitrate(&mut self, _: u32) {} }
//! # struct Millis;
//! # impl Clock for Millis {
//! #     fn now_ms(&self) -> u64 { 0 }
//! #     fn delay_ms(&mut self, _: u32) {}
//! # }
//! use cn105::{HeatPump, Mode, Power};
//!
//! let mut hp = HeatPump::new(Port, Millis);
//! hp.connect(None).ok();
//!
//! hp.set_power(Power::On);
//! hp.set_mode(Mode::Heat);
//! hp.set_temperature_celsius(21.0);
//!
//! loop {
//!     // each tick sends at most one frame and reads at most one frame;
//!     // the staged settings go out as soon as pacing allows
//!     hp.sync(None);
//! }
//! ```
//!
//! ## Reading frames by hand
//!
//! ```
//! use cn105::protocol::{Frame, PacketData};
//!
//! let buf: &[u8] = &[0xfc, 0x7a, 0x01, 0x30, 0x01, 0x00, 0xac];
//!
//! let (frame, _rest) = Frame::parse(buf).unwrap();
//! match PacketData::parse(&frame) {
//!     PacketData::ConnectAck => { /* handshake acknowledged */ }
//!     PacketData::Info(_data) => { /* telemetry */ }
//!     _ => {}
//! }
//! ```

#[macro_use]
extern crate nom;

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod driver;
pub mod interface;
pub mod protocol;
pub mod settings;

pub use driver::{Direction, Error, HeatPump};
pub use settings::{Functions, FunctionsPart, Settings, Status, Timers};

#[doc(inline)]
pub use protocol::types::{Fan, Mode, Power, TenthDegreesC, TimerMode, Vane, WideVane};
#[doc(inline)]
pub use protocol::InfoType;
