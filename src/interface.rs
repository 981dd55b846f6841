//! Seams to the hardware the driver does not own: the serial line and a
//! source of monotonic time.

use embedded_hal::serial;

/// Byte channel to the indoor unit.
///
/// Beyond non-blocking byte reads and writes this adds the one line control
/// the protocol needs: switching the bitrate for the connect fallback. The
/// line always runs 8 data bits, even parity, 1 stop bit; implementations
/// configure that once and only vary the speed here.
pub trait Channel: serial::Read<u8> + serial::Write<u8> {
    fn set_bitrate(&mut self, bitrate: u32);
}

/// Monotonic milliseconds plus a blocking delay for the driver's bounded
/// spin loops. Wall-clock time is never consulted.
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn delay_ms(&mut self, ms: u32);
}
