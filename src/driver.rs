//! The connection and synchronization state machine.
//!
//! One [`HeatPump`] owns one serial channel and drives it half-duplex: it
//! connects (with a bitrate fallback), keeps a `current` (device-confirmed)
//! and `wanted` (caller-staged) settings pair, sends a diff packet whenever
//! they disagree, waits for the acknowledgement, and otherwise polls the
//! unit's telemetry round-robin -- all from a caller-invoked [`sync`]
//! (no background work, no interrupts).
//!
//! [`sync`]: HeatPump::sync

use embedded_hal::serial::{Read, Write};
use heapless::consts::U40;
use heapless::Vec;
use log::{debug, warn};

use crate::interface::{Channel, Clock};
use crate::protocol::types::{Fan, Mode, Power, TenthDegreesC, Vane, WideVane};
use crate::protocol::{
    raw_checksum, DataType, Encodable, Frame, FrameError, InfoData, InfoRequestData, InfoType,
    PacketData, RemoteTempData, SetFunctionsData, SetRequestData, CONNECT_PACKET, FRAME_START,
    MAX_PACKET_LEN, PAYLOAD_LEN,
};
use crate::settings::{Functions, FunctionsPart, Settings, Status};

/// Minimum interval between two settings updates.
pub const PACKET_SENT_INTERVAL_MS: u64 = 1000;

/// Minimum interval between any two sends (updates or telemetry polls).
pub const PACKET_INFO_INTERVAL_MS: u64 = 2000;

/// How long to wait for one complete response frame.
pub const PACKET_RESPONSE_WAIT_MS: u64 = 500;

/// Extra settle time the unit needs after a power on/off before it will
/// answer telemetry again.
pub const POWER_SETTLE_EXTRA_MS: u64 = 10_000;

/// Line settle delay between reconfiguring the bitrate and the handshake.
pub const CONNECT_SETTLE_MS: u32 = 2000;

pub const DEFAULT_BITRATE: u32 = 2400;
pub const FALLBACK_BITRATE: u32 = 9600;

// Receive silence that counts as a dead link.
const STALE_AFTER_MS: u64 = PACKET_SENT_INTERVAL_MS * 12;

// Pause between polls while spin-waiting for a send window.
const SPIN_DELAY_MS: u32 = 10;

// Upper bound on the post-ack wait for the follow-up settings refresh;
// covers the power settle window with margin.
const AUTO_REFRESH_WAIT_MS: u32 = 15_000;

// Telemetry categories refreshed by the round-robin poll.
const INFO_CYCLE: [InfoType; 3] = [InfoType::Settings, InfoType::RoomTemp, InfoType::Timers];

/// Driver-level failures. Frame-level problems are recovered locally and
/// reported here only from the entry point that observed them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// No complete frame arrived inside the response-wait window.
    Timeout,
    /// Nothing queued on the channel and the caller did not ask to wait.
    NoData,
    /// Inbound bytes did not line up with the frame header.
    MalformedFrame,
    /// A structurally sound frame failed its checksum.
    ChecksumMismatch,
    /// Handshake unacknowledged at every attempted bitrate.
    ConnectFailed,
    /// The supplied function set is incomplete or out of range.
    InvalidFunctions,
}

/// Which way a raw packet crossed the wire, for the packet callback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Sent,
    Received,
}

pub type ConnectCallback = fn();
pub type SettingsChangedCallback = fn(&Settings);
pub type StatusChangedCallback = fn(&Status);
pub type RoomTempChangedCallback = fn(TenthDegreesC);
pub type PacketCallback = fn(&[u8], Direction);

/// Driver for one indoor unit on one serial channel.
pub struct HeatPump<S, C> {
    serial: S,
    clock: C,

    current_settings: Settings,
    wanted_settings: Settings,
    current_status: Status,
    functions: Functions,

    connected: bool,
    updating: bool,
    auto_update: bool,
    external_update: bool,
    first_run: bool,
    fine_temp: bool,
    wide_vane_adj: bool,
    power_setting_update: bool,

    update_delay_ms: u64,
    last_send: u64,
    last_send_update: u64,
    last_recv: Option<u64>,
    info_mode: usize,
    peeked: Option<u8>,

    on_connect: Option<ConnectCallback>,
    on_settings_changed: Option<SettingsChangedCallback>,
    on_status_changed: Option<StatusChangedCallback>,
    on_room_temp_changed: Option<RoomTempChangedCallback>,
    on_packet: Option<PacketCallback>,
}

impl<S, C> HeatPump<S, C>
where
    S: Channel,
    C: Clock,
{
    pub fn new(serial: S, clock: C) -> Self {
        HeatPump {
            serial,
            clock,
            current_settings: Settings::default(),
            wanted_settings: Settings::default(),
            current_status: Status::default(),
            functions: Functions::new(),
            connected: false,
            updating: false,
            auto_update: false,
            external_update: false,
            first_run: true,
            fine_temp: false,
            wide_vane_adj: false,
            power_setting_update: false,
            update_delay_ms: PACKET_SENT_INTERVAL_MS,
            last_send: 0,
            last_send_update: 0,
            last_recv: None,
            info_mode: 0,
            peeked: None,
            on_connect: None,
            on_settings_changed: None,
            on_status_changed: None,
            on_room_temp_changed: None,
            on_packet: None,
        }
    }

    // ------------------------------------------------------------------
    // Connection

    /// Handshake with the unit. With `None` the line is tried at the
    /// default bitrate and, if the unit stays silent, once more at the
    /// fallback rate. Blocks up to the settle delay plus one response wait
    /// per attempt.
    pub fn connect(&mut self, bitrate: Option<u32>) -> Result<(), Error> {
        let bitrate = bitrate.unwrap_or(DEFAULT_BITRATE);
        self.connected = false;
        match self.connect_at(bitrate) {
            Ok(()) => Ok(()),
            Err(_) if bitrate == DEFAULT_BITRATE => self.connect_at(FALLBACK_BITRATE),
            Err(err) => Err(err),
        }
    }

    fn connect_at(&mut self, bitrate: u32) -> Result<(), Error> {
        debug!("connecting at {} baud", bitrate);
        self.serial.set_bitrate(bitrate);
        self.clock.delay_ms(CONNECT_SETTLE_MS);
        self.write_packet(&CONNECT_PACKET);
        match self.read_packet(true) {
            Ok(PacketData::ConnectAck) => Ok(()),
            _ => Err(Error::ConnectFailed),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    // ------------------------------------------------------------------
    // The tick

    /// One cooperative tick. Reconnects a stale link, sends a pending
    /// update, collects the acknowledgement of the previous one, drains a
    /// queued frame, and finally polls the next telemetry category when the
    /// pacing rules allow. `request` pins the poll to one category instead
    /// of the round-robin cursor.
    pub fn sync(&mut self, request: Option<InfoType>) {
        let now = self.clock.now_ms();
        if !self.connected || self.receive_stale(now) {
            debug!("link stale, reconnecting");
            self.connected = false;
            let _ = self.connect(None);
        } else if self.send_pending() {
            self.update();
        } else if self.updating {
            match self.read_packet(false) {
                Ok(PacketData::UpdateAck) => {
                    if self.auto_update {
                        // refresh settings right away so state that depends
                        // on the applied command (operating flag, corrected
                        // setpoint) follows promptly
                        if self.wait_until_can_send(true, AUTO_REFRESH_WAIT_MS).is_ok() {
                            self.sync(Some(InfoType::Settings));
                        }
                    }
                    return;
                }
                _ => return,
            }
        } else if self.can_read(now) {
            let _ = self.read_packet(false);
        } else if self.external_update && !self.first_run && self.send_pending() && request.is_none()
        {
            // a command staged out-of-band behaves like a normal pending one
            self.update();
        }

        if self.can_send(true) {
            self.send_info_request(request);
        }
    }

    /// Send the staged settings diff now if pacing allows. Returns whether
    /// a packet went out; [`sync`](Self::sync) calls this automatically.
    pub fn update(&mut self) -> bool {
        if !self.can_send(false) {
            return false;
        }

        // a power toggle needs extra settle time before the next send
        let power_toggle = self.wanted_settings.power != self.current_settings.power;
        self.power_setting_update = power_toggle;
        self.update_delay_ms = if power_toggle {
            PACKET_SENT_INTERVAL_MS + POWER_SETTLE_EXTRA_MS
        } else {
            PACKET_SENT_INTERVAL_MS
        };

        let data = SetRequestData::diff(
            &self.wanted_settings,
            &self.current_settings,
            self.fine_temp,
            self.wide_vane_adj,
        );
        if !self.send_payload(DataType::SetRequest, &data) {
            return false;
        }

        self.current_settings = self.wanted_settings;
        self.updating = true;
        self.last_send_update = self.clock.now_ms();
        true
    }

    /// A command is pending exactly when staged and confirmed settings
    /// disagree.
    pub fn send_pending(&self) -> bool {
        self.wanted_settings != self.current_settings
    }

    // ------------------------------------------------------------------
    // Settings accessors

    /// Last device-confirmed settings.
    pub fn settings(&self) -> &Settings {
        &self.current_settings
    }

    /// Stage every field carried by `settings`.
    pub fn set_settings(&mut self, settings: &Settings) {
        if let Some(power) = settings.power {
            self.set_power(power);
        }
        if let Some(mode) = settings.mode {
            self.set_mode(mode);
        }
        if let Some(temperature) = settings.temperature {
            self.set_temperature(temperature);
        }
        if let Some(fan) = settings.fan {
            self.set_fan_speed(fan);
        }
        if let Some(vane) = settings.vane {
            self.set_vane(vane);
        }
        if let Some(wide_vane) = settings.wide_vane {
            self.set_wide_vane(wide_vane);
        }
    }

    pub fn power(&self) -> Option<Power> {
        self.current_settings.power
    }

    pub fn set_power(&mut self, power: Power) {
        self.wanted_settings.power = Some(power);
    }

    pub fn mode(&self) -> Option<Mode> {
        self.current_settings.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.wanted_settings.mode = Some(mode);
    }

    pub fn temperature(&self) -> Option<TenthDegreesC> {
        self.current_settings.temperature
    }

    /// Stage a set-point. Snapped to the coarse table, or rounded to a half
    /// degree and clamped once the device has shown it speaks fine
    /// temperatures. Validation happens here, not at send time.
    pub fn set_temperature(&mut self, temp: TenthDegreesC) {
        self.wanted_settings.temperature = Some(if self.fine_temp {
            temp.clamp_fine()
        } else {
            temp.snap_to_setpoint()
        });
    }

    pub fn set_temperature_celsius(&mut self, deg: f32) {
        self.set_temperature(TenthDegreesC::from_celsius(deg));
    }

    pub fn fan_speed(&self) -> Option<Fan> {
        self.current_settings.fan
    }

    pub fn set_fan_speed(&mut self, fan: Fan) {
        self.wanted_settings.fan = Some(fan);
    }

    pub fn vane(&self) -> Option<Vane> {
        self.current_settings.vane
    }

    pub fn set_vane(&mut self, vane: Vane) {
        self.wanted_settings.vane = Some(vane);
    }

    pub fn wide_vane(&self) -> Option<WideVane> {
        self.current_settings.wide_vane
    }

    pub fn set_wide_vane(&mut self, wide_vane: WideVane) {
        self.wanted_settings.wide_vane = Some(wide_vane);
    }

    /// Whether the unit reported an iSee sensor. Read-only.
    pub fn isee(&self) -> Option<bool> {
        self.current_settings.isee
    }

    // ------------------------------------------------------------------
    // Status

    pub fn status(&self) -> &Status {
        &self.current_status
    }

    pub fn room_temperature(&self) -> TenthDegreesC {
        self.current_status.room_temperature
    }

    pub fn operating(&self) -> bool {
        self.current_status.operating
    }

    /// Feed the unit an external room-temperature reading, or `None` to
    /// hand control back to its own sensor. Blocks until the pacing window
    /// opens, up to `timeout_ms`.
    pub fn set_remote_temperature(
        &mut self,
        temp: Option<TenthDegreesC>,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        self.wait_until_can_send(false, timeout_ms)?;
        self.send_payload(DataType::SetRequest, &RemoteTempData(temp));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Functions

    /// Fetch both halves of the vendor function-code set. Blocks across two
    /// request/response exchanges plus a short re-read loop; `timeout_ms`
    /// bounds each pacing wait. The returned set may still be invalid if
    /// the unit never produced both halves.
    pub fn get_functions(&mut self, timeout_ms: u32) -> Result<Functions, Error> {
        self.functions.clear();

        self.wait_until_can_send(false, timeout_ms)?;
        self.send_payload(
            DataType::InfoRequest,
            &InfoRequestData(InfoType::FunctionsPart1),
        );
        let _ = self.read_packet(true);

        self.wait_until_can_send(false, timeout_ms)?;
        self.send_payload(
            DataType::InfoRequest,
            &InfoRequestData(InfoType::FunctionsPart2),
        );
        let _ = self.read_packet(true);

        // responses may have interleaved with other telemetry; re-read a
        // few times before giving up
        for _ in 0..5 {
            if self.functions.is_valid() {
                break;
            }
            self.clock.delay_ms(100);
            let _ = self.read_packet(false);
        }

        Ok(self.functions)
    }

    /// Write a function-code set back to the unit.
    ///
    /// Refused outright when the set is not valid or any required byte is
    /// zero: the device silently drops partially specified payloads, so the
    /// pre-check is the only failure the caller would ever see.
    pub fn set_functions(&mut self, functions: &Functions, timeout_ms: u32) -> Result<(), Error> {
        if !functions.is_valid() {
            return Err(Error::InvalidFunctions);
        }
        let half1 = functions.half(FunctionsPart::One);
        let half2 = functions.half(FunctionsPart::Two);
        if !functions_half_ok(&half1) || !functions_half_ok(&half2) {
            return Err(Error::InvalidFunctions);
        }

        self.wait_until_can_send(false, timeout_ms)?;
        self.send_payload(
            DataType::SetRequest,
            &SetFunctionsData {
                part: FunctionsPart::One,
                data: half1,
            },
        );
        let _ = self.read_packet(true);

        self.wait_until_can_send(false, timeout_ms)?;
        self.send_payload(
            DataType::SetRequest,
            &SetFunctionsData {
                part: FunctionsPart::Two,
                data: half2,
            },
        );
        let _ = self.read_packet(true);

        Ok(())
    }

    // ------------------------------------------------------------------
    // Escape hatches

    /// Send caller-supplied payload bytes as-is: the header byte is
    /// prepended, a checksum appended, and anything beyond the maximum
    /// frame length truncated. No validation happens on this path; a wrong
    /// payload can desynchronize or misconfigure the unit.
    pub fn send_custom_packet(&mut self, data: &[u8], timeout_ms: u32) -> Result<(), Error> {
        self.wait_until_can_send(false, timeout_ms)?;

        let mut packet = [0u8; MAX_PACKET_LEN];
        let len = (data.len() + 2).min(MAX_PACKET_LEN);
        packet[0] = FRAME_START;
        packet[1..len - 1].copy_from_slice(&data[..len - 2]);
        packet[len - 1] = raw_checksum(&packet[..len - 1]);
        self.write_packet(&packet[..len]);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Modes and callbacks

    /// After an acknowledged update, immediately refresh settings from the
    /// unit instead of waiting for the next poll cycle.
    pub fn enable_auto_update(&mut self) {
        self.auto_update = true;
    }

    pub fn disable_auto_update(&mut self) {
        self.auto_update = false;
    }

    /// Allow commands staged out-of-band (implies auto-update).
    pub fn enable_external_update(&mut self) {
        self.auto_update = true;
        self.external_update = true;
    }

    pub fn disable_external_update(&mut self) {
        self.external_update = false;
    }

    /// Pin the round-robin telemetry cursor.
    pub fn set_info_mode_index(&mut self, index: usize) {
        if index < INFO_CYCLE.len() {
            self.info_mode = index;
        }
    }

    pub fn set_connect_callback(&mut self, callback: ConnectCallback) {
        self.on_connect = Some(callback);
    }

    pub fn set_settings_changed_callback(&mut self, callback: SettingsChangedCallback) {
        self.on_settings_changed = Some(callback);
    }

    pub fn set_status_changed_callback(&mut self, callback: StatusChangedCallback) {
        self.on_status_changed = Some(callback);
    }

    pub fn set_room_temp_changed_callback(&mut self, callback: RoomTempChangedCallback) {
        self.on_room_temp_changed = Some(callback);
    }

    pub fn set_packet_callback(&mut self, callback: PacketCallback) {
        self.on_packet = Some(callback);
    }

    // ------------------------------------------------------------------
    // Pacing

    fn receive_stale(&self, now: u64) -> bool {
        self.last_recv
            .map_or(true, |at| now.saturating_sub(at) > STALE_AFTER_MS)
    }

    fn can_send(&self, is_info: bool) -> bool {
        let now = self.clock.now_ms();
        if is_info {
            // hold telemetry off while a power toggle settles
            if self.power_setting_update
                && now.saturating_sub(self.last_send_update)
                    < PACKET_SENT_INTERVAL_MS + POWER_SETTLE_EXTRA_MS
            {
                return false;
            }
            now.saturating_sub(self.last_send) > PACKET_INFO_INTERVAL_MS
        } else {
            now.saturating_sub(self.last_send_update) > self.update_delay_ms
                && now.saturating_sub(self.last_send) > PACKET_INFO_INTERVAL_MS
        }
    }

    fn can_read(&self, now: u64) -> bool {
        now.saturating_sub(self.last_send) > PACKET_RESPONSE_WAIT_MS
    }

    fn wait_until_can_send(&mut self, is_info: bool, timeout_ms: u32) -> Result<(), Error> {
        let start = self.clock.now_ms();
        while !self.can_send(is_info) {
            if self.clock.now_ms().saturating_sub(start) >= timeout_ms as u64 {
                return Err(Error::Timeout);
            }
            self.clock.delay_ms(SPIN_DELAY_MS);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Wire I/O

    fn send_info_request(&mut self, request: Option<InfoType>) {
        let kind = match request {
            Some(kind) => kind,
            None => {
                let kind = INFO_CYCLE[self.info_mode];
                self.info_mode = (self.info_mode + 1) % INFO_CYCLE.len();
                kind
            }
        };
        self.send_payload(DataType::InfoRequest, &InfoRequestData(kind));
    }

    fn send_payload(&mut self, data_type: DataType, payload: &dyn Encodable) -> bool {
        let mut data = [0u8; PAYLOAD_LEN];
        if payload.encode(&mut data).is_err() {
            warn!("payload failed to encode, nothing sent");
            return false;
        }
        let mut buf = [0u8; MAX_PACKET_LEN];
        match Frame::new(data_type, &data).encode(&mut buf) {
            Ok(len) => {
                self.write_packet(&buf[..len]);
                true
            }
            Err(_) => false,
        }
    }

    fn write_packet(&mut self, bytes: &[u8]) {
        // transport errors never drive the state machine; a lost packet
        // surfaces later as receive staleness
        for &byte in bytes {
            let _ = nb::block!(self.serial.write(byte));
        }
        let _ = nb::block!(self.serial.flush());
        if let Some(callback) = self.on_packet {
            callback(bytes, Direction::Sent);
        }
        self.last_send = self.clock.now_ms();
    }

    /// Read and apply one frame. With `wait_for_packet` the call blocks up
    /// to the response-wait deadline; otherwise it returns [`Error::NoData`]
    /// immediately when the channel is idle.
    fn read_packet(&mut self, wait_for_packet: bool) -> Result<PacketData, Error> {
        if !wait_for_packet && !self.byte_available() {
            return Err(Error::NoData);
        }

        let start = self.clock.now_ms();
        let mut buf: Vec<u8, U40> = Vec::new();
        loop {
            if self.clock.now_ms().saturating_sub(start) >= PACKET_RESPONSE_WAIT_MS {
                return Err(Error::Timeout);
            }
            let byte = match self.read_byte() {
                Some(byte) => byte,
                None => {
                    self.clock.delay_ms(1);
                    continue;
                }
            };
            if buf.push(byte).is_err() {
                self.drain_input();
                return Err(Error::MalformedFrame);
            }

            match Frame::parse(&buf) {
                Ok((frame, _)) => {
                    let data = PacketData::parse(&frame);
                    self.last_recv = Some(self.clock.now_ms());
                    if let Some(callback) = self.on_packet {
                        callback(&buf, Direction::Received);
                    }
                    self.apply_packet(&data);
                    return Ok(data);
                }
                Err(FrameError::Incomplete(_)) => {}
                Err(FrameError::ChecksumMismatch { .. }) => {
                    warn!("discarding frame with bad checksum");
                    self.drain_input();
                    return Err(Error::ChecksumMismatch);
                }
                Err(FrameError::Malformed) => {
                    warn!("discarding bytes that match no frame header");
                    self.drain_input();
                    return Err(Error::MalformedFrame);
                }
            }
        }
    }

    fn apply_packet(&mut self, data: &PacketData) {
        match *data {
            PacketData::UpdateAck => {
                self.updating = false;
            }
            PacketData::ConnectAck => {
                self.connected = true;
                if let Some(callback) = self.on_connect {
                    callback();
                }
            }
            PacketData::Info(info) => self.apply_info(info),
            PacketData::Unknown => {
                warn!("ignoring frame with unhandled category");
            }
        }
    }

    fn apply_info(&mut self, info: InfoData) {
        match info {
            InfoData::Settings(decoded) => {
                if decoded.fine_temp {
                    self.fine_temp = true;
                }
                self.wide_vane_adj = decoded.wide_vane_adj;
                let changed = self.current_settings != decoded.settings;
                self.current_settings = decoded.settings;
                // the confirmed state is also the new staging baseline
                self.wanted_settings = self.current_settings;
                self.first_run = false;
                if changed {
                    if let Some(callback) = self.on_settings_changed {
                        callback(&self.current_settings);
                    }
                }
            }
            InfoData::RoomTemperature(temp) => {
                let changed = self.current_status.room_temperature != temp;
                self.current_status.room_temperature = temp;
                if changed {
                    if let Some(callback) = self.on_status_changed {
                        callback(&self.current_status);
                    }
                    if let Some(callback) = self.on_room_temp_changed {
                        callback(temp);
                    }
                }
            }
            InfoData::Timers(timers) => {
                let changed = self.current_status.timers != timers;
                self.current_status.timers = timers;
                if changed {
                    if let Some(callback) = self.on_status_changed {
                        callback(&self.current_status);
                    }
                }
            }
            InfoData::Status(op) => {
                let changed = self.current_status.operating != op.operating
                    || self.current_status.compressor_frequency != op.compressor_frequency
                    || self.current_status.power != op.power;
                self.current_status.operating = op.operating;
                self.current_status.compressor_frequency = op.compressor_frequency;
                self.current_status.power = op.power;
                if changed {
                    if let Some(callback) = self.on_status_changed {
                        callback(&self.current_status);
                    }
                }
            }
            InfoData::Functions { part, data } => {
                self.functions.set_half(part, &data);
            }
            InfoData::Unrecognized(code) => {
                debug!("no decoder for info sub-code {:#04x}", code);
            }
        }
    }

    fn byte_available(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.serial.read().ok();
        }
        self.peeked.is_some()
    }

    fn read_byte(&mut self) -> Option<u8> {
        match self.peeked.take() {
            Some(byte) => Some(byte),
            None => self.serial.read().ok(),
        }
    }

    fn drain_input(&mut self) {
        self.peeked = None;
        while self.serial.read().is_ok() {}
    }
}

fn functions_half_ok(half: &[u8; 15]) -> bool {
    half[14] == 0x00 && half[..14].iter().all(|&byte| byte != 0x00)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::collections::VecDeque;
    use std::vec::Vec as StdVec;

    struct MockSerial {
        rx: VecDeque<u8>,
        tx: StdVec<u8>,
        bitrates: StdVec<u32>,
    }

    impl MockSerial {
        fn new() -> Self {
            MockSerial {
                rx: VecDeque::new(),
                tx: StdVec::new(),
                bitrates: StdVec::new(),
            }
        }

        fn queue_frame(&mut self, data_type: DataType, payload: &[u8]) {
            let mut buf = [0u8; MAX_PACKET_LEN];
            let len = Frame::new(data_type, payload).encode(&mut buf).unwrap();
            self.rx.extend(&buf[..len]);
        }

        fn sent_frames(&self) -> StdVec<StdVec<u8>> {
            // every frame this driver sends is either the 8-byte connect
            // packet or a full 22-byte packet
            let mut frames = StdVec::new();
            let mut rest = &self.tx[..];
            while !rest.is_empty() {
                let len = if rest[1] == 0x5a { 8 } else { MAX_PACKET_LEN };
                frames.push(rest[..len].to_vec());
                rest = &rest[len..];
            }
            frames
        }
    }

    impl Read<u8> for MockSerial {
        type Error = ();
        fn read(&mut self) -> nb::Result<u8, ()> {
            self.rx.pop_front().ok_or(nb::Error::WouldBlock)
        }
    }

    impl Write<u8> for MockSerial {
        type Error = ();
        fn write(&mut self, byte: u8) -> nb::Result<(), ()> {
            self.tx.push(byte);
            Ok(())
        }
        fn flush(&mut self) -> nb::Result<(), ()> {
            Ok(())
        }
    }

    impl Channel for MockSerial {
        fn set_bitrate(&mut self, bitrate: u32) {
            self.bitrates.push(bitrate);
        }
    }

    struct MockClock(Cell<u64>);

    impl MockClock {
        fn advance_to(&self, ms: u64) {
            self.0.set(ms);
        }
    }

    impl Clock for MockClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
        fn delay_ms(&mut self, ms: u32) {
            self.0.set(self.0.get() + ms as u64);
        }
    }

    const CONNECT_ACK: [u8; 7] = [0xfc, 0x7a, 0x01, 0x30, 0x01, 0x00, 0xac];

    fn connected() -> HeatPump<MockSerial, MockClock> {
        let mut hp = HeatPump::new(MockSerial::new(), MockClock(Cell::new(0)));
        hp.serial.rx.extend(&CONNECT_ACK);
        hp.connect(None).unwrap();
        assert!(hp.is_connected());
        hp.serial.tx.clear();
        hp
    }

    #[test]
    fn connect_handshake() {
        let mut hp = HeatPump::new(MockSerial::new(), MockClock(Cell::new(0)));
        hp.serial.rx.extend(&CONNECT_ACK);
        assert_eq!(hp.connect(None), Ok(()));
        assert!(hp.is_connected());
        assert_eq!(&hp.serial.bitrates[..], &[DEFAULT_BITRATE]);
        assert_eq!(&hp.serial.tx[..], &CONNECT_PACKET[..]);
    }

    #[test]
    fn connect_falls_back_to_9600() {
        let mut hp = HeatPump::new(MockSerial::new(), MockClock(Cell::new(0)));
        assert_eq!(hp.connect(None), Err(Error::ConnectFailed));
        assert!(!hp.is_connected());
        assert_eq!(&hp.serial.bitrates[..], &[DEFAULT_BITRATE, FALLBACK_BITRATE]);
        // the connect frame went out once per attempt
        assert_eq!(hp.serial.tx.len(), CONNECT_PACKET.len() * 2);
    }

    #[test]
    fn connect_explicit_bitrate_does_not_retry() {
        let mut hp = HeatPump::new(MockSerial::new(), MockClock(Cell::new(0)));
        assert_eq!(hp.connect(Some(9600)), Err(Error::ConnectFailed));
        assert_eq!(&hp.serial.bitrates[..], &[9600]);
    }

    #[test]
    fn idle_tick_polls_round_robin() {
        let mut hp = connected();
        hp.clock.advance_to(6000);
        hp.sync(None);
        let frames = hp.serial.sent_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][1], 0x42);
        assert_eq!(frames[0][5], 0x02); // settings first

        hp.clock.advance_to(9000);
        hp.sync(None);
        hp.clock.advance_to(12000);
        hp.sync(None);
        let frames = hp.serial.sent_frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1][5], 0x03); // room temperature
        assert_eq!(frames[2][5], 0x05); // timers
        assert_eq!(hp.info_mode, 0); // cursor wrapped
    }

    #[test]
    fn no_update_sent_when_nothing_pending() {
        let mut hp = connected();
        assert!(!hp.send_pending());
        hp.clock.advance_to(6000);
        hp.sync(None);
        for frame in hp.serial.sent_frames() {
            assert_ne!(frame[1], 0x41);
        }
    }

    #[test]
    fn pending_settings_produce_a_set_frame() {
        let mut hp = connected();
        hp.set_power(Power::On);
        hp.set_mode(Mode::Heat);
        hp.set_temperature_celsius(21.0);
        assert!(hp.send_pending());

        hp.clock.advance_to(6000);
        hp.sync(None);

        let frames = hp.serial.sent_frames();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame[1], 0x41);
        assert_eq!(frame[6], 0b0000_0111); // power + mode + temp flagged
        assert_eq!(frame[7], 0x00);
        assert_eq!(frame[8], 0x01); // on
        assert_eq!(frame[9], 0x01); // heat
        assert_eq!(frame[10], 0x0a); // 21C
        assert!(hp.updating);
        assert!(!hp.send_pending());
    }

    #[test]
    fn update_ack_clears_awaiting_state() {
        let mut hp = connected();
        hp.set_fan_speed(Fan::F3);
        hp.clock.advance_to(6000);
        hp.sync(None);
        assert!(hp.updating);

        hp.serial.queue_frame(DataType::UpdateAck, &[0u8; 16]);
        hp.clock.advance_to(6100);
        hp.sync(None);
        assert!(!hp.updating);
    }

    #[test]
    fn telemetry_suppressed_inside_power_settle_window() {
        let mut hp = connected();
        hp.set_power(Power::On);
        hp.clock.advance_to(6000);
        hp.sync(None);
        assert!(hp.power_setting_update);

        hp.serial.queue_frame(DataType::UpdateAck, &[0u8; 16]);
        hp.clock.advance_to(6100);
        hp.sync(None);

        // inside (interval + extra delay) after the power update: no poll
        hp.clock.advance_to(16_000);
        hp.sync(None);
        let polls = |hp: &HeatPump<MockSerial, MockClock>| {
            hp.serial
                .sent_frames()
                .iter()
                .filter(|f| f[1] == 0x42)
                .count()
        };
        assert_eq!(polls(&hp), 0);

        // once the window has passed the poll goes out
        hp.clock.advance_to(17_100);
        hp.sync(None);
        assert_eq!(polls(&hp), 1);
    }

    #[test]
    fn non_power_update_uses_base_delay() {
        let mut hp = connected();
        hp.set_vane(Vane::V2);
        hp.clock.advance_to(6000);
        hp.sync(None);
        assert!(!hp.power_setting_update);

        hp.serial.queue_frame(DataType::UpdateAck, &[0u8; 16]);
        hp.clock.advance_to(6100);
        hp.sync(None);

        hp.clock.advance_to(8200);
        hp.sync(None);
        let polls = hp
            .serial
            .sent_frames()
            .iter()
            .filter(|f| f[1] == 0x42)
            .count();
        assert_eq!(polls, 1);
    }

    #[test]
    fn stale_link_reconnects() {
        let mut hp = connected();
        hp.serial.rx.extend(&CONNECT_ACK);
        // past the staleness horizon the tick goes straight to connect
        hp.clock.advance_to(2000 + STALE_AFTER_MS + 1);
        hp.sync(None);
        assert!(hp.is_connected());
        assert_eq!(&hp.serial.bitrates[..], &[DEFAULT_BITRATE, DEFAULT_BITRATE]);
    }

    #[test]
    fn settings_frame_updates_state_and_notifies() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn on_settings(_: &Settings) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let mut hp = connected();
        hp.set_settings_changed_callback(on_settings);

        let mut payload = [0u8; 16];
        payload[0] = 0x02;
        payload[3] = 0x01; // on
        payload[4] = 0x01; // heat
        payload[5] = 0x0a; // 21C
        payload[6] = 0x00;
        payload[7] = 0x07;
        payload[10] = 0x03;
        hp.serial.queue_frame(DataType::InfoResponse, &payload);

        hp.clock.advance_to(6000);
        hp.sync(None);

        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(hp.power(), Some(Power::On));
        assert_eq!(hp.mode(), Some(Mode::Heat));
        assert_eq!(hp.temperature(), Some(TenthDegreesC(210)));
        // the decode re-stages wanted from current
        assert!(!hp.send_pending());

        // an identical frame changes nothing and stays silent
        hp.serial.queue_frame(DataType::InfoResponse, &payload);
        hp.clock.advance_to(9000);
        hp.sync(None);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn room_temperature_notification_fires_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn on_status(_: &Status) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let mut hp = connected();
        hp.set_status_changed_callback(on_status);

        let mut payload = [0u8; 16];
        payload[0] = 0x03;
        payload[3] = 5; // table entry 5 -> 15.0C
        hp.serial.queue_frame(DataType::InfoResponse, &payload);
        hp.clock.advance_to(6000);
        hp.sync(None);

        assert_eq!(hp.room_temperature(), TenthDegreesC(150));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);

        hp.serial.queue_frame(DataType::InfoResponse, &payload);
        hp.clock.advance_to(9000);
        hp.sync(None);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fine_temperature_mode_latches_from_device() {
        let mut hp = connected();
        let mut payload = [0u8; 16];
        payload[0] = 0x02;
        payload[3] = 0x01;
        payload[4] = 0x01;
        payload[11] = 171; // 21.5C fine encoding
        hp.serial.queue_frame(DataType::InfoResponse, &payload);
        hp.clock.advance_to(6000);
        hp.sync(None);

        assert!(hp.fine_temp);
        assert_eq!(hp.temperature(), Some(TenthDegreesC(215)));

        // staged temperatures now use the continuous encoding
        hp.set_temperature_celsius(22.3);
        hp.clock.advance_to(9000);
        hp.sync(None);
        let frames = hp.serial.sent_frames();
        let set = frames.iter().find(|f| f[1] == 0x41).unwrap();
        assert_eq!(set[10], 0x00);
        assert_eq!(set[19], 173); // 22.5 * 2 + 128 at the fine offset
    }

    #[test]
    fn unknown_info_subcode_is_a_noop() {
        let mut hp = connected();
        let mut payload = [0u8; 16];
        payload[0] = 0x04;
        hp.serial.queue_frame(DataType::InfoResponse, &payload);
        hp.clock.advance_to(6000);
        hp.sync(None);
        assert!(hp.is_connected());
        assert_eq!(hp.status(), &Status::default());
    }

    #[test]
    fn checksum_mismatch_discards_frame() {
        let mut hp = connected();
        let mut payload = [0u8; 16];
        payload[0] = 0x03;
        payload[3] = 5;
        hp.serial.queue_frame(DataType::InfoResponse, &payload);
        // corrupt one payload byte in the queued bytes
        let idx = 8;
        let byte = hp.serial.rx[idx] ^ 0x40;
        hp.serial.rx[idx] = byte;

        hp.clock.advance_to(6000);
        hp.sync(None);
        // frame dropped, state untouched
        assert_eq!(hp.room_temperature(), TenthDegreesC::default());
    }

    #[test]
    fn functions_round_trip() {
        let mut hp = connected();
        let mut part1 = [0u8; 16];
        part1[0] = 0x20;
        for byte in part1[1..15].iter_mut() {
            *byte = 0x05;
        }
        let mut part2 = [0u8; 16];
        part2[0] = 0x22;
        for byte in part2[1..15].iter_mut() {
            *byte = 0x49;
        }
        hp.serial.queue_frame(DataType::InfoResponse, &part1);
        hp.serial.queue_frame(DataType::InfoResponse, &part2);

        hp.clock.advance_to(6000);
        let functions = hp.get_functions(30_000).unwrap();
        assert!(functions.is_valid());
        assert_eq!(functions.value(101), Some(1));

        let requests: StdVec<u8> = hp
            .serial
            .sent_frames()
            .iter()
            .filter(|f| f[1] == 0x42)
            .map(|f| f[5])
            .collect();
        assert_eq!(&requests[..], &[0x20, 0x22]);
    }

    #[test]
    fn set_functions_refuses_incomplete_set() {
        let mut hp = connected();
        let functions = Functions::new();
        assert_eq!(
            hp.set_functions(&functions, 1000),
            Err(Error::InvalidFunctions)
        );
        assert!(hp.serial.tx.is_empty());
    }

    #[test]
    fn set_functions_refuses_zero_bytes() {
        let mut hp = connected();
        let mut functions = Functions::new();
        let mut half = [0x05u8; 15];
        half[14] = 0x00;
        let mut sparse = half;
        sparse[3] = 0x00; // a required byte missing
        functions.set_half(FunctionsPart::One, &sparse);
        functions.set_half(FunctionsPart::Two, &half);
        assert_eq!(
            hp.set_functions(&functions, 1000),
            Err(Error::InvalidFunctions)
        );
        assert!(hp.serial.tx.is_empty());
    }

    #[test]
    fn set_functions_writes_both_parts() {
        let mut hp = connected();
        let mut functions = Functions::new();
        let mut half = [0x05u8; 15];
        half[14] = 0x00;
        functions.set_half(FunctionsPart::One, &half);
        functions.set_half(FunctionsPart::Two, &half);

        hp.clock.advance_to(6000);
        assert_eq!(hp.set_functions(&functions, 30_000), Ok(()));
        let commands: StdVec<u8> = hp
            .serial
            .sent_frames()
            .iter()
            .filter(|f| f[1] == 0x41)
            .map(|f| f[5])
            .collect();
        assert_eq!(&commands[..], &[0x1f, 0x21]);
    }

    #[test]
    fn auto_update_requests_settings_after_ack() {
        let mut hp = connected();
        hp.enable_auto_update();
        hp.set_fan_speed(Fan::Quiet);
        hp.clock.advance_to(6000);
        hp.sync(None);
        assert!(hp.updating);

        hp.serial.queue_frame(DataType::UpdateAck, &[0u8; 16]);
        hp.clock.advance_to(6100);
        hp.sync(None);
        assert!(!hp.updating);

        let frames = hp.serial.sent_frames();
        let last = frames.last().unwrap();
        assert_eq!(last[1], 0x42);
        assert_eq!(last[5], 0x02); // settings refresh, not the cursor's pick
    }

    #[test]
    fn custom_packet_is_framed_and_truncated() {
        let mut hp = connected();
        hp.clock.advance_to(6000);
        hp.send_custom_packet(&[0x41, 0x01, 0x30, 0x10, 0x07], 1000)
            .unwrap();
        let tx = &hp.serial.tx;
        assert_eq!(tx[0], 0xfc);
        assert_eq!(&tx[1..6], &[0x41, 0x01, 0x30, 0x10, 0x07]);
        assert_eq!(tx.len(), 7);
        assert_eq!(tx[6], raw_checksum(&tx[..6]));

        hp.serial.tx.clear();
        hp.clock.advance_to(12_000);
        hp.send_custom_packet(&[0xaa; 30], 1000).unwrap();
        assert_eq!(hp.serial.tx.len(), MAX_PACKET_LEN);
    }

    #[test]
    fn remote_temperature_write() {
        let mut hp = connected();
        hp.clock.advance_to(6000);
        hp.set_remote_temperature(Some(TenthDegreesC(215)), 1000)
            .unwrap();
        let frames = hp.serial.sent_frames();
        assert_eq!(frames[0][1], 0x41);
        assert_eq!(frames[0][5], 0x07);
        assert_eq!(frames[0][6], 0x01);
        assert_eq!(frames[0][7], 26);
        assert_eq!(frames[0][8], 171);
    }

    #[test]
    fn spin_wait_times_out() {
        let mut hp = connected();
        // immediately after connect the pacing window is closed
        assert_eq!(
            hp.send_custom_packet(&[0x41], 50),
            Err(Error::Timeout)
        );
        assert!(hp.serial.tx.is_empty());
    }
}
