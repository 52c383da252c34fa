use crate::config::{MAX_ANGLE_DEG, MAX_YAW_RATE_DPS, THROTTLE_MAX};
use crate::drivers::pid::PidGains;
use crate::state::{Axis, Command, DroneAngles};

// Frame: [Header] [Payload...] [Checksum], little endian payload.
// Checksum is the 8-bit wrapping sum of every byte before it.

pub const COMMAND_HEADER: u8 = 0x30;
pub const PID_UPDATE_HEADER: u8 = 0x51;
pub const TELEMETRY_HEADER: u8 = 0x82;

/// roll f32, pitch f32, yaw rate f32, throttle u16, sequence u16
pub const COMMAND_FRAME_LEN: usize = 1 + 12 + 2 + 2 + 1;
/// axis u8, kp f32, ki f32, kd f32
pub const PID_UPDATE_FRAME_LEN: usize = 1 + 1 + 12 + 1;
/// empty payload
pub const TELEMETRY_REQUEST_LEN: usize = 2;
/// state u8, roll f32, pitch f32, yaw rate f32, battery mV u16, flags u8
pub const TELEMETRY_REPLY_LEN: usize = 1 + 1 + 12 + 2 + 1 + 1;

pub const MAX_FRAME_LEN: usize = 32;

pub type Frame = heapless::Vec<u8, MAX_FRAME_LEN>;

// Telemetry status flags
pub const FLAG_SATURATED: u8 = 1 << 0;
pub const FLAG_SENSOR_FAULT: u8 = 1 << 1;
pub const FLAG_LINK_CONNECTED: u8 = 1 << 2;
pub const FLAG_LANDED: u8 = 1 << 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    UnknownHeader(u8),
    /// Fewer bytes than the header announces
    Truncated,
    /// More bytes than the header announces
    BadLength,
    ChecksumMismatch,
    /// Sequence number not newer than the last accepted command
    StaleSequence,
    /// Setpoint or gain outside its bounds, or not finite
    OutOfRange,
    InvalidAxis(u8),
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Message {
    Command(Command),
    GainUpdate { axis: Axis, gains: PidGains },
    TelemetryRequest,
}

/// Expected total length for frames starting with `header`.
pub fn frame_len(header: u8) -> Option<usize> {
    match header {
        COMMAND_HEADER => Some(COMMAND_FRAME_LEN),
        PID_UPDATE_HEADER => Some(PID_UPDATE_FRAME_LEN),
        TELEMETRY_HEADER => Some(TELEMETRY_REQUEST_LEN),
        _ => None,
    }
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Wrap-aware "strictly newer" for 16-bit sequence numbers.
pub fn is_newer(sequence: u16, last: u16) -> bool {
    let d = sequence.wrapping_sub(last);
    d != 0 && d < 0x8000
}

fn f32_at(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn within(v: f32, bound: f32) -> bool {
    v.is_finite() && v >= -bound && v <= bound
}

/// Validates framing and payload. Does not look at sequence numbers.
pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    let header = *frame.first().ok_or(ProtocolError::Truncated)?;
    let len = frame_len(header).ok_or(ProtocolError::UnknownHeader(header))?;

    if frame.len() < len {
        return Err(ProtocolError::Truncated);
    }
    if frame.len() > len {
        return Err(ProtocolError::BadLength);
    }
    if checksum(&frame[..len - 1]) != frame[len - 1] {
        return Err(ProtocolError::ChecksumMismatch);
    }

    match header {
        COMMAND_HEADER => {
            let command = Command {
                roll: f32_at(frame, 1),
                pitch: f32_at(frame, 5),
                yaw_rate: f32_at(frame, 9),
                throttle: u16_at(frame, 13),
                sequence: u16_at(frame, 15),
            };
            let in_bounds = within(command.roll, MAX_ANGLE_DEG)
                && within(command.pitch, MAX_ANGLE_DEG)
                && within(command.yaw_rate, MAX_YAW_RATE_DPS)
                && command.throttle <= THROTTLE_MAX;
            if !in_bounds {
                return Err(ProtocolError::OutOfRange);
            }
            Ok(Message::Command(command))
        }
        PID_UPDATE_HEADER => {
            let axis = Axis::from_id(frame[1]).ok_or(ProtocolError::InvalidAxis(frame[1]))?;
            let gains = PidGains::new(f32_at(frame, 2), f32_at(frame, 6), f32_at(frame, 10));
            if !gains.is_finite() || gains.kp < 0.0 || gains.ki < 0.0 || gains.kd < 0.0 {
                return Err(ProtocolError::OutOfRange);
            }
            Ok(Message::GainUpdate { axis, gains })
        }
        _ => Ok(Message::TelemetryRequest),
    }
}

/// Fills the trailing checksum byte of a frame already holding header and payload.
fn seal(frame: &mut [u8]) {
    let last = frame.len() - 1;
    frame[last] = checksum(&frame[..last]);
}

pub fn encode_command(command: &Command) -> [u8; COMMAND_FRAME_LEN] {
    let mut buf = [0u8; COMMAND_FRAME_LEN];
    buf[0] = COMMAND_HEADER;
    buf[1..5].copy_from_slice(&command.roll.to_le_bytes());
    buf[5..9].copy_from_slice(&command.pitch.to_le_bytes());
    buf[9..13].copy_from_slice(&command.yaw_rate.to_le_bytes());
    buf[13..15].copy_from_slice(&command.throttle.to_le_bytes());
    buf[15..17].copy_from_slice(&command.sequence.to_le_bytes());
    seal(&mut buf);
    buf
}

pub fn encode_gain_update(axis: Axis, gains: PidGains) -> [u8; PID_UPDATE_FRAME_LEN] {
    let mut buf = [0u8; PID_UPDATE_FRAME_LEN];
    buf[0] = PID_UPDATE_HEADER;
    buf[1] = axis as u8;
    buf[2..6].copy_from_slice(&gains.kp.to_le_bytes());
    buf[6..10].copy_from_slice(&gains.ki.to_le_bytes());
    buf[10..14].copy_from_slice(&gains.kd.to_le_bytes());
    seal(&mut buf);
    buf
}

pub fn encode_telemetry_request() -> [u8; TELEMETRY_REQUEST_LEN] {
    [TELEMETRY_HEADER, TELEMETRY_HEADER]
}

/// Reply to a telemetry request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Telemetry {
    pub state: u8,
    pub angles: DroneAngles,
    pub battery_mv: u16,
    pub flags: u8,
}

/// Writes a telemetry reply into `buf`.
/// Returns the number of bytes written, 0 if `buf` is too small.
pub fn encode_telemetry(buf: &mut [u8], telemetry: &Telemetry) -> usize {
    if buf.len() < TELEMETRY_REPLY_LEN {
        return 0;
    }
    let out = &mut buf[..TELEMETRY_REPLY_LEN];
    out[0] = TELEMETRY_HEADER;
    out[1] = telemetry.state;
    out[2..6].copy_from_slice(&telemetry.angles.roll.to_le_bytes());
    out[6..10].copy_from_slice(&telemetry.angles.pitch.to_le_bytes());
    out[10..14].copy_from_slice(&telemetry.angles.yaw_rate.to_le_bytes());
    out[14..16].copy_from_slice(&telemetry.battery_mv.to_le_bytes());
    out[16] = telemetry.flags;
    seal(out);
    TELEMETRY_REPLY_LEN
}

// ── Byte stream framing ───────────────────────────────────────────────────────

/// Cuts a byte stream into frames.
///
/// Bytes that cannot start a frame are skipped. When a candidate fails its
/// checksum only its header byte is dropped and the rest is rescanned, so a
/// stray header byte in the noise does not swallow the real frame behind it.
pub struct FrameDecoder {
    buffer: Frame,
    skipped: u32,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
            skipped: 0,
        }
    }

    pub fn push_byte(&mut self, b: u8) -> Option<Result<Frame, ProtocolError>> {
        if self.buffer.push(b).is_err() {
            self.skipped = self.skipped.wrapping_add(1);
        }

        let mut corrupt = false;
        loop {
            // Hunt for a header
            let start = self
                .buffer
                .iter()
                .position(|&h| frame_len(h).is_some())
                .unwrap_or(self.buffer.len());
            if start > 0 {
                self.skipped = self.skipped.wrapping_add(start as u32);
                self.drain_front(start);
            }

            let Some(expected) = self.buffer.first().and_then(|&h| frame_len(h)) else {
                break;
            };
            if self.buffer.len() < expected {
                break;
            }

            if checksum(&self.buffer[..expected - 1]) == self.buffer[expected - 1] {
                let frame = Frame::from_slice(&self.buffer[..expected]).unwrap_or_default();
                self.drain_front(expected);
                return Some(Ok(frame));
            }
            corrupt = true;
            self.drain_front(1);
        }

        if corrupt {
            Some(Err(ProtocolError::ChecksumMismatch))
        } else {
            None
        }
    }

    fn drain_front(&mut self, n: usize) {
        let rest = self.buffer.len() - n;
        self.buffer.copy_within(n.., 0);
        self.buffer.truncate(rest);
    }

    /// Bytes dropped while hunting for a header.
    pub fn skipped(&self) -> u32 {
        self.skipped
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Link state ────────────────────────────────────────────────────────────────

/// Latest operator intent plus link liveness, which only commands refresh.
pub struct CommandLink {
    command: Command,
    prev_command: Command,
    received_at_us: Option<u64>,
    last_sequence: Option<u16>,
    accepted: u32,
    rejected: u32,
}

impl CommandLink {
    pub fn new() -> Self {
        Self {
            command: Command::neutral(),
            prev_command: Command::neutral(),
            received_at_us: None,
            last_sequence: None,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Decodes and applies one frame. On error nothing but the reject counter
    /// changes; in particular the link stays as stale as it was.
    pub fn process_instruction(&mut self, frame: &[u8], now_us: u64) -> Result<Message, ProtocolError> {
        let message = match decode(frame) {
            Ok(Message::Command(cmd)) => match self.last_sequence {
                Some(last) if !is_newer(cmd.sequence, last) => Err(ProtocolError::StaleSequence),
                _ => Ok(Message::Command(cmd)),
            },
            other => other,
        };

        let message = match message {
            Ok(m) => m,
            Err(e) => {
                self.rejected = self.rejected.wrapping_add(1);
                debug!("frame rejected: {}", e);
                return Err(e);
            }
        };

        if let Message::Command(cmd) = message {
            self.prev_command = self.command;
            self.command = cmd;
            self.last_sequence = Some(cmd.sequence);
            self.received_at_us = Some(now_us);
        }
        self.accepted = self.accepted.wrapping_add(1);
        Ok(message)
    }

    pub fn is_controller_connected(&self, now_us: u64, timeout_us: u64) -> bool {
        self.link_age_us(now_us)
            .map_or(false, |age| age < timeout_us)
    }

    /// Time since the last accepted command. Gain updates and telemetry
    /// requests do not count.
    pub fn link_age_us(&self, now_us: u64) -> Option<u64> {
        self.received_at_us.map(|t| now_us.saturating_sub(t))
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn prev_command(&self) -> Command {
        self.prev_command
    }

    /// Setpoint ramped from the previous to the latest command over `smoothing_us`.
    pub fn effective_command(&self, now_us: u64, smoothing_us: u64) -> Command {
        match self.received_at_us {
            Some(at) if smoothing_us > 0 => {
                let t = now_us.saturating_sub(at) as f32 / smoothing_us as f32;
                self.prev_command.blend(&self.command, t)
            }
            _ => self.command,
        }
    }

    pub fn accepted(&self) -> u32 {
        self.accepted
    }

    pub fn rejected(&self) -> u32 {
        self.rejected
    }
}

impl Default for CommandLink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(throttle: u16, sequence: u16) -> Command {
        Command {
            roll: 5.0,
            pitch: -3.0,
            yaw_rate: 30.0,
            throttle,
            sequence,
        }
    }

    #[test]
    fn decodes_command_frame() {
        let frame = encode_command(&command(400, 1));
        assert_eq!(decode(&frame), Ok(Message::Command(command(400, 1))));
    }

    #[test]
    fn decodes_gain_frame() {
        let frame = encode_gain_update(Axis::Yaw, PidGains::new(1.0, 0.5, 0.25));
        assert_eq!(
            decode(&frame),
            Ok(Message::GainUpdate {
                axis: Axis::Yaw,
                gains: PidGains::new(1.0, 0.5, 0.25)
            })
        );
    }

    #[test]
    fn framing_errors_are_classified() {
        assert_eq!(decode(&[]), Err(ProtocolError::Truncated));
        assert_eq!(decode(&[0x42, 0x42]), Err(ProtocolError::UnknownHeader(0x42)));

        let frame = encode_command(&command(400, 1));
        assert_eq!(decode(&frame[..10]), Err(ProtocolError::Truncated));

        let mut long = [0u8; COMMAND_FRAME_LEN + 1];
        long[..COMMAND_FRAME_LEN].copy_from_slice(&frame);
        assert_eq!(decode(&long), Err(ProtocolError::BadLength));

        let mut corrupt = frame;
        corrupt[3] ^= 0x10;
        assert_eq!(decode(&corrupt), Err(ProtocolError::ChecksumMismatch));
    }

    #[test]
    fn payload_bounds() {
        let mut cmd = command(400, 1);
        cmd.roll = 60.0;
        assert_eq!(decode(&encode_command(&cmd)), Err(ProtocolError::OutOfRange));

        let mut cmd = command(1001, 1);
        assert_eq!(decode(&encode_command(&cmd)), Err(ProtocolError::OutOfRange));
        cmd.throttle = 1000;
        cmd.yaw_rate = f32::NAN;
        assert_eq!(decode(&encode_command(&cmd)), Err(ProtocolError::OutOfRange));

        let mut frame = encode_gain_update(Axis::Roll, PidGains::new(1.0, 0.0, 0.0));
        frame[1] = 7;
        seal(&mut frame);
        assert_eq!(decode(&frame), Err(ProtocolError::InvalidAxis(7)));
    }

    #[test]
    fn command_moves_previous_and_refreshes_link() {
        let mut link = CommandLink::new();
        assert_eq!(link.command(), Command::neutral());
        assert!(!link.is_controller_connected(0, 500_000));

        link.process_instruction(&encode_command(&command(300, 1)), 1_000)
            .unwrap();
        link.process_instruction(&encode_command(&command(500, 2)), 2_000)
            .unwrap();

        assert_eq!(link.prev_command().throttle, 300);
        assert_eq!(link.command().throttle, 500);
        assert_eq!(link.link_age_us(12_000), Some(10_000));
        assert!(link.is_controller_connected(501_999, 500_000));
        assert!(!link.is_controller_connected(502_000, 500_000));
    }

    #[test]
    fn stale_sequences_are_ignored() {
        let mut link = CommandLink::new();
        link.process_instruction(&encode_command(&command(300, 10)), 1_000)
            .unwrap();

        let stale = link.process_instruction(&encode_command(&command(900, 10)), 2_000);
        assert_eq!(stale, Err(ProtocolError::StaleSequence));
        let older = link.process_instruction(&encode_command(&command(900, 9)), 3_000);
        assert_eq!(older, Err(ProtocolError::StaleSequence));

        assert_eq!(link.command().throttle, 300);
        assert_eq!(link.prev_command(), Command::neutral());
        assert_eq!(link.link_age_us(3_000), Some(2_000));
        assert_eq!(link.rejected(), 2);
        assert_eq!(link.accepted(), 1);
    }

    #[test]
    fn stale_sequence_across_wrap() {
        let mut link = CommandLink::new();
        link.process_instruction(&encode_command(&command(300, u16::MAX)), 1_000)
            .unwrap();
        link.process_instruction(&encode_command(&command(500, 1)), 2_000)
            .unwrap();

        let stale = link.process_instruction(&encode_command(&command(900, 65_534)), 3_000);
        assert_eq!(stale, Err(ProtocolError::StaleSequence));
        assert_eq!(link.command().throttle, 500);
        assert_eq!(link.prev_command().throttle, 300);
        assert_eq!(link.link_age_us(3_000), Some(1_000));
    }

    #[test]
    fn sequence_wraps() {
        assert!(is_newer(0, u16::MAX));
        assert!(is_newer(5, 65_530));
        assert!(!is_newer(65_530, 5));
        assert!(!is_newer(7, 7));
    }

    #[test]
    fn bad_frame_leaves_link_untouched() {
        let mut link = CommandLink::new();
        let mut frame = encode_command(&command(300, 1));
        frame[COMMAND_FRAME_LEN - 1] ^= 0xFF;
        assert!(link.process_instruction(&frame, 1_000).is_err());
        assert_eq!(link.link_age_us(2_000), None);
        assert_eq!(link.command(), Command::neutral());
    }

    #[test]
    fn only_commands_refresh_link() {
        let mut link = CommandLink::new();
        let msg = link
            .process_instruction(&encode_telemetry_request(), 4_000)
            .unwrap();
        assert_eq!(msg, Message::TelemetryRequest);
        link.process_instruction(&encode_gain_update(Axis::Roll, PidGains::new(1.0, 0.0, 0.0)), 4_000)
            .unwrap();
        assert_eq!(link.link_age_us(4_000), None);
        assert!(!link.is_controller_connected(4_000, 500_000));
        assert_eq!(link.accepted(), 2);

        link.process_instruction(&encode_command(&command(300, 1)), 5_000)
            .unwrap();
        link.process_instruction(&encode_telemetry_request(), 400_000)
            .unwrap();
        assert_eq!(link.link_age_us(505_000), Some(500_000));
        assert!(!link.is_controller_connected(505_000, 500_000));
    }

    #[test]
    fn effective_command_ramps() {
        let mut link = CommandLink::new();
        link.process_instruction(&encode_command(&command(400, 1)), 0)
            .unwrap();

        assert_eq!(link.effective_command(0, 20_000).throttle, 0);
        assert_eq!(link.effective_command(10_000, 20_000).throttle, 200);
        assert_eq!(link.effective_command(30_000, 20_000).throttle, 400);
        assert_eq!(link.effective_command(0, 0).throttle, 400);
    }

    #[test]
    fn decoder_resyncs_after_noise() {
        let mut decoder = FrameDecoder::new();
        let frame = encode_command(&command(250, 3));

        let mut out = None;
        for b in [0x00, 0xFF, 0x13].iter().chain(frame.iter()) {
            if let Some(res) = decoder.push_byte(*b) {
                out = Some(res);
            }
        }
        assert_eq!(decoder.skipped(), 3);
        let got = out.unwrap().unwrap();
        assert_eq!(got.as_slice(), &frame[..]);
    }

    #[test]
    fn decoder_reports_corrupt_frame() {
        let mut decoder = FrameDecoder::new();
        let mut frame = encode_telemetry_request();
        frame[1] = 0x00;
        assert!(decoder.push_byte(frame[0]).is_none());
        assert_eq!(decoder.push_byte(frame[1]), Some(Err(ProtocolError::ChecksumMismatch)));

        // next frame decodes cleanly
        let good = encode_telemetry_request();
        assert!(decoder.push_byte(good[0]).is_none());
        assert!(matches!(decoder.push_byte(good[1]), Some(Ok(_))));
    }

    #[test]
    fn stray_header_byte_does_not_swallow_next_frame() {
        let mut decoder = FrameDecoder::new();
        let first = encode_command(&command(250, 3));
        let second = encode_command(&command(260, 4));

        let mut stream = vec![TELEMETRY_HEADER];
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&second);

        let mut good = Vec::new();
        let mut bad = 0;
        for b in stream {
            match decoder.push_byte(b) {
                Some(Ok(frame)) => good.push(frame),
                Some(Err(_)) => bad += 1,
                None => {}
            }
        }
        assert_eq!(bad, 1);
        assert_eq!(good.len(), 2);
        assert_eq!(good[0].as_slice(), &first[..]);
        assert_eq!(good[1].as_slice(), &second[..]);
    }

    #[test]
    fn telemetry_reply_layout() {
        let mut buf = [0u8; 32];
        let telemetry = Telemetry {
            state: 2,
            angles: DroneAngles {
                roll: 1.5,
                pitch: -2.0,
                yaw_rate: 0.0,
            },
            battery_mv: 3900,
            flags: FLAG_LINK_CONNECTED,
        };
        let n = encode_telemetry(&mut buf, &telemetry);
        assert_eq!(n, TELEMETRY_REPLY_LEN);
        assert_eq!(buf[0], TELEMETRY_HEADER);
        assert_eq!(buf[1], 2);
        assert_eq!(f32_at(&buf, 2), 1.5);
        assert_eq!(u16_at(&buf, 14), 3900);
        assert_eq!(buf[16], FLAG_LINK_CONNECTED);
        assert_eq!(checksum(&buf[..n - 1]), buf[n - 1]);

        assert_eq!(encode_telemetry(&mut buf[..4], &telemetry), 0);
    }
}
