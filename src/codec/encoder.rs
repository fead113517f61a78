use std::time::Instant;

use thiserror::Error;
use tracing::{instrument, trace};

use super::event::{MidiEvent, SYSEX_END, SYSEX_START};

/// Smallest packet that can carry a header, a timestamp and a three-byte message.
pub const MIN_MAX_PAYLOAD: usize = 5;
const TIMESTAMP_MODULO: u64 = 8192;

/// Errors raised while turning an event into BLE-MIDI packets.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum PacketCodecError {
    #[error("max payload {max_payload} is below the minimum of {min} bytes")]
    MaxPayloadTooSmall { max_payload: usize, min: usize },
    #[error("channel {channel} is outside 0..=15")]
    InvalidChannel { channel: u8 },
    #[error("{field} value {value} exceeds {max}")]
    DataOutOfRange {
        field: &'static str,
        value: u16,
        max: u16,
    },
    #[error("SysEx payload byte 0x{value:02x} has the high bit set")]
    InvalidDataByte { value: u8 },
}

/// Builds the BLE-MIDI header byte for a 13-bit millisecond timestamp.
pub(crate) fn header_byte(timestamp: u16) -> u8 {
    0x80 | ((timestamp >> 7) & 0x3F) as u8
}

/// Builds the per-message timestamp byte for a 13-bit millisecond timestamp.
pub(crate) fn timestamp_byte(timestamp: u16) -> u8 {
    0x80 | (timestamp & 0x7F) as u8
}

/// Encodes one event into BLE-MIDI packets no longer than `max_payload`.
///
/// Short messages share one packet. SysEx that does not fit is split; each
/// continuation packet starts with the header and a timestamp byte, and the
/// terminator is always preceded by its own timestamp byte.
///
/// ```
/// use blemidi::{MidiEvent, encode_event};
///
/// let packets = encode_event(&MidiEvent::NoteOn { channel: 0, note: 60, velocity: 100 }, 10, 20)
///     .expect("note on should encode");
/// assert_eq!(vec![vec![0x80, 0x8A, 0x90, 60, 100]], packets);
/// ```
#[instrument(skip(event), level = "trace", fields(status = event.status()))]
pub fn encode_event(
    event: &MidiEvent,
    timestamp_ms: u64,
    max_payload: usize,
) -> Result<Vec<Vec<u8>>, PacketCodecError> {
    if max_payload < MIN_MAX_PAYLOAD {
        return Err(PacketCodecError::MaxPayloadTooSmall {
            max_payload,
            min: MIN_MAX_PAYLOAD,
        });
    }
    validate(event)?;

    let timestamp = (timestamp_ms % TIMESTAMP_MODULO) as u16;
    let mut writer = PacketWriter::new(timestamp, max_payload);
    for message in event.to_messages() {
        if message.first() == Some(&SYSEX_START) {
            writer.push_sysex(&message);
        } else {
            writer.push_message(&message);
        }
    }
    let packets = writer.finish();
    trace!(packets = packets.len(), "event encoded");
    Ok(packets)
}

fn validate(event: &MidiEvent) -> Result<(), PacketCodecError> {
    match event {
        MidiEvent::SystemExclusive { data } => {
            if let Some(&value) = data.iter().find(|byte| **byte > 0x7F) {
                return Err(PacketCodecError::InvalidDataByte { value });
            }
            Ok(())
        }
        MidiEvent::NoteOff {
            channel,
            note,
            velocity,
        }
        | MidiEvent::NoteOn {
            channel,
            note,
            velocity,
        } => {
            check_channel(*channel)?;
            check_7bit("note", *note)?;
            check_7bit("velocity", *velocity)
        }
        MidiEvent::PolyphonicAftertouch {
            channel,
            note,
            pressure,
        } => {
            check_channel(*channel)?;
            check_7bit("note", *note)?;
            check_7bit("pressure", *pressure)
        }
        MidiEvent::ControlChange {
            channel,
            function,
            value,
        } => {
            check_channel(*channel)?;
            check_7bit("function", *function)?;
            check_7bit("value", *value)
        }
        MidiEvent::ProgramChange { channel, program } => {
            check_channel(*channel)?;
            check_7bit("program", *program)
        }
        MidiEvent::ChannelAftertouch { channel, pressure } => {
            check_channel(*channel)?;
            check_7bit("pressure", *pressure)
        }
        MidiEvent::PitchWheel { channel, amount } => {
            check_channel(*channel)?;
            check_14bit("amount", *amount)
        }
        MidiEvent::TimeCodeQuarterFrame { value } => check_7bit("value", *value),
        MidiEvent::SongSelect { song } => check_7bit("song", *song),
        MidiEvent::SongPositionPointer { position } => check_14bit("position", *position),
        MidiEvent::Rpn {
            channel,
            function,
            value,
        }
        | MidiEvent::Nrpn {
            channel,
            function,
            value,
        } => {
            check_channel(*channel)?;
            check_14bit("function", *function)?;
            check_14bit("value", *value)
        }
        MidiEvent::TuneRequest
        | MidiEvent::TimingClock
        | MidiEvent::Start
        | MidiEvent::Continue
        | MidiEvent::Stop
        | MidiEvent::ActiveSensing
        | MidiEvent::Reset => Ok(()),
    }
}

fn check_channel(channel: u8) -> Result<(), PacketCodecError> {
    if channel > 0x0F {
        return Err(PacketCodecError::InvalidChannel { channel });
    }
    Ok(())
}

fn check_7bit(field: &'static str, value: u8) -> Result<(), PacketCodecError> {
    if value > 0x7F {
        return Err(PacketCodecError::DataOutOfRange {
            field,
            value: u16::from(value),
            max: 0x7F,
        });
    }
    Ok(())
}

fn check_14bit(field: &'static str, value: u16) -> Result<(), PacketCodecError> {
    if value > 0x3FFF {
        return Err(PacketCodecError::DataOutOfRange {
            field,
            value,
            max: 0x3FFF,
        });
    }
    Ok(())
}

struct PacketWriter {
    header: u8,
    timestamp: u8,
    max_payload: usize,
    current: Vec<u8>,
    packets: Vec<Vec<u8>>,
}

impl PacketWriter {
    fn new(timestamp: u16, max_payload: usize) -> Self {
        let header = header_byte(timestamp);
        Self {
            header,
            timestamp: timestamp_byte(timestamp),
            max_payload,
            current: vec![header],
            packets: Vec::new(),
        }
    }

    fn push_message(&mut self, message: &[u8]) {
        if self.current.len() + 1 + message.len() > self.max_payload {
            self.flush();
        }
        self.current.push(self.timestamp);
        self.current.extend_from_slice(message);
    }

    fn push_sysex(&mut self, message: &[u8]) {
        let payload = message
            .strip_prefix(&[SYSEX_START])
            .and_then(|rest| rest.strip_suffix(&[SYSEX_END]))
            .unwrap_or(message);

        if self.current.len() + 3 > self.max_payload {
            self.flush();
        }
        self.current.push(self.timestamp);
        self.current.push(SYSEX_START);
        for &byte in payload {
            if self.current.len() >= self.max_payload {
                self.flush();
                self.current.push(self.timestamp);
            }
            self.current.push(byte);
        }
        if self.current.len() + 2 > self.max_payload {
            self.flush();
        }
        self.current.push(self.timestamp);
        self.current.push(SYSEX_END);
    }

    fn flush(&mut self) {
        if self.current.len() > 1 {
            let packet = std::mem::replace(&mut self.current, vec![self.header]);
            self.packets.push(packet);
        }
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        self.flush();
        self.packets
    }
}

/// Clock and bookkeeping for one output endpoint.
///
/// Timestamps are milliseconds since the session was created, reduced modulo
/// 8192 on the wire.
#[derive(Debug, Clone)]
pub struct EncodeSession {
    origin: Instant,
    last_timestamp: Option<u16>,
}

impl Default for EncodeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_timestamp: None,
        }
    }

    /// Encodes `event` stamped with the time elapsed since the session began.
    pub fn encode(
        &mut self,
        event: &MidiEvent,
        max_payload: usize,
    ) -> Result<Vec<Vec<u8>>, PacketCodecError> {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.encode_at(event, elapsed, max_payload)
    }

    /// Encodes `event` with an explicit millisecond timestamp.
    pub fn encode_at(
        &mut self,
        event: &MidiEvent,
        timestamp_ms: u64,
        max_payload: usize,
    ) -> Result<Vec<Vec<u8>>, PacketCodecError> {
        let packets = encode_event(event, timestamp_ms, max_payload)?;
        self.last_timestamp = Some((timestamp_ms % TIMESTAMP_MODULO) as u16);
        Ok(packets)
    }

    /// 13-bit timestamp of the last successfully encoded event.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<u16> {
        self.last_timestamp
    }
}
