use tracing::{debug, instrument, trace};

use super::event::{
    CC_DATA_ENTRY_LSB, CC_DATA_ENTRY_MSB, CC_NRPN_LSB, CC_NRPN_MSB, CC_RPN_LSB, CC_RPN_MSB,
    DecodedMessage, MidiEvent, SONG_POSITION_POINTER, SONG_SELECT, SYSEX_END, SYSEX_START,
    TIME_CODE_QUARTER_FRAME, TIMING_CLOCK, data_len_for_status, join_14bit,
};

/// Largest SysEx body accepted from a peer before the message is discarded.
pub(crate) const MAX_SYSEX_LEN: usize = 64 * 1024;
const CHANNEL_COUNT: usize = 16;
const NULL_FUNCTION_HALF: u8 = 0x7F;

/// Reassembly state for one input endpoint.
///
/// A session is fed raw notification payloads in arrival order and yields the
/// complete MIDI messages they contain. Running status, SysEx accumulation and
/// RPN/NRPN selection persist across packets; a truncated message never does.
/// Decoding never fails: bytes that do not form a valid message are dropped
/// and the session keeps going.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DecodeSession {
    running_status: u8,
    sysex: Option<Vec<u8>>,
    partial: Option<PartialMessage>,
    parameters: [ChannelParameters; CHANNEL_COUNT],
}

impl Default for DecodeSession {
    fn default() -> Self {
        Self {
            running_status: 0,
            sysex: None,
            partial: None,
            parameters: [ChannelParameters::default(); CHANNEL_COUNT],
        }
    }
}

impl DecodeSession {
    /// Creates an idle session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one BLE-MIDI packet.
    ///
    /// Packets whose first byte lacks the header bit are dropped whole.
    ///
    /// ```
    /// use blemidi::{DecodeSession, MidiEvent};
    ///
    /// let mut session = DecodeSession::new();
    /// let messages = session.decode(&[0x80, 0x8A, 0x90, 60, 100]);
    /// assert_eq!(
    ///     MidiEvent::NoteOn { channel: 0, note: 60, velocity: 100 },
    ///     messages[0].event
    /// );
    /// assert_eq!(10, messages[0].timestamp);
    /// ```
    #[instrument(skip(self, packet), level = "trace", fields(packet_len = packet.len()))]
    pub fn decode(&mut self, packet: &[u8]) -> Vec<DecodedMessage> {
        let Some((&header, body)) = packet.split_first() else {
            trace!("dropping empty packet");
            return Vec::new();
        };
        if header & 0x80 == 0 {
            debug!(header, "dropping packet without a BLE-MIDI header byte");
            return Vec::new();
        }

        let mut clock = PacketClock::new(header);
        let mut messages = Vec::new();
        let mut after_timestamp = false;
        for &byte in body {
            if byte & 0x80 == 0 {
                after_timestamp = false;
                self.push_data(byte, clock.timestamp(), &mut messages);
            } else if after_timestamp {
                after_timestamp = false;
                self.push_status(byte, clock.timestamp(), &mut messages);
            } else {
                clock.advance(byte);
                after_timestamp = true;
            }
        }

        if let Some(partial) = self.partial.take() {
            debug!(
                status = partial.status,
                received = partial.len,
                expected = partial.expected,
                "dropping message truncated at packet end"
            );
        }
        messages
    }

    /// Returns the status byte reused for data bytes without their own status.
    #[must_use]
    pub fn running_status(&self) -> Option<u8> {
        (self.running_status != 0).then_some(self.running_status)
    }

    /// Returns whether a SysEx message is waiting for its terminator.
    #[must_use]
    pub fn is_sysex_in_progress(&self) -> bool {
        self.sysex.is_some()
    }

    /// Forgets all accumulated state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn push_status(&mut self, status: u8, timestamp: u16, messages: &mut Vec<DecodedMessage>) {
        match status {
            SYSEX_START => {
                if let Some(stale) = self.sysex.take() {
                    debug!(
                        discarded_len = stale.len(),
                        "SysEx restarted before its terminator; discarding the stale message"
                    );
                }
                self.partial = None;
                self.running_status = 0;
                self.sysex = Some(Vec::new());
            }
            SYSEX_END => match self.sysex.take() {
                Some(data) => {
                    messages.push(DecodedMessage::new(timestamp, MidiEvent::SystemExclusive { data }));
                }
                None => trace!("dropping SysEx terminator without a SysEx start"),
            },
            TIMING_CLOCK..=0xFF => match real_time_event(status) {
                Some(event) => messages.push(DecodedMessage::new(timestamp, event)),
                None => trace!(status, "dropping undefined real-time status"),
            },
            0xF1..=0xF6 => {
                self.partial = None;
                match data_len_for_status(status) {
                    Some(0) => messages.push(DecodedMessage::new(timestamp, MidiEvent::TuneRequest)),
                    Some(expected) => self.partial = Some(PartialMessage::new(status, expected)),
                    None => trace!(status, "dropping undefined system common status"),
                }
            }
            _ => {
                if let Some(stale) = self.sysex.take() {
                    debug!(
                        discarded_len = stale.len(),
                        status, "channel message interrupted SysEx; discarding the unterminated message"
                    );
                }
                self.running_status = status;
                self.partial = data_len_for_status(status)
                    .map(|expected| PartialMessage::new(status, expected));
            }
        }
    }

    fn push_data(&mut self, byte: u8, timestamp: u16, messages: &mut Vec<DecodedMessage>) {
        if let Some(partial) = self.partial.as_mut() {
            partial.push(byte);
            if partial.is_complete() {
                let complete = *partial;
                self.partial = None;
                self.complete(complete, timestamp, messages);
            }
            return;
        }

        if let Some(buffer) = self.sysex.as_mut() {
            if buffer.len() >= MAX_SYSEX_LEN {
                debug!(limit = MAX_SYSEX_LEN, "SysEx exceeded size limit; discarding");
                self.sysex = None;
                return;
            }
            buffer.push(byte);
            return;
        }

        let Some(expected) = self.running_status().and_then(data_len_for_status) else {
            trace!(byte, "dropping data byte without running status");
            return;
        };
        let mut partial = PartialMessage::new(self.running_status, expected);
        partial.push(byte);
        if partial.is_complete() {
            self.complete(partial, timestamp, messages);
        } else {
            self.partial = Some(partial);
        }
    }

    fn complete(
        &mut self,
        message: PartialMessage,
        timestamp: u16,
        messages: &mut Vec<DecodedMessage>,
    ) {
        let [first, second] = message.data;
        let channel = message.status & 0x0F;
        let event = match message.status & 0xF0 {
            0x80 => MidiEvent::NoteOff {
                channel,
                note: first,
                velocity: second,
            },
            0x90 => MidiEvent::NoteOn {
                channel,
                note: first,
                velocity: second,
            },
            0xA0 => MidiEvent::PolyphonicAftertouch {
                channel,
                note: first,
                pressure: second,
            },
            0xB0 => self.control_change(channel, first, second),
            0xC0 => MidiEvent::ProgramChange {
                channel,
                program: first,
            },
            0xD0 => MidiEvent::ChannelAftertouch {
                channel,
                pressure: first,
            },
            0xE0 => MidiEvent::PitchWheel {
                channel,
                amount: join_14bit(first, second),
            },
            _ => match message.status {
                TIME_CODE_QUARTER_FRAME => MidiEvent::TimeCodeQuarterFrame { value: first },
                SONG_POSITION_POINTER => MidiEvent::SongPositionPointer {
                    position: join_14bit(first, second),
                },
                SONG_SELECT => MidiEvent::SongSelect { song: first },
                status => {
                    trace!(status, "dropping message with unsupported status");
                    return;
                }
            },
        };
        messages.push(DecodedMessage::new(timestamp, event));
    }

    fn control_change(&mut self, channel: u8, function: u8, value: u8) -> MidiEvent {
        let plain = MidiEvent::ControlChange {
            channel,
            function,
            value,
        };
        let parameters = &mut self.parameters[usize::from(channel)];

        match function {
            CC_RPN_MSB if value == NULL_FUNCTION_HALF => {
                parameters.deselect(ParameterKind::Registered);
                plain
            }
            CC_NRPN_MSB if value == NULL_FUNCTION_HALF => {
                parameters.deselect(ParameterKind::NonRegistered);
                plain
            }
            CC_RPN_MSB => parameters.select(ParameterKind::Registered, Half::Msb, value, plain),
            CC_RPN_LSB => parameters.select(ParameterKind::Registered, Half::Lsb, value, plain),
            CC_NRPN_MSB => parameters.select(ParameterKind::NonRegistered, Half::Msb, value, plain),
            CC_NRPN_LSB => parameters.select(ParameterKind::NonRegistered, Half::Lsb, value, plain),
            CC_DATA_ENTRY_MSB => parameters.enter(channel, Half::Msb, value).unwrap_or(plain),
            CC_DATA_ENTRY_LSB => parameters.enter(channel, Half::Lsb, value).unwrap_or(plain),
            _ => plain,
        }
    }
}

fn real_time_event(status: u8) -> Option<MidiEvent> {
    match status {
        0xF8 => Some(MidiEvent::TimingClock),
        0xFA => Some(MidiEvent::Start),
        0xFB => Some(MidiEvent::Continue),
        0xFC => Some(MidiEvent::Stop),
        0xFE => Some(MidiEvent::ActiveSensing),
        0xFF => Some(MidiEvent::Reset),
        _ => None,
    }
}

/// Timestamp tracking inside one packet; the low part wrapping bumps the high part.
#[derive(Debug, Clone, Copy)]
struct PacketClock {
    high: u8,
    low: Option<u8>,
}

impl PacketClock {
    fn new(header: u8) -> Self {
        Self {
            high: header & 0x3F,
            low: None,
        }
    }

    fn advance(&mut self, timestamp_byte: u8) {
        let low = timestamp_byte & 0x7F;
        if let Some(previous) = self.low
            && low < previous
        {
            self.high = (self.high + 1) & 0x3F;
        }
        self.low = Some(low);
    }

    fn timestamp(self) -> u16 {
        (u16::from(self.high) << 7) | u16::from(self.low.unwrap_or(0))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct PartialMessage {
    status: u8,
    data: [u8; 2],
    len: usize,
    expected: usize,
}

impl PartialMessage {
    fn new(status: u8, expected: usize) -> Self {
        Self {
            status,
            data: [0; 2],
            len: 0,
            expected,
        }
    }

    fn push(&mut self, byte: u8) {
        if self.len < self.data.len() {
            self.data[self.len] = byte;
            self.len += 1;
        }
    }

    fn is_complete(&self) -> bool {
        self.len >= self.expected
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ParameterKind {
    Registered,
    NonRegistered,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Half {
    Msb,
    Lsb,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
struct Halves {
    msb: Option<u8>,
    lsb: Option<u8>,
}

impl Halves {
    fn set(&mut self, half: Half, value: u8) {
        match half {
            Half::Msb => self.msb = Some(value),
            Half::Lsb => self.lsb = Some(value),
        }
    }

    fn as_function(self) -> u16 {
        join_14bit(self.lsb.unwrap_or(0), self.msb.unwrap_or(0))
    }

    fn as_value(self) -> Option<u16> {
        match (self.msb, self.lsb) {
            (Some(msb), Some(lsb)) => Some(join_14bit(lsb, msb)),
            (Some(half), None) | (None, Some(half)) => Some(u16::from(half)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
struct ParameterState {
    function: Halves,
    value: Halves,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
struct ChannelParameters {
    rpn: ParameterState,
    nrpn: ParameterState,
    selected: Option<ParameterKind>,
}

impl ChannelParameters {
    fn state_mut(&mut self, kind: ParameterKind) -> &mut ParameterState {
        match kind {
            ParameterKind::Registered => &mut self.rpn,
            ParameterKind::NonRegistered => &mut self.nrpn,
        }
    }

    fn deselect(&mut self, kind: ParameterKind) {
        *self.state_mut(kind) = ParameterState::default();
        if self.selected == Some(kind) {
            self.selected = None;
        }
    }

    /// Records one half of a parameter number; the previous value is forgotten.
    fn select(&mut self, kind: ParameterKind, half: Half, value: u8, plain: MidiEvent) -> MidiEvent {
        let state = self.state_mut(kind);
        state.function.set(half, value);
        state.value = Halves::default();
        self.selected = Some(kind);
        trace!(?kind, ?half, value, "parameter number updated");
        plain
    }

    /// Records one half of a data-entry value for the selected parameter.
    fn enter(&mut self, channel: u8, half: Half, value: u8) -> Option<MidiEvent> {
        let kind = self.selected?;
        let state = self.state_mut(kind);
        state.value.set(half, value);
        let function = state.function.as_function();
        let value = state.value.as_value()?;
        Some(match kind {
            ParameterKind::Registered => MidiEvent::Rpn {
                channel,
                function,
                value,
            },
            ParameterKind::NonRegistered => MidiEvent::Nrpn {
                channel,
                function,
                value,
            },
        })
    }
}
