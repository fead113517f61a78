use serde::Serialize;

/// One complete MIDI message decoded from, or encoded into, BLE-MIDI packets.
///
/// Channels are `0..=15`, data fields are 7-bit, pitch wheel and song position
/// are 14-bit.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MidiEvent {
    /// System Exclusive payload without the `0xF0`/`0xF7` framing bytes.
    SystemExclusive { data: Vec<u8> },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyphonicAftertouch { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, function: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelAftertouch { channel: u8, pressure: u8 },
    /// Pitch wheel position, `8192` is centre.
    PitchWheel { channel: u8, amount: u16 },
    TimeCodeQuarterFrame { value: u8 },
    SongSelect { song: u8 },
    SongPositionPointer { position: u16 },
    TuneRequest,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    Reset,
    /// Registered parameter change assembled from CC 101/100/6/38.
    ///
    /// `value` is 7-bit when only one data-entry half is known and 14-bit
    /// (`msb << 7 | lsb`) once both are.
    Rpn { channel: u8, function: u16, value: u16 },
    /// Non-registered parameter change assembled from CC 99/98/6/38.
    Nrpn { channel: u8, function: u16, value: u16 },
}

pub(crate) const STATUS_NOTE_OFF: u8 = 0x80;
pub(crate) const STATUS_NOTE_ON: u8 = 0x90;
pub(crate) const STATUS_POLYPHONIC_AFTERTOUCH: u8 = 0xA0;
pub(crate) const STATUS_CONTROL_CHANGE: u8 = 0xB0;
pub(crate) const STATUS_PROGRAM_CHANGE: u8 = 0xC0;
pub(crate) const STATUS_CHANNEL_AFTERTOUCH: u8 = 0xD0;
pub(crate) const STATUS_PITCH_WHEEL: u8 = 0xE0;
pub(crate) const SYSEX_START: u8 = 0xF0;
pub(crate) const TIME_CODE_QUARTER_FRAME: u8 = 0xF1;
pub(crate) const SONG_POSITION_POINTER: u8 = 0xF2;
pub(crate) const SONG_SELECT: u8 = 0xF3;
pub(crate) const TUNE_REQUEST: u8 = 0xF6;
pub(crate) const SYSEX_END: u8 = 0xF7;
pub(crate) const TIMING_CLOCK: u8 = 0xF8;
pub(crate) const START: u8 = 0xFA;
pub(crate) const CONTINUE: u8 = 0xFB;
pub(crate) const STOP: u8 = 0xFC;
pub(crate) const ACTIVE_SENSING: u8 = 0xFE;
pub(crate) const RESET: u8 = 0xFF;

pub(crate) const CC_DATA_ENTRY_MSB: u8 = 6;
pub(crate) const CC_DATA_ENTRY_LSB: u8 = 38;
pub(crate) const CC_NRPN_LSB: u8 = 98;
pub(crate) const CC_NRPN_MSB: u8 = 99;
pub(crate) const CC_RPN_LSB: u8 = 100;
pub(crate) const CC_RPN_MSB: u8 = 101;

impl MidiEvent {
    /// Returns the MIDI 1.0 status byte that introduces this event.
    ///
    /// RPN and NRPN report Control Change, the message they are carried by.
    ///
    /// ```
    /// let event = blemidi::MidiEvent::NoteOn { channel: 2, note: 60, velocity: 1 };
    /// assert_eq!(0x92, event.status());
    /// ```
    #[must_use]
    pub fn status(&self) -> u8 {
        match self {
            Self::SystemExclusive { .. } => SYSEX_START,
            Self::NoteOff { channel, .. } => STATUS_NOTE_OFF | (channel & 0x0F),
            Self::NoteOn { channel, .. } => STATUS_NOTE_ON | (channel & 0x0F),
            Self::PolyphonicAftertouch { channel, .. } => {
                STATUS_POLYPHONIC_AFTERTOUCH | (channel & 0x0F)
            }
            Self::ControlChange { channel, .. }
            | Self::Rpn { channel, .. }
            | Self::Nrpn { channel, .. } => STATUS_CONTROL_CHANGE | (channel & 0x0F),
            Self::ProgramChange { channel, .. } => STATUS_PROGRAM_CHANGE | (channel & 0x0F),
            Self::ChannelAftertouch { channel, .. } => {
                STATUS_CHANNEL_AFTERTOUCH | (channel & 0x0F)
            }
            Self::PitchWheel { channel, .. } => STATUS_PITCH_WHEEL | (channel & 0x0F),
            Self::TimeCodeQuarterFrame { .. } => TIME_CODE_QUARTER_FRAME,
            Self::SongSelect { .. } => SONG_SELECT,
            Self::SongPositionPointer { .. } => SONG_POSITION_POINTER,
            Self::TuneRequest => TUNE_REQUEST,
            Self::TimingClock => TIMING_CLOCK,
            Self::Start => START,
            Self::Continue => CONTINUE,
            Self::Stop => STOP,
            Self::ActiveSensing => ACTIVE_SENSING,
            Self::Reset => RESET,
        }
    }

    /// Returns whether this is a single-byte real-time message.
    #[must_use]
    pub fn is_real_time(&self) -> bool {
        matches!(
            self,
            Self::TimingClock
                | Self::Start
                | Self::Continue
                | Self::Stop
                | Self::ActiveSensing
                | Self::Reset
        )
    }

    /// Serialises the event as MIDI 1.0 wire messages.
    ///
    /// Most events produce one message. RPN/NRPN expand into the Control
    /// Change sequence that selects the parameter and enters its value;
    /// SysEx includes its `0xF0`/`0xF7` framing.
    ///
    /// Fields are masked to their wire width; use the encoder for validation.
    ///
    /// ```
    /// let event = blemidi::MidiEvent::PitchWheel { channel: 0, amount: 8192 };
    /// assert_eq!(vec![vec![0xE0, 0x00, 0x40]], event.to_messages());
    /// ```
    #[must_use]
    pub fn to_messages(&self) -> Vec<Vec<u8>> {
        let status = self.status();
        match self {
            Self::SystemExclusive { data } => {
                let mut message = Vec::with_capacity(data.len() + 2);
                message.push(SYSEX_START);
                message.extend(data.iter().map(|byte| byte & 0x7F));
                message.push(SYSEX_END);
                vec![message]
            }
            Self::NoteOff { note, velocity, .. } | Self::NoteOn { note, velocity, .. } => {
                vec![vec![status, note & 0x7F, velocity & 0x7F]]
            }
            Self::PolyphonicAftertouch { note, pressure, .. } => {
                vec![vec![status, note & 0x7F, pressure & 0x7F]]
            }
            Self::ControlChange { function, value, .. } => {
                vec![vec![status, function & 0x7F, value & 0x7F]]
            }
            Self::ProgramChange { program, .. } => vec![vec![status, program & 0x7F]],
            Self::ChannelAftertouch { pressure, .. } => vec![vec![status, pressure & 0x7F]],
            Self::PitchWheel { amount, .. } => {
                let [lsb, msb] = split_14bit(*amount);
                vec![vec![status, lsb, msb]]
            }
            Self::TimeCodeQuarterFrame { value } => vec![vec![status, value & 0x7F]],
            Self::SongSelect { song } => vec![vec![status, song & 0x7F]],
            Self::SongPositionPointer { position } => {
                let [lsb, msb] = split_14bit(*position);
                vec![vec![status, lsb, msb]]
            }
            Self::Rpn {
                function, value, ..
            } => parameter_messages(status, CC_RPN_MSB, CC_RPN_LSB, *function, *value),
            Self::Nrpn {
                function, value, ..
            } => parameter_messages(status, CC_NRPN_MSB, CC_NRPN_LSB, *function, *value),
            Self::TuneRequest
            | Self::TimingClock
            | Self::Start
            | Self::Continue
            | Self::Stop
            | Self::ActiveSensing
            | Self::Reset => vec![vec![status]],
        }
    }

    /// Returns the MIDI 1.0 byte stream for this event, messages concatenated.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_messages().concat()
    }
}

/// A decoded event together with the 13-bit BLE-MIDI timestamp it carried.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DecodedMessage {
    /// Milliseconds modulo 8192, as transmitted by the sender.
    pub timestamp: u16,
    #[serde(flatten)]
    pub event: MidiEvent,
}

impl DecodedMessage {
    pub(crate) fn new(timestamp: u16, event: MidiEvent) -> Self {
        Self { timestamp, event }
    }
}

/// Number of data bytes following a status byte, `None` for SysEx framing and
/// undefined statuses.
pub(crate) fn data_len_for_status(status: u8) -> Option<usize> {
    match status {
        0x80..=0xBF | 0xE0..=0xEF => Some(2),
        0xC0..=0xDF => Some(1),
        TIME_CODE_QUARTER_FRAME | SONG_SELECT => Some(1),
        SONG_POSITION_POINTER => Some(2),
        TUNE_REQUEST | TIMING_CLOCK | START | CONTINUE | STOP | ACTIVE_SENSING | RESET => Some(0),
        _ => None,
    }
}

pub(crate) fn join_14bit(lsb: u8, msb: u8) -> u16 {
    (u16::from(msb & 0x7F) << 7) | u16::from(lsb & 0x7F)
}

fn split_14bit(value: u16) -> [u8; 2] {
    [(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
}

fn parameter_messages(
    status: u8,
    function_msb_cc: u8,
    function_lsb_cc: u8,
    function: u16,
    value: u16,
) -> Vec<Vec<u8>> {
    let [function_lsb, function_msb] = split_14bit(function);
    let mut messages = vec![
        vec![status, function_msb_cc, function_msb],
        vec![status, function_lsb_cc, function_lsb],
    ];
    if value <= 0x7F {
        messages.push(vec![status, CC_DATA_ENTRY_MSB, value as u8]);
    } else {
        let [value_lsb, value_msb] = split_14bit(value);
        messages.push(vec![status, CC_DATA_ENTRY_MSB, value_msb]);
        messages.push(vec![status, CC_DATA_ENTRY_LSB, value_lsb]);
    }
    messages
}
