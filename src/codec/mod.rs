//! BLE-MIDI packet codec.
//!
//! A BLE-MIDI packet is one header byte (bit 7 set, bits 0-5 holding the high
//! six bits of a 13-bit millisecond timestamp) followed by MIDI 1.0 messages,
//! each preceded by a timestamp byte carrying the low seven bits. Running
//! status applies within and across packets, and System Exclusive messages may
//! span any number of packets.

mod decoder;
mod encoder;
mod event;

pub use decoder::DecodeSession;
pub use encoder::{EncodeSession, MIN_MAX_PAYLOAD, PacketCodecError, encode_event};
pub use event::{DecodedMessage, MidiEvent};
