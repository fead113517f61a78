use assert_matches::assert_matches;
use blemidi::{DecodeSession, EncodeSession, MidiEvent, PacketCodecError, encode_event};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn decode_all(packets: &[Vec<u8>]) -> Vec<MidiEvent> {
    let mut session = DecodeSession::new();
    packets
        .iter()
        .flat_map(|packet| session.decode(packet))
        .map(|message| message.event)
        .collect()
}

#[rstest]
#[case::note_on(MidiEvent::NoteOn { channel: 3, note: 64, velocity: 90 })]
#[case::note_off(MidiEvent::NoteOff { channel: 15, note: 0, velocity: 127 })]
#[case::poly_aftertouch(MidiEvent::PolyphonicAftertouch { channel: 1, note: 40, pressure: 12 })]
#[case::control_change(MidiEvent::ControlChange { channel: 9, function: 7, value: 100 })]
#[case::program_change(MidiEvent::ProgramChange { channel: 0, program: 42 })]
#[case::channel_aftertouch(MidiEvent::ChannelAftertouch { channel: 2, pressure: 64 })]
#[case::pitch_wheel_max(MidiEvent::PitchWheel { channel: 5, amount: 16383 })]
#[case::pitch_wheel_centre(MidiEvent::PitchWheel { channel: 5, amount: 8192 })]
#[case::quarter_frame(MidiEvent::TimeCodeQuarterFrame { value: 0x35 })]
#[case::song_select(MidiEvent::SongSelect { song: 7 })]
#[case::song_position(MidiEvent::SongPositionPointer { position: 1000 })]
#[case::tune_request(MidiEvent::TuneRequest)]
#[case::clock(MidiEvent::TimingClock)]
#[case::reset(MidiEvent::Reset)]
#[case::rpn_7bit(MidiEvent::Rpn { channel: 0, function: 0, value: 2 })]
#[case::nrpn_14bit(MidiEvent::Nrpn { channel: 4, function: 0x1234, value: 0x2000 })]
fn events_survive_an_encode_decode_pass(#[case] event: MidiEvent) {
    let packets = encode_event(&event, 10, 20).expect("event should encode");
    let decoded = decode_all(&packets);

    let expected = match &event {
        MidiEvent::Rpn { channel, function, .. } => vec![
            MidiEvent::ControlChange { channel: *channel, function: 101, value: (function >> 7) as u8 },
            MidiEvent::ControlChange { channel: *channel, function: 100, value: (function & 0x7F) as u8 },
            event.clone(),
        ],
        MidiEvent::Nrpn { channel, function, value } => vec![
            MidiEvent::ControlChange { channel: *channel, function: 99, value: (function >> 7) as u8 },
            MidiEvent::ControlChange { channel: *channel, function: 98, value: (function & 0x7F) as u8 },
            MidiEvent::Nrpn { channel: *channel, function: *function, value: value >> 7 },
            event.clone(),
        ],
        _ => vec![event.clone()],
    };
    assert_eq!(expected, decoded);
}

#[test]
fn note_on_at_ten_milliseconds_matches_the_wire_format() {
    let event = MidiEvent::NoteOn { channel: 0, note: 60, velocity: 100 };

    let packets = encode_event(&event, 10, 20).expect("note on should encode");

    assert_eq!(vec![vec![0x80, 0x8A, 0x90, 0x3C, 0x64]], packets);
    let mut session = DecodeSession::new();
    let decoded = session.decode(&packets[0]);
    assert_eq!(1, decoded.len());
    assert_eq!(10, decoded[0].timestamp);
    assert_eq!(event, decoded[0].event);
}

#[rstest]
fn sysex_reassembles_for_every_payload_size(#[values(5, 6, 7, 11, 20, 23, 64, 514)] max_payload: usize) {
    let data: Vec<u8> = (0..100u8).map(|value| value & 0x7F).collect();
    let event = MidiEvent::SystemExclusive { data };

    let packets = encode_event(&event, 300, max_payload).expect("SysEx should encode");

    assert!(packets.iter().all(|packet| packet.len() <= max_payload));
    assert_eq!(vec![event], decode_all(&packets));
}

#[test]
fn sysex_split_at_any_byte_reassembles() {
    let data = vec![0x7E, 0x7F, 0x09, 0x01, 0x10, 0x20, 0x30];
    let mut stream = vec![0xF0];
    stream.extend_from_slice(&data);

    for split in 1..=stream.len() {
        let mut first = vec![0x80, 0x80];
        first.extend_from_slice(&stream[..split]);
        let mut second = vec![0x80];
        second.extend_from_slice(&stream[split..]);
        second.extend_from_slice(&[0x81, 0xF7]);

        assert_eq!(
            vec![MidiEvent::SystemExclusive { data: data.clone() }],
            decode_all(&[first, second]),
            "split after {split} byte(s)"
        );
    }
}

#[rstest]
#[case::empty(vec![])]
#[case::single_byte(vec![0x42])]
#[case::identity_request(vec![0x7E, 0x7F, 0x06, 0x01])]
fn sysex_sent_one_byte_per_packet_reassembles(#[case] data: Vec<u8>) {
    let mut packets = vec![vec![0x80, 0x80, 0xF0]];
    packets.extend(data.iter().map(|&byte| vec![0x80, byte]));
    packets.push(vec![0x80, 0x80, 0xF7]);

    assert_eq!(
        vec![MidiEvent::SystemExclusive { data }],
        decode_all(&packets)
    );
}

#[test]
fn running_status_carries_across_packets() {
    let decoded = decode_all(&[
        vec![0x80, 0x8A, 0x90, 0x3C, 0x64],
        vec![0x80, 0x8B, 0x3E, 0x64, 0x40, 0x00],
    ]);

    assert_eq!(
        vec![
            MidiEvent::NoteOn { channel: 0, note: 0x3C, velocity: 0x64 },
            MidiEvent::NoteOn { channel: 0, note: 0x3E, velocity: 0x64 },
            MidiEvent::NoteOn { channel: 0, note: 0x40, velocity: 0x00 },
        ],
        decoded
    );
}

#[test]
fn real_time_bytes_interleave_without_breaking_running_status() {
    let decoded = decode_all(&[vec![0x80, 0x80, 0xB0, 0x07, 0x10, 0x81, 0xF8, 0x82, 0x07, 0x20]]);

    assert_eq!(
        vec![
            MidiEvent::ControlChange { channel: 0, function: 7, value: 0x10 },
            MidiEvent::TimingClock,
            MidiEvent::ControlChange { channel: 0, function: 7, value: 0x20 },
        ],
        decoded
    );
}

#[test]
fn timestamp_low_part_wrapping_bumps_the_high_part() {
    let mut session = DecodeSession::new();

    let decoded = session.decode(&[0x81, 0xFF, 0xF8, 0x82, 0xF8]);

    assert_eq!(vec![255, 258], decoded.iter().map(|message| message.timestamp).collect::<Vec<_>>());
}

#[rstest]
#[case::missing_header(vec![0x0A, 0x8A, 0x90, 0x3C, 0x64])]
#[case::empty(vec![])]
#[case::truncated(vec![0x80, 0x8A, 0x90, 0x3C])]
fn malformed_packets_decode_to_nothing(#[case] packet: Vec<u8>) {
    assert_eq!(Vec::<MidiEvent>::new(), decode_all(&[packet]));
}

#[test]
fn encode_session_reports_the_last_timestamp() {
    let mut session = EncodeSession::new();

    session
        .encode_at(&MidiEvent::Start, 8200, 20)
        .expect("start should encode");

    assert_eq!(Some(8), session.last_timestamp());
}

#[rstest]
#[case::tiny_payload(MidiEvent::Start, 4)]
#[case::bad_channel(MidiEvent::NoteOn { channel: 16, note: 1, velocity: 1 }, 20)]
fn invalid_requests_are_rejected(#[case] event: MidiEvent, #[case] max_payload: usize) {
    assert_matches!(
        encode_event(&event, 0, max_payload),
        Err(PacketCodecError::MaxPayloadTooSmall { .. } | PacketCodecError::InvalidChannel { .. })
    );
}
