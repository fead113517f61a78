use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_with::SerializeDisplay;
use strum_macros::Display;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use crate::codec::{DecodeSession, DecodedMessage, EncodeSession, MidiEvent, PacketCodecError};
use crate::hw::RemoteIdentity;
use crate::utils::format_hex;

/// Which way MIDI flows through an endpoint, seen from this host.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, SerializeDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum EndpointDirection {
    /// The remote sends, we receive.
    Input,
    /// We send, the remote receives.
    Output,
}

/// Identity and display name shared by both endpoint directions.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct EndpointInfo {
    identity: RemoteIdentity,
    name: String,
}

impl EndpointInfo {
    pub(crate) fn new(identity: RemoteIdentity, name: String) -> Self {
        Self { identity, name }
    }

    #[must_use]
    pub fn identity(&self) -> &RemoteIdentity {
        &self.identity
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One decoded message attributed to the endpoint that received it.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ReceivedMidiMessage {
    pub source: RemoteIdentity,
    #[serde(flatten)]
    pub message: DecodedMessage,
}

/// Sink for messages arriving on an input endpoint.
///
/// Called from the connection task, never while endpoint state is locked, so
/// implementations may call back into the endpoint or its provider.
pub trait MidiInputListener: Send + Sync {
    fn on_midi_message(&self, message: ReceivedMidiMessage);
}

impl<F> MidiInputListener for F
where
    F: Fn(ReceivedMidiMessage) + Send + Sync,
{
    fn on_midi_message(&self, message: ReceivedMidiMessage) {
        self(message);
    }
}

impl MidiInputListener for UnboundedSender<ReceivedMidiMessage> {
    fn on_midi_message(&self, message: ReceivedMidiMessage) {
        if self.send(message).is_err() {
            trace!("input listener channel closed; dropping message");
        }
    }
}

struct InputState {
    session: DecodeSession,
    listener: Option<Arc<dyn MidiInputListener>>,
    closed: bool,
}

struct InputInner {
    info: EndpointInfo,
    state: Mutex<InputState>,
}

/// Receiving side of a MIDI connection.
///
/// Clones share one decode session and one listener slot.
#[derive(Clone)]
pub struct MidiInputEndpoint {
    inner: Arc<InputInner>,
}

impl fmt::Debug for MidiInputEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MidiInputEndpoint")
            .field("info", &self.inner.info)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl MidiInputEndpoint {
    pub(crate) fn new(identity: RemoteIdentity, name: String) -> Self {
        Self {
            inner: Arc::new(InputInner {
                info: EndpointInfo::new(identity, name),
                state: Mutex::new(InputState {
                    session: DecodeSession::new(),
                    listener: None,
                    closed: false,
                }),
            }),
        }
    }

    #[must_use]
    pub fn info(&self) -> &EndpointInfo {
        &self.inner.info
    }

    #[must_use]
    pub fn identity(&self) -> &RemoteIdentity {
        self.inner.info.identity()
    }

    /// Replaces the listener; `None` stops delivery. Ignored once closed.
    pub fn set_listener(&self, listener: Option<Arc<dyn MidiInputListener>>) {
        let mut state = self.inner.state.lock();
        if state.closed {
            debug!(identity = %self.identity(), "ignoring listener on closed input endpoint");
            return;
        }
        state.listener = listener;
    }

    #[must_use]
    pub fn has_listener(&self) -> bool {
        self.inner.state.lock().listener.is_some()
    }

    /// Decodes one BLE-MIDI packet and hands its messages to the listener.
    ///
    /// Returns the number of messages decoded. Messages decoded while no
    /// listener is installed are discarded.
    pub fn deliver_packet(&self, packet: &[u8]) -> usize {
        let (messages, listener) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                trace!(identity = %self.identity(), "dropping packet for closed input endpoint");
                return 0;
            }
            let messages = state.session.decode(packet);
            (messages, state.listener.clone())
        };
        trace!(
            identity = %self.identity(),
            packet = %format_hex(packet),
            decoded = messages.len(),
            "input packet decoded"
        );

        let decoded = messages.len();
        if let Some(listener) = listener {
            for message in messages {
                listener.on_midi_message(ReceivedMidiMessage {
                    source: self.identity().clone(),
                    message,
                });
            }
        }
        decoded
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Clears the listener and decode state; later calls are no-ops.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.listener = None;
        state.session.reset();
        true
    }
}

struct OutputState {
    session: EncodeSession,
    max_payload: usize,
    closed: bool,
}

struct OutputInner {
    info: EndpointInfo,
    state: Mutex<OutputState>,
    outgoing: UnboundedSender<Vec<u8>>,
}

/// Sending side of a MIDI connection.
///
/// Packets are queued to the owning connection, which writes them in order.
/// Delivery is best-effort: once the link is gone, sends are dropped silently.
#[derive(Clone)]
pub struct MidiOutputEndpoint {
    inner: Arc<OutputInner>,
}

impl fmt::Debug for MidiOutputEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MidiOutputEndpoint")
            .field("info", &self.inner.info)
            .field("max_payload", &self.max_payload())
            .finish_non_exhaustive()
    }
}

impl MidiOutputEndpoint {
    pub(crate) fn new(
        identity: RemoteIdentity,
        name: String,
        max_payload: usize,
        outgoing: UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self {
            inner: Arc::new(OutputInner {
                info: EndpointInfo::new(identity, name),
                state: Mutex::new(OutputState {
                    session: EncodeSession::new(),
                    max_payload,
                    closed: false,
                }),
                outgoing,
            }),
        }
    }

    #[must_use]
    pub fn info(&self) -> &EndpointInfo {
        &self.inner.info
    }

    #[must_use]
    pub fn identity(&self) -> &RemoteIdentity {
        self.inner.info.identity()
    }

    /// Largest BLE-MIDI packet the link currently carries.
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.inner.state.lock().max_payload
    }

    pub(crate) fn set_max_payload(&self, max_payload: usize) {
        self.inner.state.lock().max_payload = max_payload;
    }

    /// Sends `event` stamped with the endpoint clock.
    ///
    /// # Errors
    ///
    /// Returns an error only when the event cannot be encoded; transport
    /// failures are absorbed.
    pub fn send(&self, event: &MidiEvent) -> Result<(), PacketCodecError> {
        self.send_with(event, |session, max_payload| session.encode(event, max_payload))
    }

    /// Sends `event` with an explicit millisecond timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error only when the event cannot be encoded.
    pub fn send_at(&self, event: &MidiEvent, timestamp_ms: u64) -> Result<(), PacketCodecError> {
        self.send_with(event, |session, max_payload| {
            session.encode_at(event, timestamp_ms, max_payload)
        })
    }

    fn send_with<F>(&self, event: &MidiEvent, encode: F) -> Result<(), PacketCodecError>
    where
        F: FnOnce(&mut EncodeSession, usize) -> Result<Vec<Vec<u8>>, PacketCodecError>,
    {
        let mut state = self.inner.state.lock();
        if state.closed {
            debug!(identity = %self.identity(), ?event, "dropping send on closed output endpoint");
            return Ok(());
        }
        let max_payload = state.max_payload;
        let packets = encode(&mut state.session, max_payload)?;
        for packet in packets {
            trace!(identity = %self.identity(), packet = %format_hex(&packet), "queueing output packet");
            if self.inner.outgoing.send(packet).is_err() {
                debug!(identity = %self.identity(), "connection is gone; dropping output packet");
                break;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub(crate) fn close(&self) -> bool {
        let mut state = self.inner.state.lock();
        !std::mem::replace(&mut state.closed, true)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    use super::*;

    fn input() -> MidiInputEndpoint {
        MidiInputEndpoint::new("AA:BB".into(), "Keys".to_string())
    }

    #[test]
    fn delivered_packets_reach_the_listener_with_source() {
        let endpoint = input();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        endpoint.set_listener(Some(Arc::new(sender)));

        assert_eq!(1, endpoint.deliver_packet(&[0x80, 0x8A, 0x90, 60, 100]));

        let received = receiver.try_recv().expect("listener should receive the note");
        assert_eq!(RemoteIdentity::from("AA:BB"), received.source);
        assert_eq!(
            MidiEvent::NoteOn { channel: 0, note: 60, velocity: 100 },
            received.message.event
        );
    }

    #[test]
    fn closures_are_listeners() {
        let endpoint = input();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        endpoint.set_listener(Some(Arc::new(move |message: ReceivedMidiMessage| {
            sink.lock().push(message.message.event);
        })));

        endpoint.deliver_packet(&[0x80, 0x80, 0xF8, 0x80, 0xFC]);

        assert_eq!(vec![MidiEvent::TimingClock, MidiEvent::Stop], *seen.lock());
    }

    #[test]
    fn listener_may_be_replaced_from_inside_a_callback() {
        let endpoint = input();
        let reentrant = endpoint.clone();
        endpoint.set_listener(Some(Arc::new(move |_message: ReceivedMidiMessage| {
            reentrant.set_listener(None);
        })));

        endpoint.deliver_packet(&[0x80, 0x80, 0xF8]);

        assert!(!endpoint.has_listener());
    }

    #[test]
    fn closed_input_drops_packets_and_refuses_listeners() {
        let endpoint = input();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        endpoint.set_listener(Some(Arc::new(sender.clone())));

        assert!(endpoint.close());
        assert!(!endpoint.close());
        endpoint.set_listener(Some(Arc::new(sender)));

        assert_eq!(0, endpoint.deliver_packet(&[0x80, 0x80, 0xF8]));
        assert!(receiver.try_recv().is_err());
        assert!(!endpoint.has_listener());
    }

    #[test]
    fn output_queues_encoded_packets_in_order() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let endpoint = MidiOutputEndpoint::new("AA:BB".into(), "Keys".to_string(), 5, sender);

        endpoint
            .send_at(&MidiEvent::Rpn { channel: 0, function: 0, value: 2 }, 0)
            .expect("rpn should encode");

        let mut packets = Vec::new();
        while let Ok(packet) = receiver.try_recv() {
            packets.push(packet);
        }
        assert_eq!(
            vec![
                vec![0x80, 0x80, 0xB0, 101, 0],
                vec![0x80, 0x80, 0xB0, 100, 0],
                vec![0x80, 0x80, 0xB0, 6, 2],
            ],
            packets
        );
    }

    #[test]
    fn output_reports_codec_errors_but_absorbs_closed_links() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let endpoint = MidiOutputEndpoint::new("AA:BB".into(), "Keys".to_string(), 20, sender);

        assert!(
            endpoint
                .send(&MidiEvent::NoteOn { channel: 16, note: 0, velocity: 0 })
                .is_err()
        );

        drop(receiver);
        assert_eq!(Ok(()), endpoint.send(&MidiEvent::Start));

        endpoint.close();
        assert_eq!(
            Ok(()),
            endpoint.send(&MidiEvent::NoteOn { channel: 16, note: 0, velocity: 0 })
        );
    }
}
