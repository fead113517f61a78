use std::fmt::{self, Display, Formatter};

use crate::cli::listen::{ListenStopReason, ListenSummary};
use crate::endpoint::ReceivedMidiMessage;
use crate::registry::AttachEvent;
use crate::utils::format_hex;

use super::painter::Painter;

/// Renders one received MIDI message as a line.
pub(crate) struct MidiMessageView<'a> {
    index: usize,
    message: &'a ReceivedMidiMessage,
    painter: &'a Painter,
}

impl<'a> MidiMessageView<'a> {
    pub(crate) fn new(index: usize, message: &'a ReceivedMidiMessage, painter: &'a Painter) -> Self {
        Self {
            index,
            message,
            painter,
        }
    }
}

impl Display for MidiMessageView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let event = &self.message.message.event;
        write!(
            f,
            "{} {} {} {} {}",
            self.painter.detail(format!("[{:04}]", self.index)),
            self.message.source,
            self.painter.detail(format!("t={}ms", self.message.message.timestamp)),
            self.painter.event(event),
            self.painter.detail(format!("raw={}", format_hex(&event.to_bytes()))),
        )
    }
}

/// Renders an endpoint attach or detach notice.
pub(crate) struct AttachEventView<'a> {
    event: &'a AttachEvent,
    painter: &'a Painter,
}

impl<'a> AttachEventView<'a> {
    pub(crate) fn new(event: &'a AttachEvent, painter: &'a Painter) -> Self {
        Self { event, painter }
    }
}

impl Display for AttachEventView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let info = self.event.info();
        write!(
            f,
            "{} {} {}",
            self.painter
                .attach_change(self.event.is_attached(), self.event.direction()),
            self.painter.name(info.name()),
            self.painter.detail(format!("({})", info.identity()))
        )
    }
}

/// Renders the listen session summary.
pub(crate) struct ListenSummaryView<'a> {
    summary: &'a ListenSummary,
    painter: &'a Painter,
}

impl<'a> ListenSummaryView<'a> {
    pub(crate) fn new(summary: &'a ListenSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for ListenSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let reached_limit = matches!(self.summary.stop_reason, ListenStopReason::ReachedLimit(_));
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Stopped:"),
            self.painter
                .outcome(reached_limit, self.summary.stop_reason.to_string()),
            self.painter.name(format!(
                "- received {} MIDI message(s) from {} device(s)",
                self.summary.received_messages, self.summary.devices
            ))
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::codec::{DecodedMessage, MidiEvent};
    use crate::endpoint::{MidiInputEndpoint, MidiOutputEndpoint};

    use super::*;

    #[test]
    fn message_line_shows_source_timestamp_and_raw_bytes() {
        let painter = Painter::new(false);
        let message = ReceivedMidiMessage {
            source: "AA:BB".into(),
            message: DecodedMessage::new(
                10,
                MidiEvent::NoteOn {
                    channel: 0,
                    note: 60,
                    velocity: 100,
                },
            ),
        };

        assert_eq!(
            "[0007] AA:BB t=10ms NoteOn { channel: 0, note: 60, velocity: 100 } raw=90 3C 64",
            MidiMessageView::new(7, &message, &painter).to_string()
        );
    }

    fn keys_input() -> MidiInputEndpoint {
        MidiInputEndpoint::new("AA:BB".into(), "Keys".to_string())
    }

    fn keys_output() -> MidiOutputEndpoint {
        let (sender, _receiver) = tokio::sync::mpsc::unbounded_channel();
        MidiOutputEndpoint::new("AA:BB".into(), "Keys".to_string(), 20, sender)
    }

    #[rstest]
    #[case::input_attached(AttachEvent::InputAttached(keys_input()), "+ input Keys (AA:BB)")]
    #[case::output_detached(AttachEvent::OutputDetached(keys_output()), "- output Keys (AA:BB)")]
    fn attach_notice_names_the_endpoint(#[case] event: AttachEvent, #[case] expected: &str) {
        let painter = Painter::new(false);

        assert_eq!(expected, AttachEventView::new(&event, &painter).to_string());
    }

    #[rstest]
    #[case::reached_limit(
        ListenStopReason::ReachedLimit(2),
        "Stopped: reached limit of 2 message(s) - received 2 MIDI message(s) from 1 device(s)"
    )]
    #[case::interrupted(
        ListenStopReason::Interrupted,
        "Stopped: interrupted - received 2 MIDI message(s) from 1 device(s)"
    )]
    fn summary_renders_stop_reason(#[case] stop_reason: ListenStopReason, #[case] expected: &str) {
        let summary = ListenSummary {
            received_messages: 2,
            devices: 1,
            stop_reason,
        };
        let painter = Painter::new(false);

        assert_eq!(expected, ListenSummaryView::new(&summary, &painter).to_string());
    }
}
