use owo_colors::{OwoColorize, Style};

use crate::codec::MidiEvent;
use crate::endpoint::EndpointDirection;

/// Terminal styling for BLE-MIDI output.
///
/// With colour off every method returns its text unchanged, so views can be
/// asserted on as plain strings.
#[derive(Debug)]
pub(crate) struct Painter {
    colour: bool,
}

impl Painter {
    pub(crate) fn new(colour: bool) -> Self {
        Self { colour }
    }

    pub(crate) fn heading(&self, text: impl AsRef<str>) -> String {
        self.paint(text.as_ref(), Style::new().bold().cyan())
    }

    /// Device and endpoint names.
    pub(crate) fn name(&self, text: impl AsRef<str>) -> String {
        self.paint(text.as_ref(), Style::new().bold())
    }

    /// Identities, indices, timestamps and raw bytes.
    pub(crate) fn detail(&self, text: impl AsRef<str>) -> String {
        self.paint(text.as_ref(), Style::new().dimmed())
    }

    /// Finished as asked when `ok`, cut short or empty otherwise.
    pub(crate) fn outcome(&self, ok: bool, text: impl AsRef<str>) -> String {
        let style = if ok {
            Style::new().bold().green()
        } else {
            Style::new().bold().yellow()
        };
        self.paint(text.as_ref(), style)
    }

    pub(crate) fn direction(&self, direction: EndpointDirection) -> String {
        self.paint(&direction.to_string(), direction_style(direction))
    }

    /// `+ input` on attach, `- input` on detach.
    pub(crate) fn attach_change(&self, attached: bool, direction: EndpointDirection) -> String {
        let sign = if attached { "+" } else { "-" };
        self.outcome(attached, format!("{sign} {direction}"))
    }

    /// Real-time traffic recedes so note and controller data stand out.
    pub(crate) fn event(&self, event: &MidiEvent) -> String {
        let style = match event {
            event if event.is_real_time() => Style::new().dimmed(),
            MidiEvent::SystemExclusive { .. } => Style::new().magenta(),
            _ => Style::new().bold(),
        };
        self.paint(&format!("{event:?}"), style)
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.colour {
            text.style(style).to_string()
        } else {
            text.to_string()
        }
    }
}

fn direction_style(direction: EndpointDirection) -> Style {
    match direction {
        EndpointDirection::Input => Style::new().blue(),
        EndpointDirection::Output => Style::new().magenta(),
    }
}
