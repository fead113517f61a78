use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::endpoint::{EndpointDirection, EndpointInfo, MidiInputEndpoint, MidiOutputEndpoint};

use super::painter::Painter;
use super::table::Table;

/// Endpoints a scan left attached, as printed and serialised by `scan`.
#[derive(Debug, Serialize)]
pub(crate) struct EndpointListing {
    inputs: Vec<EndpointInfo>,
    outputs: Vec<OutputRow>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    #[serde(flatten)]
    info: EndpointInfo,
    max_payload: usize,
}

impl EndpointListing {
    pub(crate) fn new(inputs: &[MidiInputEndpoint], outputs: &[MidiOutputEndpoint]) -> Self {
        Self {
            inputs: inputs.iter().map(|input| input.info().clone()).collect(),
            outputs: outputs
                .iter()
                .map(|output| OutputRow {
                    info: output.info().clone(),
                    max_payload: output.max_payload(),
                })
                .collect(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

/// Renders an [`EndpointListing`] as a table.
pub(crate) struct EndpointListingView<'a> {
    listing: &'a EndpointListing,
    painter: &'a Painter,
}

impl<'a> EndpointListingView<'a> {
    pub(crate) fn new(listing: &'a EndpointListing, painter: &'a Painter) -> Self {
        Self { listing, painter }
    }
}

impl Display for EndpointListingView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.painter.heading("MIDI endpoints:"))?;
        if self.listing.is_empty() {
            return write!(f, "\n{}", self.painter.outcome(false, "no BLE-MIDI devices found"));
        }

        let inputs = self.listing.inputs.iter().map(|info| {
            vec![
                self.painter.direction(EndpointDirection::Input),
                self.painter.name(info.name()),
                info.identity().to_string(),
                self.painter.detail("-"),
            ]
        });
        let outputs = self.listing.outputs.iter().map(|row| {
            vec![
                self.painter.direction(EndpointDirection::Output),
                self.painter.name(row.info.name()),
                row.info.identity().to_string(),
                row.max_payload.to_string(),
            ]
        });
        let table = Table::new(["direction", "name", "identity", "max_payload"])
            .numeric_column(3)
            .rows(inputs.chain(outputs));
        write!(f, "\n{table}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_listing_warns() {
        let listing = EndpointListing::new(&[], &[]);
        let painter = Painter::new(false);

        assert_eq!(
            "MIDI endpoints:\nno BLE-MIDI devices found",
            EndpointListingView::new(&listing, &painter).to_string()
        );
    }

    #[test]
    fn listing_serialises_outputs_with_payload_size() {
        let input = MidiInputEndpoint::new("AA:BB".into(), "Keys".to_string());
        let (sender, _receiver) = tokio::sync::mpsc::unbounded_channel();
        let output = MidiOutputEndpoint::new("AA:BB".into(), "Keys".to_string(), 20, sender);

        let listing = EndpointListing::new(&[input], &[output]);
        let json = serde_json::to_value(&listing).expect("listing should serialise");

        assert_eq!(
            serde_json::json!({
                "inputs": [{ "identity": "AA:BB", "name": "Keys" }],
                "outputs": [{ "identity": "AA:BB", "name": "Keys", "max_payload": 20 }],
            }),
            json
        );
    }

    #[test]
    fn table_lists_each_direction() {
        let input = MidiInputEndpoint::new("AA:BB".into(), "Keys".to_string());
        let (sender, _receiver) = tokio::sync::mpsc::unbounded_channel();
        let output = MidiOutputEndpoint::new("CC:DD".into(), "Pads".to_string(), 514, sender);
        let listing = EndpointListing::new(&[input], &[output]);
        let painter = Painter::new(false);

        let rendered = EndpointListingView::new(&listing, &painter).to_string();

        assert!(rendered.starts_with("MIDI endpoints:\n"));
        assert!(rendered.contains("│ input "));
        assert!(rendered.contains("│ Keys "));
        assert!(rendered.contains("│ CC:DD "));
        assert!(rendered.contains(" 514 │"));
    }
}
