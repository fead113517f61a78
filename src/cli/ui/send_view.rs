use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::endpoint::EndpointInfo;

use super::painter::Painter;
use super::table::Table;

/// Outcome of a `send` run.
#[derive(Debug, Serialize)]
pub(crate) struct SendReport {
    pub(crate) target: EndpointInfo,
    pub(crate) max_payload: usize,
    pub(crate) sent_messages: usize,
}

/// Renders a [`SendReport`].
pub(crate) struct SendReportView<'a> {
    report: &'a SendReport,
    painter: &'a Painter,
}

impl<'a> SendReportView<'a> {
    pub(crate) fn new(report: &'a SendReport, painter: &'a Painter) -> Self {
        Self { report, painter }
    }
}

impl Display for SendReportView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            vec![
                ("name", self.painter.name(self.report.target.name())),
                ("identity", self.report.target.identity().to_string()),
                ("max_payload", self.report.max_payload.to_string()),
                (
                    "sent",
                    self.painter
                        .outcome(true, format!("{} message(s)", self.report.sent_messages)),
                ),
            ],
        );
        write!(f, "{}\n{table}", self.painter.heading("Sent MIDI:"))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn report() -> SendReport {
        SendReport {
            target: EndpointInfo::new("AA:BB".into(), "Keys".to_string()),
            max_payload: 514,
            sent_messages: 3,
        }
    }

    #[test]
    fn report_serialises_target_and_count() {
        let json = serde_json::to_value(report()).expect("report should serialise");

        assert_eq!(
            serde_json::json!({
                "target": { "identity": "AA:BB", "name": "Keys" },
                "max_payload": 514,
                "sent_messages": 3,
            }),
            json
        );
    }

    #[test]
    fn view_lists_target_and_count() {
        let painter = Painter::new(false);
        let rendered = SendReportView::new(&report(), &painter).to_string();

        assert!(rendered.starts_with("Sent MIDI:\n"));
        assert!(rendered.contains("3 message(s)"));
        assert!(rendered.contains("AA:BB"));
    }
}
