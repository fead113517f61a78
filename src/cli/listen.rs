use std::collections::HashSet;
use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use derive_more::Display;
use serde::Serialize;
use serde_with::SerializeDisplay;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::app::Backend;
use crate::config::ProviderConfig;
use crate::endpoint::{EndpointInfo, MidiInputEndpoint, MidiOutputEndpoint, ReceivedMidiMessage};
use crate::registry::{AttachEvent, DeviceAttachListener};
use crate::terminal::TerminalClient;

use super::command::OutputFormat;
use super::ui::{AttachEventView, ListenSummaryView, MidiMessageView, Painter};

/// Arguments for the `listen` command.
#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Stop after this many MIDI messages. If omitted, listen until Ctrl+C.
    #[arg(long)]
    max_messages: Option<usize>,
    /// Only connect to remotes whose advertised name starts with this.
    #[arg(long)]
    name_prefix: Option<String>,
}

impl ListenArgs {
    /// Creates listen arguments with an optional message limit.
    #[must_use]
    pub fn new(max_messages: Option<usize>) -> Self {
        Self {
            max_messages,
            name_prefix: None,
        }
    }

    #[must_use]
    pub fn with_name_prefix(mut self, name_prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(name_prefix.into());
        self
    }
}

/// Arguments for the `advertise` command.
#[derive(Debug, Args)]
pub struct AdvertiseArgs {
    /// Stop after this many MIDI messages. If omitted, listen until Ctrl+C.
    #[arg(long)]
    max_messages: Option<usize>,
    /// Local name to advertise.
    #[arg(long, default_value = "blemidi")]
    local_name: String,
}

impl AdvertiseArgs {
    /// Creates advertise arguments.
    #[must_use]
    pub fn new(max_messages: Option<usize>, local_name: impl Into<String>) -> Self {
        Self {
            max_messages,
            local_name: local_name.into(),
        }
    }
}

/// Why a listen session ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, SerializeDisplay)]
pub(crate) enum ListenStopReason {
    #[display("reached limit of {_0} message(s)")]
    ReachedLimit(usize),
    #[display("interrupted")]
    Interrupted,
}

/// Totals printed once a listen session ends.
#[derive(Debug, Serialize)]
pub(crate) struct ListenSummary {
    pub(crate) received_messages: usize,
    pub(crate) devices: usize,
    pub(crate) stop_reason: ListenStopReason,
}

/// Executes the `listen` command.
pub(crate) async fn run<W>(
    backend: &Backend,
    args: &ListenArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let config = ProviderConfig::builder()
        .maybe_name_prefix(args.name_prefix.clone())
        .build();
    let provider = backend.central(config).await?;
    let (relay, mut inbox) = Inbox::new();
    provider.set_attach_listener(Some(relay));

    if let Err(error) = provider.start_scan(None).await {
        provider.terminate().await?;
        return Err(error.into());
    }
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let result = inbox
        .print(args.max_messages, out, &painter, output_format)
        .await;
    provider.terminate().await?;

    write_summary(&result?, out, &painter, output_format)
}

/// Executes the `advertise` command.
pub(crate) async fn advertise<W>(
    backend: &Backend,
    args: &AdvertiseArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let config = ProviderConfig::builder()
        .local_name(args.local_name.clone())
        .build();
    let (provider, simulated_centrals) = backend.peripheral(config).await?;
    let (relay, mut inbox) = Inbox::new();
    provider.set_attach_listener(Some(relay));

    if let Err(error) = provider.start_advertising().await {
        provider.terminate().await?;
        return Err(error.into());
    }
    simulated_centrals.connect();
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let result = inbox
        .print(args.max_messages, out, &painter, output_format)
        .await;
    provider.terminate().await?;

    write_summary(&result?, out, &painter, output_format)
}

fn write_summary<W>(
    summary: &ListenSummary,
    out: &mut W,
    painter: &Painter,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    match output_format {
        OutputFormat::Pretty => {
            writeln!(out)?;
            writeln!(out, "{}", ListenSummaryView::new(summary, painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &serde_json::json!({ "summary": summary }))?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Installs a message listener on every input as it attaches, and forwards
/// attach notices alongside.
struct MessageRelay {
    messages: UnboundedSender<ReceivedMidiMessage>,
    attachments: UnboundedSender<AttachEvent>,
}

impl DeviceAttachListener for MessageRelay {
    fn on_input_attached(&self, endpoint: &MidiInputEndpoint) {
        endpoint.set_listener(Some(Arc::new(self.messages.clone())));
        self.attachments.on_input_attached(endpoint);
    }

    fn on_output_attached(&self, endpoint: &MidiOutputEndpoint) {
        self.attachments.on_output_attached(endpoint);
    }

    fn on_input_detached(&self, endpoint: &MidiInputEndpoint) {
        self.attachments.on_input_detached(endpoint);
    }

    fn on_output_detached(&self, endpoint: &MidiOutputEndpoint) {
        self.attachments.on_output_detached(endpoint);
    }
}

#[derive(Serialize)]
struct AttachNotice<'a> {
    change: &'static str,
    direction: &'static str,
    #[serde(flatten)]
    endpoint: &'a EndpointInfo,
}

impl<'a> From<&'a AttachEvent> for AttachNotice<'a> {
    fn from(event: &'a AttachEvent) -> Self {
        let (change, direction, endpoint) = match event {
            AttachEvent::InputAttached(endpoint) => ("attached", "input", endpoint.info()),
            AttachEvent::OutputAttached(endpoint) => ("attached", "output", endpoint.info()),
            AttachEvent::InputDetached(endpoint) => ("detached", "input", endpoint.info()),
            AttachEvent::OutputDetached(endpoint) => ("detached", "output", endpoint.info()),
        };
        Self {
            change,
            direction,
            endpoint,
        }
    }
}

struct Inbox {
    messages: UnboundedReceiver<ReceivedMidiMessage>,
    attachments: UnboundedReceiver<AttachEvent>,
}

impl Inbox {
    fn new() -> (Arc<dyn DeviceAttachListener>, Self) {
        let (message_sender, messages) = mpsc::unbounded_channel();
        let (attach_sender, attachments) = mpsc::unbounded_channel();
        let relay = MessageRelay {
            messages: message_sender,
            attachments: attach_sender,
        };
        (
            Arc::new(relay),
            Self {
                messages,
                attachments,
            },
        )
    }

    /// Prints messages and attach notices until the limit or Ctrl+C.
    async fn print<W>(
        &mut self,
        max_messages: Option<usize>,
        out: &mut W,
        painter: &Painter,
        output_format: OutputFormat,
    ) -> Result<ListenSummary>
    where
        W: io::Write,
    {
        let mut received_messages = 0;
        let mut devices = HashSet::new();
        let interrupted = tokio::signal::ctrl_c();
        tokio::pin!(interrupted);

        let stop_reason = loop {
            if let Some(limit) = max_messages
                && received_messages >= limit
            {
                break ListenStopReason::ReachedLimit(limit);
            }

            tokio::select! {
                biased;
                signal = &mut interrupted => {
                    signal?;
                    break ListenStopReason::Interrupted;
                }
                Some(event) = self.attachments.recv() => {
                    if let AttachEvent::InputAttached(endpoint) = &event {
                        devices.insert(endpoint.identity().clone());
                    }
                    match output_format {
                        OutputFormat::Pretty => {
                            writeln!(out, "{}", AttachEventView::new(&event, painter))?;
                        }
                        OutputFormat::Json => {
                            serde_json::to_writer(&mut *out, &AttachNotice::from(&event))?;
                            writeln!(out)?;
                        }
                    }
                }
                Some(message) = self.messages.recv() => {
                    received_messages += 1;
                    devices.insert(message.source.clone());
                    match output_format {
                        OutputFormat::Pretty => writeln!(
                            out,
                            "{}",
                            MidiMessageView::new(received_messages, &message, painter)
                        )?,
                        OutputFormat::Json => {
                            serde_json::to_writer(&mut *out, &message)?;
                            writeln!(out)?;
                        }
                    }
                }
            }
        };

        Ok(ListenSummary {
            received_messages,
            devices: devices.len(),
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn inbox_stops_at_the_message_limit() {
        let (relay, mut inbox) = Inbox::new();
        let input = MidiInputEndpoint::new("AA:BB".into(), "Keys".to_string());
        relay.on_input_attached(&input);
        input.deliver_packet(&[0x80, 0x8A, 0x90, 60, 100, 0x8B, 0x80, 60, 0]);
        let mut out = Vec::new();

        let summary = inbox
            .print(Some(2), &mut out, &Painter::new(false), OutputFormat::Json)
            .await
            .expect("inbox should stop at the limit");

        assert_eq!(2, summary.received_messages);
        assert_eq!(1, summary.devices);
        assert_eq!(ListenStopReason::ReachedLimit(2), summary.stop_reason);
        let lines = String::from_utf8(out).expect("output should be utf-8");
        assert_eq!(
            vec![
                r#"{"change":"attached","direction":"input","identity":"AA:BB","name":"Keys"}"#,
                r#"{"source":"AA:BB","timestamp":10,"type":"note_on","channel":0,"note":60,"velocity":100}"#,
                r#"{"source":"AA:BB","timestamp":11,"type":"note_off","channel":0,"note":60,"velocity":0}"#,
            ],
            lines.lines().collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn zero_limit_stops_immediately() {
        let (_relay, mut inbox) = Inbox::new();
        let mut out = Vec::new();

        let summary = inbox
            .print(Some(0), &mut out, &Painter::new(false), OutputFormat::Pretty)
            .await
            .expect("inbox should stop immediately");

        assert_eq!(ListenStopReason::ReachedLimit(0), summary.stop_reason);
        assert!(out.is_empty());
    }

    #[test]
    fn summary_serialises_stop_reason_as_text() {
        let summary = ListenSummary {
            received_messages: 1,
            devices: 1,
            stop_reason: ListenStopReason::Interrupted,
        };

        assert_eq!(
            serde_json::json!({ "received_messages": 1, "devices": 1, "stop_reason": "interrupted" }),
            serde_json::to_value(&summary).expect("summary should serialise")
        );
    }
}
