use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info};

use crate::app::Backend;
use crate::config::ProviderConfig;
use crate::endpoint::MidiOutputEndpoint;
use crate::error::CommandError;
use crate::provider::CentralProvider;
use crate::registry::AttachEvent;
use crate::terminal::TerminalClient;

use super::command::{MidiMessageArg, OutputFormat, parse_duration};
use super::ui::{Painter, SendReport, SendReportView, Spinner};

/// Arguments for the `send` command.
#[derive(Debug, Args)]
pub struct SendArgs {
    /// MIDI messages as comma-separated hexadecimal (e.g. `903C64,803C00`).
    #[arg(long = "message", required = true, value_delimiter = ',')]
    messages: Vec<MidiMessageArg>,
    /// Pause between consecutive messages (e.g. `100ms`).
    #[arg(long, default_value = "0ms", value_parser = parse_duration)]
    interval: Duration,
    /// Give up when no MIDI output attaches within this time.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    timeout: Duration,
    /// Only connect to remotes whose advertised name starts with this.
    #[arg(long)]
    name_prefix: Option<String>,
}

impl SendArgs {
    /// Creates send arguments with no pause between messages.
    #[must_use]
    pub fn new(messages: Vec<MidiMessageArg>, timeout: Duration) -> Self {
        Self {
            messages,
            interval: Duration::ZERO,
            timeout,
            name_prefix: None,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Executes the `send` command.
pub(crate) async fn run<W>(
    backend: &Backend,
    args: &SendArgs,
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
    let (sender, attachments) = mpsc::unbounded_channel();
    provider.set_attach_listener(Some(Arc::new(sender)));

    let spinner = Spinner::new(terminal_client.stderr_is_terminal());
    let result = spinner
        .wait_on(
            "Waiting for a BLE-MIDI output",
            send_to_first_output(&provider, attachments, args),
        )
        .await;
    provider.terminate().await?;
    let report = result?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", SendReportView::new(&report, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &report)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

async fn send_to_first_output(
    provider: &CentralProvider,
    attachments: UnboundedReceiver<AttachEvent>,
    args: &SendArgs,
) -> Result<SendReport> {
    provider.start_scan(Some(args.timeout)).await?;
    let output = wait_for_output(attachments, args.timeout).await?;
    provider.stop_scan().await?;
    info!(identity = %output.identity(), "sending to first attached output");

    for (index, message) in args.messages.iter().enumerate() {
        if index > 0 && !args.interval.is_zero() {
            tokio::time::sleep(args.interval).await;
        }
        output.send(message.event())?;
        debug!(event = ?message.event(), "queued MIDI message");
    }

    Ok(SendReport {
        target: output.info().clone(),
        max_payload: output.max_payload(),
        sent_messages: args.messages.len(),
    })
}

async fn wait_for_output(
    mut attachments: UnboundedReceiver<AttachEvent>,
    timeout: Duration,
) -> Result<MidiOutputEndpoint, CommandError> {
    let first_output = async {
        while let Some(event) = attachments.recv().await {
            if let AttachEvent::OutputAttached(output) = event {
                return Some(output);
            }
        }
        None
    };
    match tokio::time::timeout(timeout, first_output).await {
        Ok(Some(output)) => Ok(output),
        Ok(None) | Err(_) => Err(CommandError::NoOutputAttached {
            waited: humantime::format_duration(timeout).to_string(),
        }),
    }
}
