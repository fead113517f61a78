use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use tracing::instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::app::Backend;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::provider::CentralProvider;
use crate::terminal::TerminalClient;

use super::command::{OutputFormat, parse_duration};
use super::ui::{EndpointListing, EndpointListingView, Painter};

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// How long to scan for (e.g. `5s`, `500ms`).
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    timeout: Duration,
    /// Only connect to remotes whose advertised name starts with this.
    #[arg(long)]
    name_prefix: Option<String>,
}

impl ScanArgs {
    /// Creates scan arguments.
    #[must_use]
    pub fn new(timeout: Duration, name_prefix: Option<String>) -> Self {
        Self {
            timeout,
            name_prefix,
        }
    }
}

/// Executes the `scan` command.
pub(crate) async fn run<W>(
    backend: &Backend,
    args: &ScanArgs,
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

    if let Err(error) = scan_for(&provider, args.timeout).await {
        provider.terminate().await?;
        return Err(error.into());
    }
    let listing = EndpointListing::new(&provider.inputs(), &provider.outputs());
    provider.terminate().await?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", EndpointListingView::new(&listing, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &listing)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[instrument(
    skip(provider),
    level = "info",
    fields(timeout = %humantime::format_duration(timeout))
)]
async fn scan_for(provider: &CentralProvider, timeout: Duration) -> Result<(), ProviderError> {
    let span = tracing::Span::current();
    span.pb_set_message("Scanning for BLE-MIDI devices");
    span.pb_set_finish_message(&format!("{} Scan finished", "✓".green()));

    provider.start_scan(Some(timeout)).await?;
    tokio::time::sleep(timeout).await;
    provider.stop_scan().await
}
