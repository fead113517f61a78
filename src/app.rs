use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::config::ProviderConfig;
use crate::controller::ConnectionRole;
use crate::error::ProviderError;
use crate::hw::{BtleplugTransport, FakeTransport, FakeTransportConfig, RemoteIdentity};
use crate::provider::{CentralProvider, PeripheralProvider};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Where command runs get their BLE transport from.
#[derive(Debug)]
pub enum Backend {
    /// The host's first Bluetooth adapter.
    Host,
    /// Scripted remotes driven by the fake transport.
    Fake(FakeArgs),
}

impl Backend {
    /// Picks the fake backend when fake settings were parsed.
    ///
    /// ```
    /// let backend = blemidi::Backend::from_fake_args(None);
    /// assert!(matches!(backend, blemidi::Backend::Host));
    /// ```
    #[must_use]
    pub fn from_fake_args(fake_args: Option<FakeArgs>) -> Self {
        fake_args.map_or(Self::Host, Self::Fake)
    }

    pub(crate) async fn central(
        &self,
        config: ProviderConfig,
    ) -> Result<CentralProvider, ProviderError> {
        match self {
            Self::Host => CentralProvider::with_host_adapter(config).await,
            Self::Fake(fake_args) => {
                CentralProvider::new(Arc::new(fake_transport(fake_args)), config)
            }
        }
    }

    pub(crate) async fn peripheral(
        &self,
        config: ProviderConfig,
    ) -> Result<(PeripheralProvider, SimulatedCentrals), ProviderError> {
        match self {
            Self::Host => {
                let transport =
                    BtleplugTransport::new()
                        .await
                        .map_err(|source| ProviderError::Unsupported {
                            role: ConnectionRole::Peripheral,
                            source,
                        })?;
                let provider = PeripheralProvider::new(Arc::new(transport), config)?;
                Ok((provider, SimulatedCentrals::default()))
            }
            Self::Fake(fake_args) => {
                let transport = Arc::new(fake_transport(fake_args));
                let provider = PeripheralProvider::new(transport.clone(), config)?;
                let identities = fake_args
                    .remotes()
                    .iter()
                    .map(|remote| remote.identity().clone())
                    .collect();
                Ok((
                    provider,
                    SimulatedCentrals {
                        transport: Some(transport),
                        identities,
                    },
                ))
            }
        }
    }
}

/// Fake remotes that connect to an advertising peripheral once it is up.
#[derive(Debug, Default)]
pub(crate) struct SimulatedCentrals {
    transport: Option<Arc<FakeTransport>>,
    identities: Vec<RemoteIdentity>,
}

impl SimulatedCentrals {
    /// Has every fake remote connect in as a central. No-op on real hardware.
    pub(crate) fn connect(&self) {
        let Some(transport) = &self.transport else {
            return;
        };
        for identity in &self.identities {
            if let Err(error) = transport.accept_incoming(identity) {
                debug!(%identity, %error, "simulated central could not connect");
            }
        }
    }
}

fn fake_transport(fake_args: &FakeArgs) -> FakeTransport {
    FakeTransport::new(
        FakeTransportConfig::builder()
            .remotes(fake_args.remotes())
            .discovery_delay(fake_args.discovery_delay())
            .build(),
    )
}

/// Runs the CLI command, choosing the output format from the terminal.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = blemidi::Args::try_parse_from([
///     "blemidi",
///     "--fake",
///     "--fake-scan",
///     "AA:BB|Keys|-43",
///     "scan",
///     "--timeout",
///     "50ms",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args();
/// let mut out = Vec::new();
/// blemidi::run(command, &mut out, blemidi::Backend::from_fake_args(maybe_fake_args)).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run<W>(command: Command, out: &mut W, backend: Backend) -> Result<()>
where
    W: io::Write,
{
    let output_format = default_output_format(&SystemTerminalClient);
    run_with_log_level(command, out, backend, None, output_format).await
}

/// Runs the CLI command with an explicit telemetry log-level override.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = blemidi::Args::try_parse_from([
///     "blemidi",
///     "--log-level",
///     "debug",
///     "--fake",
///     "--fake-scan",
///     "AA:BB|Keys|-43",
///     "scan",
///     "--timeout",
///     "50ms",
/// ])?;
/// let log_level = args.log_level();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args();
/// let mut out = Vec::new();
/// blemidi::run_with_log_level(
///     command,
///     &mut out,
///     blemidi::Backend::from_fake_args(maybe_fake_args),
///     log_level,
///     blemidi::OutputFormat::Json,
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    backend: Backend,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(
        command,
        out,
        &SystemTerminalClient,
        backend,
        log_level,
        output_format,
    )
    .await
}

/// Runs the CLI command with an injected terminal client.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: Backend,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, out, terminal_client, backend, None, output_format)
        .await
}

/// Runs the CLI command with injected clients and explicit telemetry settings.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl blemidi::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = blemidi::Args::try_parse_from([
///     "blemidi",
///     "--log-level",
///     "trace",
///     "--fake",
///     "--fake-scan",
///     "AA:BB|Keys|-43",
///     "--fake-notifications",
///     "80809C3C64",
///     "listen",
///     "--max-messages",
///     "1",
/// ])?;
/// let log_level = args.log_level();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args();
/// let mut out = Vec::new();
/// blemidi::run_with_clients_and_log_level(
///     command,
///     &mut out,
///     &FakeTerminal,
///     blemidi::Backend::from_fake_args(maybe_fake_args),
///     log_level,
///     blemidi::OutputFormat::Pretty,
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
#[instrument(
    skip(out, terminal_client, backend),
    level = "info",
    fields(command = %command.name(), ?log_level, ?output_format)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: Backend,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "blemidi",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    match command {
        Command::Scan(args) => {
            crate::cli::scan::run(&backend, &args, out, terminal_client, output_format).await
        }
        Command::Listen(args) => {
            crate::cli::listen::run(&backend, &args, out, terminal_client, output_format).await
        }
        Command::Send(args) => {
            crate::cli::send::run(&backend, &args, out, terminal_client, output_format).await
        }
        Command::Advertise(args) => {
            crate::cli::listen::advertise(&backend, &args, out, terminal_client, output_format)
                .await
        }
    }
}

/// `pretty` on a terminal, `json` when piped.
#[must_use]
pub fn default_output_format(terminal_client: &dyn TerminalClient) -> OutputFormat {
    if terminal_client.stdout_is_terminal() {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    }
}
