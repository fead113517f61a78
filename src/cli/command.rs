use std::str::FromStr;
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::listen::{AdvertiseArgs, ListenArgs};
use crate::cli::scan::ScanArgs;
use crate::cli::send::SendArgs;
use crate::codec::MidiEvent;
use crate::error::FixtureError;
use crate::hw::{FakeRemote, NotificationPayloads, ScanFixture, parse_hex};

/// Command-line options for the BLE-MIDI tool.
#[derive(Debug, Parser)]
#[command(name = "blemidi", about = "Exchange MIDI with Bluetooth LE devices.")]
pub struct Args {
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Uses the fake BLE transport with fixture-driven remotes.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake remotes in the form `identity|local_name|rssi;...` (`-` for none).
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Packets every fake remote sends, as comma-separated hexadecimal.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    /// Artificial fake scan delay (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use blemidi::{Args, Command, ListenArgs};
    ///
    /// let listen = Args::new(Command::Listen(ListenArgs::new(Some(10))));
    /// let _ = listen;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            fake: false,
            fake_scan: None,
            fake_notifications: None,
            fake_discovery_delay: None,
            command,
        }
    }

    /// Enables fake transport mode with pre-parsed fixtures.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            notifications,
            discovery_delay,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_notifications = notifications;
        self.fake_discovery_delay = Some(discovery_delay);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Splits parsed CLI arguments into the command and optional fake settings.
    #[must_use]
    pub fn into_command_and_fake_args(self) -> (Command, Option<FakeArgs>) {
        let Args {
            fake,
            fake_scan,
            fake_notifications,
            fake_discovery_delay,
            command,
            ..
        } = self;

        let fake_args = fake_scan.filter(|_| fake).map(|scan_fixture| FakeArgs {
            scan_fixture,
            notifications: fake_notifications,
            discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
        });
        (command, fake_args)
    }
}

/// Fake transport arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationPayloads>,
    #[builder(default)]
    discovery_delay: Duration,
}

impl FakeArgs {
    pub(crate) fn remotes(&self) -> Vec<FakeRemote> {
        let notifications = self.notifications.clone().unwrap_or_default();
        self.scan_fixture.clone().with_notifications(&notifications)
    }

    pub(crate) fn discovery_delay(&self) -> Duration {
        self.discovery_delay
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for BLE-MIDI peripherals, connect, and list their endpoints.
    Scan(ScanArgs),
    /// Connect to every BLE-MIDI peripheral found and print received messages.
    Listen(ListenArgs),
    /// Connect to the first BLE-MIDI peripheral found and send messages.
    Send(SendArgs),
    /// Advertise as a BLE-MIDI peripheral and print messages from centrals.
    Advertise(AdvertiseArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_) => "scan",
            Self::Listen(_) => "listen",
            Self::Send(_) => "send",
            Self::Advertise(_) => "advertise",
        }
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How command results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured tables and lines for people.
    Pretty,
    /// One JSON document per line.
    Json,
}

/// A MIDI message given on the command line as hexadecimal, e.g. `903C64`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MidiMessageArg(MidiEvent);

impl MidiMessageArg {
    #[must_use]
    pub fn event(&self) -> &MidiEvent {
        &self.0
    }
}

impl FromStr for MidiMessageArg {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bytes = parse_hex(value)?;
        let invalid = || FixtureError::InvalidMidiMessage {
            value: value.to_string(),
        };
        // A zero timestamp packet decodes exactly one complete message.
        let mut packet = vec![0x80, 0x80];
        packet.extend_from_slice(&bytes);
        if bytes.first() == Some(&0xF0) {
            packet.insert(packet.len() - 1, 0x80);
        }
        let mut decoded = crate::codec::DecodeSession::new().decode(&packet);
        match (decoded.pop(), decoded.is_empty()) {
            (Some(message), true) => Ok(Self(message.event)),
            _ => Err(invalid()),
        }
    }
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn fake_mode_requires_scan_fixture() {
        let result = Args::try_parse_from(["blemidi", "--fake", "scan"]);

        let error = result.expect_err("missing --fake-scan should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_fixture_flags_require_fake_mode() {
        let result =
            Args::try_parse_from(["blemidi", "--fake-notifications", "8080F8", "listen"]);

        let error = result.expect_err("fake payload flags should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let cli = Args::try_parse_from([
            "blemidi",
            "--fake",
            "--fake-scan",
            "AA:BB|Keys|-43",
            "--log-level",
            "debug",
            "scan",
        ])
        .expect("valid fake arguments should parse");

        assert_eq!(Some(LogLevel::Debug), cli.log_level());
        let (command, fake_args) = cli.into_command_and_fake_args();
        assert_matches!(command, Command::Scan(_));
        let fake_args = fake_args.expect("fake settings should be present");
        assert_eq!(1, fake_args.remotes().len());
    }

    #[rstest]
    #[case("903C64", MidiEvent::NoteOn { channel: 0, note: 60, velocity: 100 })]
    #[case("B1074F", MidiEvent::ControlChange { channel: 1, function: 7, value: 79 })]
    #[case("FA", MidiEvent::Start)]
    #[case("F07E7F0901F7", MidiEvent::SystemExclusive { data: vec![0x7E, 0x7F, 0x09, 0x01] })]
    fn midi_message_arguments_parse(#[case] value: &str, #[case] expected: MidiEvent) {
        let parsed: MidiMessageArg = value.parse().expect("message should parse");
        assert_eq!(&expected, parsed.event());
    }

    #[rstest]
    #[case("903C")]
    #[case("3C64")]
    #[case("")]
    #[case("F07E7F")]
    fn incomplete_midi_messages_are_rejected(#[case] value: &str) {
        assert_matches!(
            value.parse::<MidiMessageArg>(),
            Err(FixtureError::InvalidMidiMessage { .. })
        );
    }
}
