use std::io::{self, IsTerminal};
use std::sync::OnceLock;

use indicatif::ProgressStyle;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use tracing::Metadata;
use tracing::level_filters::LevelFilter;
use tracing_indicatif::{IndicatifLayer, TickSettings};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::TelemetryError;

static TRACING_INITIALISED: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// The host Bluetooth stack logs every advertisement report.
const RADIO_STACK_TARGET: &str = "btleplug";
const DEFAULT_DIRECTIVES: &str = "warn";

/// Initialises structured logging and OpenTelemetry tracing support.
///
/// Only the first call installs a subscriber; later calls return its outcome.
/// `level_override` replaces the `RUST_LOG` filter when set.
pub(crate) fn initialise_tracing(
    service_name: &str,
    interactive_terminal: bool,
    level_override: Option<LevelFilter>,
) -> Result<(), &'static TelemetryError> {
    TRACING_INITIALISED
        .get_or_init(|| initialise_tracing_once(service_name, interactive_terminal, level_override))
        .as_ref()
        .copied()
}

fn initialise_tracing_once(
    service_name: &str,
    interactive_terminal: bool,
    level_override: Option<LevelFilter>,
) -> Result<(), TelemetryError> {
    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder().build();
    let tracer = tracer_provider.tracer(service_name.to_owned());
    global::set_tracer_provider(tracer_provider);

    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let log_filter = EnvFilter::try_new(filter_directives(level_override, from_env.as_deref()))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let is_interactive = interactive_terminal && io::stderr().is_terminal();

    if is_interactive {
        let indicatif_layer = IndicatifLayer::new()
            .with_progress_style(progress_style())
            .with_tick_settings(progress_tick_settings());
        let formatting_layer = fmt::layer()
            .pretty()
            .with_target(false)
            .with_writer(indicatif_layer.get_stderr_writer());
        let progress_layer = indicatif_layer.with_filter(filter::filter_fn(progress_span_filter));

        tracing_subscriber::registry()
            .with(formatting_layer.with_filter(log_filter.clone()))
            .with(progress_layer)
            .with(OpenTelemetryLayer::new(tracer.clone()))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_filter(log_filter),
            )
            .with(OpenTelemetryLayer::new(tracer))
            .try_init()?;
    }

    Ok(())
}

/// `--log-level` wins over `RUST_LOG`. Below `trace` it keeps the radio
/// stack at `warn`, so `debug` shows connection state without scan noise.
fn filter_directives(level_override: Option<LevelFilter>, from_env: Option<&str>) -> String {
    match (level_override, from_env.map(str::trim)) {
        (Some(level), _) if level == LevelFilter::TRACE || level <= LevelFilter::WARN => {
            level.to_string()
        }
        (Some(level), _) => format!("{level},{RADIO_STACK_TARGET}=warn"),
        (None, Some(directives)) if !directives.is_empty() => directives.to_string(),
        (None, _) => DEFAULT_DIRECTIVES.to_string(),
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.blue} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_error| ProgressStyle::default_spinner())
}

fn progress_tick_settings() -> TickSettings {
    TickSettings {
        default_tick_interval: Some(std::time::Duration::from_millis(120)),
        ..TickSettings::default()
    }
}

fn progress_span_filter(metadata: &Metadata<'_>) -> bool {
    metadata.is_span()
        && metadata.target().starts_with("blemidi::")
        && matches!(
            *metadata.level(),
            tracing::Level::INFO | tracing::Level::WARN | tracing::Level::ERROR
        )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tracing::Level;
    use tracing::callsite::Identifier;
    use tracing::field::FieldSet;
    use tracing::metadata::Kind;

    use super::*;

    struct NoCallsite;

    impl tracing::Callsite for NoCallsite {
        fn set_interest(&self, _interest: tracing::subscriber::Interest) {}

        fn metadata(&self) -> &Metadata<'_> {
            unimplemented!("metadata is built directly in these tests")
        }
    }

    static CALLSITE: NoCallsite = NoCallsite;

    fn span_metadata(target: &'static str, level: Level) -> Metadata<'static> {
        Metadata::new(
            "span",
            target,
            level,
            None,
            None,
            None,
            FieldSet::new(&[], Identifier(&CALLSITE)),
            Kind::SPAN,
        )
    }

    #[rstest]
    #[case::nothing_set(None, None, "warn")]
    #[case::blank_env(None, Some("  "), "warn")]
    #[case::env_only(None, Some("blemidi=debug"), "blemidi=debug")]
    #[case::debug_quiets_radio(Some(LevelFilter::DEBUG), Some("trace"), "debug,btleplug=warn")]
    #[case::info_quiets_radio(Some(LevelFilter::INFO), None, "info,btleplug=warn")]
    #[case::trace_shows_everything(Some(LevelFilter::TRACE), None, "trace")]
    #[case::error_stays_quiet(Some(LevelFilter::ERROR), None, "error")]
    #[case::off(Some(LevelFilter::OFF), Some("debug"), "off")]
    fn log_level_flag_overrides_environment(
        #[case] level_override: Option<LevelFilter>,
        #[case] from_env: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(expected, filter_directives(level_override, from_env));
    }

    #[test]
    fn progress_spans_are_limited_to_crate_info_spans() {
        assert!(progress_span_filter(&span_metadata("blemidi::cli::scan", Level::INFO)));
        assert!(!progress_span_filter(&span_metadata("blemidi::provider", Level::DEBUG)));
        assert!(!progress_span_filter(&span_metadata("btleplug::platform", Level::INFO)));
    }
}
