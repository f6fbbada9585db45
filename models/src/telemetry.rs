//! Installs the process-wide `tracing` subscriber used by everything that embeds the reconciler.
use serde::Deserialize;
use snafu::ResultExt;
use std::env;
use tracing::Subscriber;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, EnvFilter, Registry};

const DEFAULT_TRACING_FILTER_DIRECTIVE: LevelFilter = LevelFilter::INFO;

const TRACING_FILTER_DIRECTIVE_ENV_VAR: &str = "TRACING_FILTER_DIRECTIVE";
const LOGGING_FORMATTER_ENV_VAR: &str = "LOGGING_FORMATTER";
const LOGGING_ANSI_ENABLED_ENV_VAR: &str = "LOGGING_ANSI_ENABLED";

/// How tracing events are rendered.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct LogFormatter {
    pub message_format: MessageFormat,
    pub ansi_enabled: bool,
}

impl LogFormatter {
    pub fn try_from_env() -> Result<Self> {
        Ok(Self {
            message_format: env::var(LOGGING_FORMATTER_ENV_VAR)
                .ok()
                .map(|formatter| MessageFormat::parse(&formatter))
                .transpose()?
                .unwrap_or_default(),
            ansi_enabled: env::var(LOGGING_ANSI_ENABLED_ENV_VAR)
                .ok()
                .map(|ansi_enabled| parse_ansi_enabled(&ansi_enabled))
                .transpose()?
                .unwrap_or(false),
        })
    }

    /// Adds a formatting layer to a tracing event subscriber.
    fn add_format_layer<S>(&self, event_subscriber: S) -> Box<dyn Subscriber + Send + Sync>
    where
        S: SubscriberExt + Send + Sync + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        // Each formatter is a distinct layer type, so the subscriber has to be boxed per arm.
        let layer = fmt::layer().with_ansi(self.ansi_enabled);
        match self.message_format {
            MessageFormat::Full => Box::new(event_subscriber.with(layer)),
            MessageFormat::Compact => Box::new(event_subscriber.with(layer.compact())),
            MessageFormat::Pretty => Box::new(event_subscriber.with(layer.pretty())),
            MessageFormat::Json => Box::new(event_subscriber.with(layer.json())),
        }
    }
}

/// The message format for logging tracing events.
///
/// See https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/format/index.html
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// Human-readable, single-line logs for each event.
    #[default]
    Full,
    /// A variant of the default formatter optimized for short line lengths.
    Compact,
    /// Pretty-formatted multi-line logs optimized for human readability.
    Pretty,
    /// Newline-delimited JSON logs.
    Json,
}

impl MessageFormat {
    fn parse(formatter: &str) -> Result<Self> {
        serde_plain::from_str(formatter).context(error::LogFormatterEnvSnafu {
            env_value: formatter,
        })
    }
}

fn parse_ansi_enabled(ansi_enabled: &str) -> Result<bool> {
    ansi_enabled
        .to_lowercase()
        .parse()
        .context(error::LogAnsiEnvSnafu {
            env_value: ansi_enabled,
        })
}

/// Configures tracing from `TRACING_FILTER_DIRECTIVE`, `LOGGING_FORMATTER` and `LOGGING_ANSI_ENABLED`.
pub fn init_telemetry_from_env() -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(DEFAULT_TRACING_FILTER_DIRECTIVE.into())
        .with_env_var(TRACING_FILTER_DIRECTIVE_ENV_VAR)
        .from_env_lossy();

    let subscriber = Registry::default().with(env_filter);
    let subscriber = LogFormatter::try_from_env()?.add_format_layer(subscriber);

    tracing::subscriber::set_global_default(subscriber)
        .context(error::TracingConfigurationSnafu)?;

    Ok(())
}

pub mod error {
    use std::str::ParseBoolError;

    use super::*;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum TelemetryConfigError {
        #[snafu(display("Error configuring tracing: '{}'", source))]
        TracingConfiguration {
            source: tracing::subscriber::SetGlobalDefaultError,
        },

        #[snafu(display(
            "Could not parse formatter from environment variable '{}={}': '{}'",
            LOGGING_FORMATTER_ENV_VAR,
            env_value,
            source
        ))]
        LogFormatterEnv {
            source: serde_plain::Error,
            env_value: String,
        },

        #[snafu(display(
            "Could not parse ANSI enablement from environment variable '{}={}': '{}'",
            LOGGING_ANSI_ENABLED_ENV_VAR,
            env_value,
            source
        ))]
        LogAnsiEnv {
            source: ParseBoolError,
            env_value: String,
        },
    }
}

type Result<T> = std::result::Result<T, TelemetryConfigError>;
pub use error::TelemetryConfigError;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_message_format_parsing() {
        let test_cases = vec![
            ("full", MessageFormat::Full),
            ("compact", MessageFormat::Compact),
            ("pretty", MessageFormat::Pretty),
            ("json", MessageFormat::Json),
        ];
        for (raw, format) in test_cases {
            assert_eq!(MessageFormat::parse(raw).unwrap(), format);
        }
        assert!(MessageFormat::parse("xml").is_err());
    }

    #[test]
    fn test_ansi_parsing() {
        assert!(parse_ansi_enabled("TRUE").unwrap());
        assert!(!parse_ansi_enabled("false").unwrap());
        assert!(parse_ansi_enabled("yes").is_err());
    }
}
