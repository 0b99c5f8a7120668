//! Log subscriber setup for sockrpc processes.
//!
//! `RUST_LOG` always wins. Without it the sockrpc crates log at the
//! configured level and everything else at `warn`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{EnvFilter, ParseError};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Log targets owned by this workspace.
const WORKSPACE_TARGETS: [&str; 3] = ["sockrpc_protocol", "sockrpc_server", "sockrpc_cli"];

/// Errors from [`init_tracing`].
#[derive(Debug, Error)]
pub enum TracingError {
    /// Another subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    AlreadyInstalled(#[from] TryInitError),

    /// The filter directives do not parse.
    #[error("invalid log filter {directives:?}: {source}")]
    Filter {
        directives: String,
        #[source]
        source: ParseError,
    },
}

/// How events are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for reading in a terminal.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format {other:?} (expected pretty, compact or json)"
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Level for the workspace crates when `RUST_LOG` is unset.
    pub level: Level,
    pub format: LogFormat,
    /// Emit an event when a span closes, with its busy and idle time.
    ///
    /// Connection and dispatch spans make this a per-request timing log.
    pub span_timings: bool,
    pub source_location: bool,
    /// Explicit filter directives, used instead of `RUST_LOG` and `level`.
    pub directives: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            span_timings: false,
            source_location: false,
            directives: None,
        }
    }
}

impl TracingConfig {
    /// Debug level with file and line, for running by hand.
    #[must_use]
    pub fn cli_debug() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Pretty,
            source_location: true,
            ..Self::default()
        }
    }

    /// JSON lines with per-request timings, for running under a supervisor.
    #[must_use]
    pub fn daemon() -> Self {
        Self {
            format: LogFormat::Json,
            span_timings: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    /// Directives used when neither `directives` nor `RUST_LOG` is set.
    pub fn default_directives(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        let mut directives = vec!["warn".to_string()];
        directives.extend(WORKSPACE_TARGETS.iter().map(|target| format!("{target}={level}")));
        directives.join(",")
    }

    fn filter(&self) -> Result<EnvFilter, TracingError> {
        let directives = match &self.directives {
            Some(directives) => directives.clone(),
            None => match std::env::var(EnvFilter::DEFAULT_ENV) {
                Ok(from_env) if !from_env.trim().is_empty() => from_env,
                _ => self.default_directives(),
            },
        };
        EnvFilter::try_new(&directives)
            .map_err(|source| TracingError::Filter { directives, source })
    }
}

/// Installs the global subscriber. Call once, before the server starts.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = config.filter()?;
    let span_events = if config.span_timings {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_span_events(span_events)
        .with_file(config.source_location)
        .with_line_number(config.source_location);
    let layer = match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().with_current_span(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_cover_workspace_crates() {
        let config = TracingConfig::default().with_level(Level::TRACE);
        assert_eq!(
            config.default_directives(),
            "warn,sockrpc_protocol=trace,sockrpc_server=trace,sockrpc_cli=trace"
        );
    }

    #[test]
    fn presets() {
        let debug = TracingConfig::cli_debug();
        assert_eq!(debug.level, Level::DEBUG);
        assert_eq!(debug.format, LogFormat::Pretty);
        assert!(debug.source_location);

        let daemon = TracingConfig::daemon();
        assert_eq!(daemon.level, Level::INFO);
        assert_eq!(daemon.format, LogFormat::Json);
        assert!(daemon.span_timings);
    }

    #[test]
    fn explicit_directives_are_validated() {
        let config = TracingConfig::default().with_directives("sockrpc_server=debug");
        assert!(config.filter().is_ok());

        let err = TracingConfig::default()
            .with_directives("sockrpc_server=[")
            .filter()
            .unwrap_err();
        assert!(matches!(
            err,
            TracingError::Filter { ref directives, .. } if directives == "sockrpc_server=["
        ));
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().unwrap_err().contains("xml"));

        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            assert_eq!(format.to_string().parse::<LogFormat>(), Ok(format));
        }
    }
}
