//! Global `tracing` subscriber installation.
//!
//! Keystone crates only emit events. The host decides once, at startup,
//! how they are rendered by calling [`init_logging`].
//!
//! ```rust,ignore
//! use keystone_telemetry::{init_logging, LogConfig, LogFormat, SpanEvents};
//!
//! init_logging(
//!     &LogConfig::default()
//!         .with_format(LogFormat::Pretty)
//!         .with_spans(SpanEvents::Lifecycle),
//! )?;
//! tracing::info!(request_id = "req-1", "call finished");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    #[default]
    Json,
    /// Multi-line output for terminals.
    Pretty,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        })
    }
}

/// Which span transitions produce events of their own.
///
/// The store instruments every operation, so `Lifecycle` yields one
/// line per store call with its duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanEvents {
    /// Only explicit events.
    #[default]
    Off,
    /// Span creation and close.
    Lifecycle,
    /// Every enter, exit, creation and close.
    Full,
}

impl SpanEvents {
    fn as_fmt_span(self) -> FmtSpan {
        match self {
            Self::Off => FmtSpan::NONE,
            Self::Lifecycle => FmtSpan::NEW | FmtSpan::CLOSE,
            Self::Full => FmtSpan::FULL,
        }
    }
}

/// The `logging` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LogConfig {
    /// Install a subscriber at all. Hosts that bring their own leave this
    /// off.
    pub enabled: bool,

    /// `EnvFilter` directive, e.g. `info` or `keystone_store=debug,info`.
    pub level: String,

    /// Rendering.
    pub format: LogFormat,

    /// Span transition events.
    pub spans: SpanEvents,

    /// Attach source file and line to each event.
    pub source_location: bool,

    /// Attach the emitting module path to each event.
    pub targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            spans: SpanEvents::Off,
            source_location: false,
            targets: true,
        }
    }
}

impl LogConfig {
    /// Sets the filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Sets the rendering.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets which span transitions are logged.
    #[must_use]
    pub fn with_spans(mut self, spans: SpanEvents) -> Self {
        self.spans = spans;
        self
    }
}

/// Installs the process-wide subscriber described by `config`.
///
/// A disabled config installs nothing and succeeds.
///
/// # Errors
///
/// [`TelemetryError::InvalidFilter`] for a bad directive,
/// [`TelemetryError::LoggingInit`] when a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;
    let base = tracing_subscriber::fmt::layer()
        .with_span_events(config.spans.as_fmt_span())
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_target(config.targets);
    let layer = match config.format {
        LogFormat::Json => base.json().with_filter(filter).boxed(),
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Parses an `EnvFilter` directive.
///
/// # Errors
///
/// [`TelemetryError::InvalidFilter`] when the directive does not parse.
pub fn create_env_filter(directive: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(directive).map_err(|e| TelemetryError::InvalidFilter {
        filter: directive.to_string(),
        reason: e.to_string(),
    })
}
