//! # Keystone Telemetry
//!
//! Structured logging setup and the metric vocabulary shared by the Keystone
//! crates.
//!
//! - **Logging**: a global `tracing` subscriber with an `EnvFilter` and a
//!   JSON or pretty fmt layer, see [`init_logging`].
//! - **Metrics**: counter names recorded through the `metrics` facade, see
//!   [`metrics`]. No exporter is installed here.
//!
//! # Example
//!
//! ```rust,ignore
//! use keystone_telemetry::{init_logging, metrics, LogConfig, LogFormat};
//!
//! init_logging(&LogConfig::default().with_format(LogFormat::Pretty))?;
//! metrics::describe_metrics();
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat, SpanEvents};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
