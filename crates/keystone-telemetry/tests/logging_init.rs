//! Global subscriber installation.
//!
//! Kept in its own test binary since the subscriber is process-wide.

use keystone_telemetry::{init_logging, LogConfig, LogFormat, TelemetryError};

#[test]
fn second_initialization_is_an_error() {
    let config = LogConfig::default()
        .with_level("keystone=debug,warn")
        .with_format(LogFormat::Pretty);

    init_logging(&config).unwrap();
    tracing::info!(request_id = "req-1", "installed");

    let err = init_logging(&LogConfig::default()).unwrap_err();
    assert!(matches!(err, TelemetryError::LoggingInit(_)));
}
