//! Structured logging for the ring store
//!
//! This module provides structured logging using the `tracing` crate with
//! console or daily-rolled file output.

use crate::config::{LogFormat, LogLevel, LoggingConfig};
use std::sync::Once;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the logging system based on configuration.
///
/// Only the first call installs a subscriber; `RUST_LOG` overrides the
/// configured level.
pub fn init_logging(config: &LoggingConfig) {
    INIT.call_once(|| {
        if let Err(e) = init_logging_inner(config) {
            eprintln!("Failed to initialize logging: {}", e);
        }
    });
}

fn init_logging_inner(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = convert_log_level(&config.level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(config.with_location)
        .with_line_number(config.with_location)
        .with_timer(UtcTime::rfc_3339());

    match (&config.file_path, config.format) {
        (Some(dir), LogFormat::Json) => builder
            .json()
            .with_writer(tracing_appender::rolling::daily(dir, "kv-ring.log"))
            .try_init()?,
        (Some(dir), _) => builder
            .with_ansi(false)
            .with_writer(tracing_appender::rolling::daily(dir, "kv-ring.log"))
            .try_init()?,
        (None, LogFormat::Json) => builder.json().try_init()?,
        (None, LogFormat::Pretty) => builder.pretty().try_init()?,
        (None, LogFormat::Simple) => builder.try_init()?,
    }

    tracing::info!("Logging system initialized with level: {:?}", config.level);
    Ok(())
}

/// Convert our log level to tracing level
fn convert_log_level(level: &LogLevel) -> Level {
    match level {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

/// Log a membership operation (join, leave, hand-off) with structured fields
pub fn log_cluster_operation(
    operation: &str,
    node_id: u64,
    success: bool,
    duration: Duration,
    detail: &str,
) {
    let span = tracing::info_span!(
        "cluster_operation",
        operation = operation,
        node_id = node_id,
        success = success,
        duration_ms = duration.as_millis() as u64,
    );
    let _enter = span.enter();

    if success {
        tracing::info!(detail = detail, "Cluster operation completed");
    } else {
        tracing::error!(detail = detail, "Cluster operation failed");
    }
}

/// Log a replica push or removal sent to a successor
pub fn log_replication_operation(
    operation: &str,
    target_id: u64,
    item_count: usize,
    success: bool,
    error: Option<&str>,
) {
    let span = tracing::debug_span!(
        "replication_operation",
        operation = operation,
        target_id = target_id,
        item_count = item_count,
        success = success,
    );
    let _enter = span.enter();

    match error {
        None => tracing::debug!("Replication operation completed"),
        Some(e) => tracing::warn!(error = e, "Replication operation failed; replica left stale"),
    }
}

/// Log the outcome of a quorum get, put or delete
pub fn log_quorum_operation(
    operation: &str,
    key: u64,
    required: usize,
    received: usize,
    success: bool,
    duration: Duration,
) {
    let span = tracing::debug_span!(
        "quorum_operation",
        operation = operation,
        key = key,
        required = required,
        received = received,
        duration_ms = duration.as_millis() as u64,
    );
    let _enter = span.enter();

    if success {
        tracing::debug!("Quorum operation completed");
    } else {
        tracing::warn!("Quorum operation failed");
    }
}
