//! # Structured Logging
//!
//! Installs the `tracing` subscriber for the control plane and provides a small
//! timer used to report how long each gateway backend call took.
//!
//! ## Key Features
//! - JSON or text output selected from [`LogConfig`]
//! - `RUST_LOG` takes precedence over the configured level
//! - Per-call elapsed time logging for adapter operations

use std::time::Instant;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::{LogConfig, LogFormat};

/// Initialize the tracing subscriber.
///
/// Safe to call more than once; later calls only log a warning.
pub fn init_logging(config: &LogConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gateway_control_plane={}", level)));

    let initialized = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
    };

    if initialized.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return;
    }

    info!(level = %level, format = ?config.format, "Structured logging initialized");
}

/// Measures a single backend call and logs its cost when finished
pub struct CallTimer {
    operation: &'static str,
    started: Instant,
}

impl CallTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            started: Instant::now(),
        }
    }

    /// Log the elapsed time and return it in milliseconds
    pub fn finish(self) -> u128 {
        let elapsed = self.started.elapsed().as_millis();
        debug!(operation = self.operation, elapsed_ms = elapsed as u64, "{} costs {}ms", self.operation, elapsed);
        elapsed
    }
}
