//! Tracing/logging initialization
//!
//! Host applications call [`init_tracing`] once at startup. Components never
//! touch a process-global logger directly; they emit `tracing` events and the
//! host decides where those go.

use crate::config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber from logging configuration.
///
/// `RUST_LOG` overrides the configured level. Calling this twice returns an
/// error from the subscriber registry; ignore it in tests.
pub fn init_tracing(config: &LoggingConfig) {
    let default_filter = format!("fedgate={}", config.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    if config.format == "json" {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init();
    }
}
