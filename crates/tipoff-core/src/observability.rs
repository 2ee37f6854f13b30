//! Observability infrastructure for tipoff.
//!
//! Structured logging with consistent spans. This module provides the
//! initialization helper and span constructors shared by every component.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name; anything other than `json` selects [`LogFormat::Pretty`].
    #[must_use]
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some(value) if value.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `tipoff_flow=debug`)
///
/// # Example
///
/// ```rust
/// use tipoff_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for per-event forecast work.
///
/// # Example
///
/// ```rust
/// use tipoff_core::observability::forecast_span;
///
/// let span = forecast_span("assemble", "game-1042");
/// let _guard = span.enter();
/// // ... assemble the generation request
/// ```
#[must_use]
pub fn forecast_span(operation: &str, event_id: &str) -> Span {
    tracing::info_span!("forecast", op = operation, event_id = event_id)
}
