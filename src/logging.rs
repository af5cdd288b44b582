//! Leveled logging for the routing engine.
//!
//! The router never talks to `tracing` directly on its failure paths; it
//! goes through a [`Logger`] so embedders can capture or silence those lines.
//! [`TracingLogger`] is the built-in implementation and is disabled unless
//! explicitly enabled.

use std::fmt;

/// A failure-level log line, returned to the caller after it was emitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LogError(pub String);

/// Severity-leveled log sink.
///
/// Failure levels hand back the formatted line as a [`LogError`]; the
/// informational levels hand back the formatted `String`. Whether anything
/// is emitted is up to the implementation.
pub trait Logger: Send + Sync + fmt::Debug {
    /// Logs a critical failure, such as a dropped delivery.
    fn crit(&self, args: fmt::Arguments<'_>) -> LogError;

    /// Logs a recoverable failure.
    fn error(&self, args: fmt::Arguments<'_>) -> LogError;

    /// Logs a degraded but expected condition.
    fn warn(&self, args: fmt::Arguments<'_>) -> LogError;

    /// Logs an informational message.
    fn info(&self, args: fmt::Arguments<'_>) -> String;

    /// Logs a debugging message.
    fn debug(&self, args: fmt::Arguments<'_>) -> String;
}

/// [`Logger`] backed by the `tracing` macros.
///
/// `crit` is emitted at `ERROR` level with a `severity = "critical"` field
/// so subscribers can tell it apart from ordinary errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TracingLogger {
    enabled: bool,
}

impl TracingLogger {
    /// Creates a logger that emits through `tracing`.
    #[must_use]
    pub const fn enabled() -> Self {
        Self { enabled: true }
    }

    /// Creates a logger that only formats.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Returns `true` if this logger emits.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Logger for TracingLogger {
    fn crit(&self, args: fmt::Arguments<'_>) -> LogError {
        let msg = args.to_string();
        if self.enabled {
            tracing::error!(severity = "critical", "{msg}");
        }
        LogError(msg)
    }

    fn error(&self, args: fmt::Arguments<'_>) -> LogError {
        let msg = args.to_string();
        if self.enabled {
            tracing::error!("{msg}");
        }
        LogError(msg)
    }

    fn warn(&self, args: fmt::Arguments<'_>) -> LogError {
        let msg = args.to_string();
        if self.enabled {
            tracing::warn!("{msg}");
        }
        LogError(msg)
    }

    fn info(&self, args: fmt::Arguments<'_>) -> String {
        let msg = args.to_string();
        if self.enabled {
            tracing::info!("{msg}");
        }
        msg
    }

    fn debug(&self, args: fmt::Arguments<'_>) -> String {
        let msg = args.to_string();
        if self.enabled {
            tracing::debug!("{msg}");
        }
        msg
    }
}

/// Installs a global `tracing-subscriber` fmt subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. With `json`
/// set, lines are emitted as JSON objects.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
