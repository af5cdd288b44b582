//! Router error types with stable numeric codes.
//!
//! [`RouterError`] is returned synchronously from lifecycle and
//! subscription operations. [`DeliveryError`] never reaches a caller: it
//! describes why a single delivery was dropped and is only ever logged.

use std::time::Duration;

use crate::transport::TransportError;

/// Errors surfaced by [`Dispatcher`](crate::router::Dispatcher) operations.
///
/// # Error Code Ranges
///
/// | Range     | Category   |
/// |-----------|------------|
/// | 1000–1999 | Validation |
/// | 2000–2999 | Lifecycle  |
/// | 3000–3999 | Transport  |
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The pattern could not be compiled as a regular expression.
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The raw pattern that was rejected.
        pattern: String,
        /// The regex compiler's diagnostic.
        #[source]
        source: regex::Error,
    },

    /// The dispatcher is not running.
    #[error("pubsub stopped")]
    Stopped,

    /// `start` was called on a dispatcher that is already running.
    #[error("pubsub already running")]
    AlreadyRunning,

    /// Error propagated verbatim from the underlying transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RouterError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidPattern { .. } => 1001,
            Self::Stopped => 2001,
            Self::AlreadyRunning => 2002,
            Self::Transport(_) => 3001,
        }
    }
}

/// Why a single delivery attempt was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The subscription queue did not accept the message in time.
    #[error("timeout after {timeout:?} sending message to subscription on pattern {pattern}")]
    Timeout {
        /// Pattern the subscription was registered under.
        pattern: String,
        /// The configured delivery timeout.
        timeout: Duration,
    },

    /// The subscription was closed, or its consumer went away.
    #[error("subscription on pattern {pattern} closed")]
    Closed {
        /// Pattern the subscription was registered under.
        pattern: String,
    },
}
