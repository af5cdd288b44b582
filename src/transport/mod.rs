//! Transport boundary: the broker the router sits on top of.
//!
//! The router needs exactly two things from a broker: a pattern
//! subscription yielding `(channel, payload)` events, and a way to publish.
//! [`MemoryTransport`] implements both in-process.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

pub use memory::MemoryTransport;

/// One inbound event as seen on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    /// Full transport channel name, prefix included.
    pub channel: String,
    /// Opaque message body.
    pub payload: Bytes,
}

/// Errors raised by a [`Transport`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The subscription wildcard was rejected.
    #[error("invalid wildcard {wildcard:?}: {reason}")]
    InvalidWildcard {
        /// The rejected wildcard.
        wildcard: String,
        /// Why the transport rejected it.
        reason: String,
    },

    /// The subscription or connection is already closed.
    #[error("transport closed")]
    Closed,

    /// Any other broker-side failure.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Terminates a pattern subscription.
#[async_trait]
pub trait FeedHandle: Send + Sync + fmt::Debug {
    /// Closes the subscription; its event stream ends afterwards.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the broker refused or the
    /// subscription was already gone.
    async fn close(&self) -> Result<(), TransportError>;
}

/// A live pattern subscription: its events and the handle that ends them.
pub struct PatternFeed {
    /// Inbound events; finite, ends once the handle is closed.
    pub events: BoxStream<'static, ChannelEvent>,
    /// Closes the subscription.
    pub handle: Box<dyn FeedHandle>,
}

impl fmt::Debug for PatternFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternFeed")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Pattern-capable publish/subscribe broker.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug + 'static {
    /// Subscribes to every channel matching a glob wildcard such as
    /// `"app/*"`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the wildcard is invalid or the broker
    /// is unreachable.
    async fn psubscribe(&self, wildcard: &str) -> Result<PatternFeed, TransportError>;

    /// Publishes `payload` on `channel`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the broker rejects the message.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), TransportError>;
}
