//! # topic-router
//!
//! Regex topic routing on top of a pattern-capable publish/subscribe
//! transport.
//!
//! A [`Dispatcher`] holds a single wildcard subscription on the transport,
//! strips the channel prefix from every inbound event to recover its topic,
//! and fans the event out to every subscription whose regular expression
//! matches. Each subscription has its own bounded queue; a delivery that
//! cannot be enqueued within the configured timeout is dropped and logged.
//! Delivery is best-effort and at-most-once.
//!
//! ## Architecture
//!
//! ```text
//! Transport (broker, or MemoryTransport)
//!     │  "<prefix>/*" pattern feed
//!     │
//!     ├── Dispatcher listen task (router/)
//!     │      └── cast task per event
//!     │             └── delivery task per matching subscription
//!     │
//!     ├── PatternTable: pattern → regex + mailboxes (domain/)
//!     │
//!     └── Subscription handles (bounded queues) → consumers
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use topic_router::{Dispatcher, MemoryTransport};
//!
//! # async fn run() -> Result<(), topic_router::RouterError> {
//! let router = Dispatcher::builder(MemoryTransport::new())
//!     .channel_prefix("app")
//!     .build();
//! router.start().await?;
//!
//! let mut orders = router.subscribe(r"^orders\.(\d+)$").await?;
//! router.publish("orders.42", "{}").await?;
//!
//! if let Some(msg) = orders.recv().await {
//!     assert_eq!(msg.topic, "orders.42");
//! }
//! router.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod router;
pub mod transport;

pub use config::RouterConfig;
pub use domain::{Envelope, Message, SubscriptionId};
pub use error::{DeliveryError, RouterError};
pub use logging::{LogError, Logger, TracingLogger};
pub use router::{Dispatcher, DispatcherBuilder, Subscription};
pub use transport::{ChannelEvent, FeedHandle, MemoryTransport, PatternFeed, Transport, TransportError};
