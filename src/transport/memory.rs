//! In-process transport with glob pattern subscriptions.
//!
//! [`MemoryTransport`] keeps one unbounded queue per pattern feed. Publishing
//! matches the channel against every feed's glob and pushes a copy of the
//! event into each matching queue, so the publisher never waits on a slow
//! listener.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use globset::{Glob, GlobMatcher};
use tokio::sync::{RwLock, mpsc};

use super::{ChannelEvent, FeedHandle, PatternFeed, Transport, TransportError};

#[derive(Debug)]
struct Feed {
    matcher: GlobMatcher,
    sender: mpsc::UnboundedSender<ChannelEvent>,
}

type FeedMap = Arc<RwLock<HashMap<u64, Feed>>>;

/// In-memory pattern pub/sub broker.
///
/// Cloning is cheap; clones share the same set of feeds.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    feeds: FeedMap,
    next_id: Arc<AtomicU64>,
}

impl MemoryTransport {
    /// Creates a transport with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of open pattern feeds.
    pub async fn feed_count(&self) -> usize {
        self.feeds.read().await.len()
    }

    /// Publishes to every matching feed and returns how many received it.
    pub async fn publish_counted(&self, channel: &str, payload: Bytes) -> usize {
        let feeds = self.feeds.read().await;
        let mut delivered = 0;
        for feed in feeds.values() {
            if !feed.matcher.is_match(channel) {
                continue;
            }
            let event = ChannelEvent {
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            if feed.sender.send(event).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn psubscribe(&self, wildcard: &str) -> Result<PatternFeed, TransportError> {
        let matcher = Glob::new(wildcard)
            .map_err(|e| TransportError::InvalidWildcard {
                wildcard: wildcard.to_string(),
                reason: e.to_string(),
            })?
            .compile_matcher();

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.feeds.write().await.insert(id, Feed { matcher, sender });
        tracing::debug!(feed = id, wildcard, "memory transport feed opened");

        let events = futures_util::stream::poll_fn(move |cx| receiver.poll_recv(cx)).boxed();
        let handle = MemoryFeedHandle {
            id,
            feeds: Arc::clone(&self.feeds),
        };
        Ok(PatternFeed {
            events,
            handle: Box::new(handle),
        })
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), TransportError> {
        self.publish_counted(channel, payload).await;
        Ok(())
    }
}

/// Closes one feed of a [`MemoryTransport`].
#[derive(Debug)]
struct MemoryFeedHandle {
    id: u64,
    feeds: FeedMap,
}

#[async_trait]
impl FeedHandle for MemoryFeedHandle {
    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the sender ends the feed's stream once it is drained.
        match self.feeds.write().await.remove(&self.id) {
            Some(_) => {
                tracing::debug!(feed = self.id, "memory transport feed closed");
                Ok(())
            }
            None => Err(TransportError::Closed),
        }
    }
}
