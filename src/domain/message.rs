//! Messages handed to subscribers.
//!
//! A subscription either receives a structured [`Message`] or just the raw
//! payload [`Bytes`]. Both implement [`Envelope`], which is how a delivery
//! task builds the value it pushes into a subscriber's queue.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A routed event as seen by one subscription.
///
/// One instance is built per (event, subscription) delivery, so two
/// subscribers never share a `Message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Topic the event was published on, channel prefix removed.
    pub topic: String,
    /// Pattern of the subscription that matched.
    pub pattern: String,
    /// Full match at index 0, then one entry per capture group. Groups that
    /// did not participate in the match are empty strings.
    pub matches: Vec<String>,
    /// Opaque message body.
    pub payload: Bytes,
    /// When the message was assembled for delivery.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Returns the full matched substring of the topic.
    #[must_use]
    pub fn full_match(&self) -> Option<&str> {
        self.matches.first().map(String::as_str)
    }

    /// Returns capture group `index` (1-based, like regex groups).
    #[must_use]
    pub fn group(&self, index: usize) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.matches.get(index).map(String::as_str)
    }
}

/// Value a subscription's queue carries.
pub trait Envelope: Send + Sync + Sized + 'static {
    /// Builds the value delivered for one matched event.
    fn assemble(topic: &str, pattern: &str, matches: Vec<String>, payload: Bytes) -> Self;
}

impl Envelope for Message {
    fn assemble(topic: &str, pattern: &str, matches: Vec<String>, payload: Bytes) -> Self {
        Self {
            topic: topic.to_string(),
            pattern: pattern.to_string(),
            matches,
            payload,
            received_at: Utc::now(),
        }
    }
}

impl Envelope for Bytes {
    fn assemble(_topic: &str, _pattern: &str, _matches: Vec<String>, payload: Bytes) -> Self {
        payload
    }
}
