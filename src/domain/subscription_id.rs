//! Subscription identity.

use std::fmt;

/// Identifies one subscription, independently of its pattern.
///
/// Sibling subscriptions on the same pattern get distinct ids, which is what
/// lets [`Dispatcher::unsubscribe`](crate::Dispatcher::unsubscribe) remove
/// exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(uuid::Uuid);

impl SubscriptionId {
    /// Draws a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
