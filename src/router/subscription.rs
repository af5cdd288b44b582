//! Caller side of a subscription.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::domain::SubscriptionId;
use crate::domain::mailbox::Route;

/// Read side of a subscription returned by
/// [`Dispatcher::subscribe`](super::Dispatcher::subscribe) and
/// [`Dispatcher::subscribe_raw`](super::Dispatcher::subscribe_raw).
///
/// Yields values until the subscription is closed, by
/// [`Dispatcher::unsubscribe`](super::Dispatcher::unsubscribe) or by
/// [`Dispatcher::stop`](super::Dispatcher::stop). Messages already buffered
/// at close time are still yielded; after that the stream ends for good.
///
/// Dropping the handle without unsubscribing leaves its pattern registered;
/// deliveries to it then fail fast and are logged.
#[derive(Debug)]
pub struct Subscription<T> {
    route: Route,
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// `route` must wrap the mailbox feeding `receiver`.
    pub(crate) fn new(route: Route, receiver: mpsc::Receiver<T>) -> Self {
        Self { route, receiver }
    }

    pub(crate) fn route(&self) -> &Route {
        &self.route
    }

    /// Unique identifier of this subscription.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.route.id()
    }

    /// The exact pattern this subscription was registered under.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.route.pattern()
    }

    /// Returns `true` once the subscription has been closed. Buffered
    /// messages may still be pending.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.route.is_closed()
    }

    /// Waits for the next value. Returns `None` once the subscription is
    /// closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns the next buffered value without waiting.
    #[must_use]
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Number of values waiting in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns `true` if no value is waiting in the queue.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Borrows the subscription as a [`Stream`] of values.
    pub fn messages(&mut self) -> impl Stream<Item = T> + '_ {
        futures_util::stream::poll_fn(move |cx| self.receiver.poll_recv(cx))
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
