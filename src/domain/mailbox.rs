//! Routing side of a subscription.
//!
//! A [`Mailbox`] owns the sending half of a subscriber's bounded queue plus
//! its closed state. The pattern table holds mailboxes as [`Route`]s; the
//! subscriber holds the receiving half.
//!
//! # Concurrency
//!
//! - Deliveries take the state lock shared, so they run concurrently.
//! - Closing takes it exclusively, exactly once, after every in-flight
//!   delivery has either enqueued or timed out.
//! - Once closed, the sender is gone and nothing is ever pushed again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{OnceCell, RwLock, mpsc};

use super::{Envelope, Message, SubscriptionId};
use crate::error::DeliveryError;
use crate::logging::Logger;

/// Sending half of a subscription's queue.
#[derive(Debug)]
pub(crate) struct Mailbox<T> {
    id: SubscriptionId,
    pattern: Arc<str>,
    /// `None` once closed.
    sender: RwLock<Option<mpsc::Sender<T>>>,
    closed: OnceCell<()>,
}

impl<T> Mailbox<T> {
    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }

    /// `true` once the closing action has completed.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.initialized()
    }

    /// Closes the queue. Returns `true` for the one call that performed the
    /// closing action; concurrent callers wait for it and get `false`.
    pub(crate) async fn close(&self) -> bool {
        let performed = AtomicBool::new(false);
        let flag = &performed;
        let sender = &self.sender;
        self.closed
            .get_or_init(move || async move {
                // Dropping the sender lets the subscriber drain what is
                // buffered and then observe end-of-stream.
                sender.write().await.take();
                flag.store(true, Ordering::Release);
            })
            .await;
        performed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> DeliveryError {
        DeliveryError::Closed {
            pattern: self.pattern.to_string(),
        }
    }
}

impl<T: Envelope> Mailbox<T> {
    /// Creates an open mailbox and the receiver its subscriber reads from.
    pub(crate) fn open(pattern: &str, capacity: usize) -> (Arc<Self>, mpsc::Receiver<T>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let mailbox = Self {
            id: SubscriptionId::new(),
            pattern: Arc::from(pattern),
            sender: RwLock::new(Some(sender)),
            closed: OnceCell::new(),
        };
        (Arc::new(mailbox), receiver)
    }

    /// Enqueues one message, waiting at most `timeout` for queue space.
    ///
    /// Failures are logged through `logger` and returned for inspection;
    /// they are never propagated to publishers.
    pub(crate) async fn deliver(
        &self,
        topic: &str,
        matches: Vec<String>,
        payload: Bytes,
        timeout: Duration,
        logger: &dyn Logger,
    ) -> Result<(), DeliveryError> {
        let state = self.sender.read().await;
        let Some(sender) = state.as_ref() else {
            logger.warn(format_args!(
                "pubsub: subscription {} on pattern {} closed",
                self.id, self.pattern
            ));
            return Err(self.closed_error());
        };

        let message = T::assemble(topic, &self.pattern, matches, payload.clone());
        match tokio::time::timeout(timeout, sender.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                logger.warn(format_args!(
                    "pubsub: subscriber of {} on pattern {} went away",
                    self.id, self.pattern
                ));
                Err(self.closed_error())
            }
            Err(_) => {
                logger.crit(format_args!(
                    "pubsub: timeout sending message to subscription on pattern {}\n{}",
                    self.pattern,
                    String::from_utf8_lossy(&payload)
                ));
                Err(DeliveryError::Timeout {
                    pattern: self.pattern.to_string(),
                    timeout,
                })
            }
        }
    }
}

/// A mailbox of either delivery shape, as stored in the pattern table.
#[derive(Debug, Clone)]
pub(crate) enum Route {
    /// Receives [`Message`]s.
    Structured(Arc<Mailbox<Message>>),
    /// Receives payload [`Bytes`] only.
    Raw(Arc<Mailbox<Bytes>>),
}

impl Route {
    pub(crate) fn id(&self) -> SubscriptionId {
        match self {
            Self::Structured(m) => m.id(),
            Self::Raw(m) => m.id(),
        }
    }

    pub(crate) fn pattern(&self) -> &str {
        match self {
            Self::Structured(m) => m.pattern(),
            Self::Raw(m) => m.pattern(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        match self {
            Self::Structured(m) => m.is_closed(),
            Self::Raw(m) => m.is_closed(),
        }
    }

    pub(crate) async fn deliver(
        &self,
        topic: &str,
        matches: Vec<String>,
        payload: Bytes,
        timeout: Duration,
        logger: &dyn Logger,
    ) -> Result<(), DeliveryError> {
        match self {
            Self::Structured(m) => m.deliver(topic, matches, payload, timeout, logger).await,
            Self::Raw(m) => m.deliver(topic, matches, payload, timeout, logger).await,
        }
    }

    pub(crate) async fn close(&self) -> bool {
        match self {
            Self::Structured(m) => m.close().await,
            Self::Raw(m) => m.close().await,
        }
    }
}

/// Envelopes that can be stored in the pattern table.
pub(crate) trait IntoRoute: Envelope {
    fn into_route(mailbox: Arc<Mailbox<Self>>) -> Route;
}

impl IntoRoute for Message {
    fn into_route(mailbox: Arc<Mailbox<Self>>) -> Route {
        Route::Structured(mailbox)
    }
}

impl IntoRoute for Bytes {
    fn into_route(mailbox: Arc<Mailbox<Self>>) -> Route {
        Route::Raw(mailbox)
    }
}
