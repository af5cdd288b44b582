//! The routing engine.
//!
//! A [`Dispatcher`] holds one pattern subscription on the transport
//! (`"<channel_prefix>/*"`) and a table of regex subscriptions. A listen task
//! turns each transport event into a topic and hands it to a cast task, which
//! resolves the topic against the table and spawns one delivery task per
//! matching subscription.
//!
//! # Concurrency
//!
//! - The pattern table sits behind a `tokio::sync::RwLock`: casts resolve
//!   under a shared lock, subscribe/unsubscribe/start/stop take it
//!   exclusively.
//! - Delivery runs outside the table lock, against each subscription's own
//!   lock, so a slow subscriber never holds up table mutation.
//! - `start` and `stop` are serialized by a separate lifecycle mutex, held
//!   for the whole call. A stop racing another stop waits for it and then
//!   finds the dispatcher stopped.
//! - Cast, delivery and close tasks are detached but tracked by a
//!   [`TaskTracker`]; see [`Dispatcher::wait_idle`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use regex::Regex;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use super::subscription::Subscription;
use crate::config::RouterConfig;
use crate::domain::mailbox::{IntoRoute, Mailbox};
use crate::domain::{Message, PatternTable};
use crate::error::RouterError;
use crate::logging::{Logger, TracingLogger};
use crate::transport::{ChannelEvent, FeedHandle, PatternFeed, Transport};

#[derive(Debug, Default)]
struct RouterState {
    running: bool,
    table: PatternTable,
    feed: Option<Box<dyn FeedHandle>>,
    listener: Option<JoinHandle<()>>,
}

/// State shared between the dispatcher handle and its tasks.
#[derive(Debug)]
struct Shared {
    config: RouterConfig,
    logger: Arc<dyn Logger>,
    state: RwLock<RouterState>,
    lifecycle: Mutex<()>,
    /// Kept closed: closing only arms `wait`, spawning still works.
    tasks: TaskTracker,
}

impl Shared {
    async fn listen(self: Arc<Self>, mut events: BoxStream<'static, ChannelEvent>) {
        while let Some(event) = events.next().await {
            self.logger.debug(format_args!(
                "received pubsub message on channel {}\n{}",
                event.channel,
                String::from_utf8_lossy(&event.payload)
            ));
            let topic = self.config.topic_of(&event.channel);
            let shared = Arc::clone(&self);
            self.tasks
                .spawn(async move { shared.cast(topic, event.payload).await });
        }
        self.logger
            .debug(format_args!("pubsub: listener on {} stopped", self.config.wildcard()));
    }

    async fn cast(&self, topic: String, payload: Bytes) {
        let targets = {
            let state = self.state.read().await;
            state.table.resolve(&topic)
        };
        if targets.is_empty() {
            return;
        }

        let topic: Arc<str> = Arc::from(topic);
        for (route, matches) in targets {
            let topic = Arc::clone(&topic);
            let payload = payload.clone();
            let logger = Arc::clone(&self.logger);
            let timeout = self.config.timeout;
            self.tasks.spawn(async move {
                // Failures are already logged by the mailbox.
                let _ = route
                    .deliver(&topic, matches, payload, timeout, logger.as_ref())
                    .await;
            });
        }
    }
}

/// Regex topic router on top of a pattern pub/sub [`Transport`].
///
/// Constructed stopped. [`start`](Self::start) opens the transport
/// subscription and the listen task; [`stop`](Self::stop) tears both down
/// and closes every live subscription. A stopped dispatcher can be started
/// again.
///
/// Cloning is cheap; clones drive the same router.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    /// Creates a stopped dispatcher with the given configuration and the
    /// built-in [`TracingLogger`].
    #[must_use]
    pub fn new(transport: impl Transport, config: RouterConfig) -> Self {
        Self::builder(transport).config(config).build()
    }

    /// Starts building a dispatcher on top of `transport`.
    #[must_use]
    pub fn builder(transport: impl Transport) -> DispatcherBuilder {
        DispatcherBuilder {
            transport: Arc::new(transport),
            config: RouterConfig::default(),
            logger: None,
        }
    }

    /// Opens the transport subscription and spawns the listen task.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::AlreadyRunning`] if the dispatcher is running,
    /// or [`RouterError::Transport`] if the transport subscription fails; the
    /// dispatcher then stays stopped.
    pub async fn start(&self) -> Result<(), RouterError> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        let mut state = self.shared.state.write().await;
        if state.running {
            return Err(RouterError::AlreadyRunning);
        }

        let wildcard = self.shared.config.wildcard();
        let PatternFeed { events, handle } = self.transport.psubscribe(&wildcard).await?;

        state.table = PatternTable::new();
        state.running = true;
        state.feed = Some(handle);
        state.listener = Some(tokio::spawn(Arc::clone(&self.shared).listen(events)));
        drop(state);

        self.shared
            .logger
            .info(format_args!("pubsub: listening on {wildcard}"));
        Ok(())
    }

    /// Stops routing and closes every live subscription.
    ///
    /// Closes the transport subscription, waits for the listen task to
    /// drain and exit, then empties the pattern table. The captured
    /// subscriptions are closed asynchronously: this returns before their
    /// streams necessarily end. In-flight deliveries are not cancelled.
    ///
    /// Does nothing if the dispatcher is not running. Concurrent calls are
    /// serialized: the second one returns after the first has finished.
    pub async fn stop(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;
        let (feed, listener) = {
            let mut state = self.shared.state.write().await;
            if !state.running {
                self.shared
                    .logger
                    .debug(format_args!("pubsub: stop called while stopped"));
                return;
            }
            (state.feed.take(), state.listener.take())
        };

        let mut feed_closed = true;
        if let Some(feed) = feed
            && let Err(e) = feed.close().await
        {
            self.shared
                .logger
                .error(format_args!("pubsub: error closing subscriber, {e}"));
            feed_closed = false;
        }

        if let Some(listener) = listener {
            // Without a closed feed the listener would wait forever.
            if !feed_closed {
                listener.abort();
            }
            if let Err(e) = listener.await
                && e.is_panic()
            {
                self.shared
                    .logger
                    .error(format_args!("pubsub: listener task panicked, {e}"));
            }
        }

        let routes = {
            let mut state = self.shared.state.write().await;
            state.running = false;
            state.table.drain()
        };

        self.shared.logger.info(format_args!(
            "pubsub: stopped, closing {} subscriptions",
            routes.len()
        ));
        for route in routes {
            self.shared.tasks.spawn(async move {
                route.close().await;
            });
        }
    }

    /// Subscribes to every topic matching the regular expression `pattern`,
    /// delivering structured [`Message`]s.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidPattern`] if `pattern` does not compile
    /// (nothing is registered), or [`RouterError::Stopped`] if the dispatcher
    /// is not running.
    pub async fn subscribe(&self, pattern: &str) -> Result<Subscription<Message>, RouterError> {
        self.register(pattern).await
    }

    /// Like [`subscribe`](Self::subscribe), but delivers only the payload.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn subscribe_raw(&self, pattern: &str) -> Result<Subscription<Bytes>, RouterError> {
        self.register(pattern).await
    }

    async fn register<T: IntoRoute>(&self, pattern: &str) -> Result<Subscription<T>, RouterError> {
        let regex = Regex::new(pattern).map_err(|source| RouterError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let (mailbox, receiver) = Mailbox::<T>::open(pattern, self.shared.config.queue_capacity);
        let subscription = Subscription::new(T::into_route(mailbox), receiver);

        let mut state = self.shared.state.write().await;
        if !state.running {
            return Err(RouterError::Stopped);
        }
        state.table.insert(regex, subscription.route().clone());
        drop(state);

        self.shared.logger.debug(format_args!(
            "pubsub: subscription {} on pattern {pattern}",
            subscription.id()
        ));
        Ok(subscription)
    }

    /// Removes `subscription` from routing and closes it asynchronously.
    ///
    /// Deliveries already in flight may still reach it before it closes;
    /// later ones are dropped. Safe to call more than once, and after
    /// [`stop`](Self::stop).
    pub async fn unsubscribe<T>(&self, subscription: &Subscription<T>) {
        {
            let mut state = self.shared.state.write().await;
            state
                .table
                .remove(subscription.pattern(), subscription.id());
        }

        let route = subscription.route().clone();
        self.shared.tasks.spawn(async move {
            route.close().await;
        });
    }

    /// Publishes `payload` on `topic` through the transport.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Transport`] carrying the transport's error.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<(), RouterError> {
        let channel = self.shared.config.channel_for(topic);
        self.transport.publish(&channel, payload.into()).await?;
        Ok(())
    }

    /// Returns `true` between a successful [`start`](Self::start) and the
    /// end of [`stop`](Self::stop).
    pub async fn is_running(&self) -> bool {
        self.shared.state.read().await.running
    }

    /// Number of distinct patterns with at least one subscription.
    pub async fn pattern_count(&self) -> usize {
        self.shared.state.read().await.table.len()
    }

    /// Number of registered subscriptions across all patterns.
    pub async fn subscription_count(&self) -> usize {
        self.shared.state.read().await.table.subscription_count()
    }

    /// Number of cast, delivery and close tasks still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.tasks.len()
    }

    /// Waits until no cast, delivery or close task is running.
    ///
    /// [`stop`](Self::stop) never waits for in-flight work; call this after
    /// it for a fully drained shutdown. Events the listen task has not yet
    /// picked up are not covered.
    pub async fn wait_idle(&self) {
        self.shared.tasks.wait().await;
    }

    /// The configuration this dispatcher was built with.
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.shared.config
    }
}

/// Builder for [`Dispatcher`].
///
/// The logger is chosen last-call-wins among [`logger`](Self::logger),
/// [`enable_logging`](Self::enable_logging) and
/// [`disable_logging`](Self::disable_logging).
#[derive(Debug)]
pub struct DispatcherBuilder {
    transport: Arc<dyn Transport>,
    config: RouterConfig,
    logger: Option<Arc<dyn Logger>>,
}

impl DispatcherBuilder {
    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the transport namespace topics are published under.
    #[must_use]
    pub fn channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.channel_prefix = prefix.into();
        self
    }

    /// Sets how long a delivery may wait for queue space.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets each subscription's queue capacity (at least 1).
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity.max(1);
        self
    }

    /// Uses a custom logger.
    #[must_use]
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Uses the built-in logger, emitting.
    #[must_use]
    pub fn enable_logging(mut self) -> Self {
        self.config.logging_enabled = true;
        self.logger = None;
        self
    }

    /// Uses the built-in logger, silent.
    #[must_use]
    pub fn disable_logging(mut self) -> Self {
        self.config.logging_enabled = false;
        self.logger = None;
        self
    }

    /// Builds a stopped [`Dispatcher`].
    #[must_use]
    pub fn build(self) -> Dispatcher {
        let logger = self.logger.unwrap_or_else(|| {
            let builtin = if self.config.logging_enabled {
                TracingLogger::enabled()
            } else {
                TracingLogger::disabled()
            };
            Arc::new(builtin)
        });
        let tasks = TaskTracker::new();
        tasks.close();
        Dispatcher {
            shared: Arc::new(Shared {
                config: self.config,
                logger,
                state: RwLock::new(RouterState::default()),
                lifecycle: Mutex::new(()),
                tasks,
            }),
            transport: self.transport,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::logging::testing::{Level, RecordingLogger};
    use crate::transport::{MemoryTransport, TransportError};

    const WAIT: Duration = Duration::from_secs(2);

    fn router(transport: &MemoryTransport) -> Dispatcher {
        Dispatcher::builder(transport.clone())
            .channel_prefix("app")
            .timeout(Duration::from_millis(500))
            .build()
    }

    async fn started(transport: &MemoryTransport) -> Dispatcher {
        let router = router(transport);
        let Ok(()) = router.start().await else {
            panic!("start failed");
        };
        router
    }

    async fn next<T>(sub: &mut Subscription<T>) -> Option<T> {
        tokio::time::timeout(WAIT, sub.recv()).await.ok().flatten()
    }

    /// Lets the listen task pick up published events, then waits for every
    /// cast and delivery they spawned.
    async fn settle(router: &Dispatcher) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        router.wait_idle().await;
    }

    #[tokio::test]
    async fn end_to_end_structured_delivery() {
        let transport = MemoryTransport::new();
        let router = started(&transport).await;
        let Ok(mut sub) = router.subscribe(r"^orders\.\d+$").await else {
            panic!("subscribe failed");
        };

        let Ok(()) = router.publish("orders.42", "{}").await else {
            panic!("publish failed");
        };

        let Some(msg) = next(&mut sub).await else {
            panic!("expected a message");
        };
        assert_eq!(msg.topic, "orders.42");
        assert_eq!(msg.pattern, r"^orders\.\d+$");
        assert_eq!(msg.payload, Bytes::from_static(b"{}"));
        assert_eq!(msg.full_match(), Some("orders.42"));
        router.stop().await;
    }

    #[tokio::test]
    async fn capture_groups_are_delivered_in_order() {
        let transport = MemoryTransport::new();
        let router = started(&transport).await;
        let Ok(mut sub) = router.subscribe(r"(\w+)\.(\d+)").await else {
            panic!("subscribe failed");
        };
        let Ok(()) = router.publish("eu/orders.7", Bytes::new()).await else {
            panic!("publish failed");
        };

        let Some(msg) = next(&mut sub).await else {
            panic!("expected a message");
        };
        assert_eq!(
            msg.matches,
            vec!["orders.7".to_string(), "orders".to_string(), "7".to_string()]
        );
    }

    #[tokio::test]
    async fn raw_subscription_receives_payload_only() {
        let transport = MemoryTransport::new();
        let router = started(&transport).await;
        let Ok(mut raw) = router.subscribe_raw("^metrics").await else {
            panic!("subscribe failed");
        };
        let Ok(()) = router.publish("metrics.cpu", "0.93").await else {
            panic!("publish failed");
        };
        let received = tokio::time::timeout(WAIT, raw.messages().next())
            .await
            .ok()
            .flatten();
        assert_eq!(received, Some(Bytes::from_static(b"0.93")));
        assert!(raw.is_empty());
    }

    #[tokio::test]
    async fn invalid_pattern_leaves_table_unchanged() {
        let transport = MemoryTransport::new();
        let router = started(&transport).await;

        let result = router.subscribe("[").await;
        assert!(matches!(result, Err(RouterError::InvalidPattern { .. })));
        assert_eq!(router.pattern_count().await, 0);

        assert!(router.subscribe("^fresh$").await.is_ok());
        assert_eq!(router.pattern_count().await, 1);
    }

    #[tokio::test]
    async fn subscribe_requires_running() {
        let transport = MemoryTransport::new();
        let router = router(&transport);
        assert!(matches!(
            router.subscribe("a").await,
            Err(RouterError::Stopped)
        ));

        let Ok(()) = router.start().await else {
            panic!("start failed");
        };
        router.stop().await;
        assert!(matches!(
            router.subscribe_raw("a").await,
            Err(RouterError::Stopped)
        ));
    }

    #[tokio::test]
    async fn sibling_subscriptions_receive_independent_messages() {
        let transport = MemoryTransport::new();
        let router = started(&transport).await;
        let (Ok(mut first), Ok(mut second)) =
            (router.subscribe("^a$").await, router.subscribe("^a$").await)
        else {
            panic!("subscribe failed");
        };
        assert_ne!(first.id(), second.id());
        assert_eq!(router.pattern_count().await, 1);
        assert_eq!(router.subscription_count().await, 2);

        let Ok(()) = router.publish("a", "one").await else {
            panic!("publish failed");
        };
        let (Some(mut m1), Some(m2)) = (next(&mut first).await, next(&mut second).await) else {
            panic!("both subscribers should receive");
        };
        m1.topic.push_str("-mutated");
        assert_eq!(m2.topic, "a");
        assert_eq!(m2.payload, Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_target() {
        let transport = MemoryTransport::new();
        let router = started(&transport).await;
        let (Ok(mut target), Ok(mut sibling)) =
            (router.subscribe("^a$").await, router.subscribe("^a$").await)
        else {
            panic!("subscribe failed");
        };

        router.unsubscribe(&target).await;
        assert_eq!(router.subscription_count().await, 1);
        assert!(next(&mut target).await.is_none());
        router.wait_idle().await;
        assert!(target.is_closed());

        let Ok(()) = router.publish("a", "still here").await else {
            panic!("publish failed");
        };
        assert!(next(&mut sibling).await.is_some());

        router.unsubscribe(&sibling).await;
        assert_eq!(router.pattern_count().await, 0);
        let Ok(()) = router.publish("a", "nobody").await else {
            panic!("publish failed");
        };
        settle(&router).await;
        assert!(sibling.try_recv().is_none());
        assert!(target.try_recv().is_none());
    }

    #[tokio::test]
    async fn unsubscribe_twice_and_after_stop_is_safe() {
        let transport = MemoryTransport::new();
        let router = started(&transport).await;
        let Ok(mut sub) = router.subscribe("x").await else {
            panic!("subscribe failed");
        };
        router.unsubscribe(&sub).await;
        router.unsubscribe(&sub).await;
        router.stop().await;
        router.unsubscribe(&sub).await;
        router.wait_idle().await;
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn stop_closes_live_subscriptions() {
        let transport = MemoryTransport::new();
        let router = started(&transport).await;
        let (Ok(mut structured), Ok(mut raw)) =
            (router.subscribe("^a").await, router.subscribe_raw("^b").await)
        else {
            panic!("subscribe failed");
        };
        assert_eq!(transport.feed_count().await, 1);

        router.stop().await;
        assert!(!router.is_running().await);
        assert_eq!(router.pattern_count().await, 0);
        assert_eq!(transport.feed_count().await, 0);

        assert!(next(&mut structured).await.is_none());
        assert!(next(&mut raw).await.is_none());
        router.wait_idle().await;
        assert!(structured.is_closed());
        assert!(raw.is_closed());

        let Ok(()) = transport.publish("app/a", Bytes::new()).await else {
            panic!("publish failed");
        };
        settle(&router).await;
        assert!(structured.try_recv().is_none());
    }

    #[tokio::test]
    async fn lifecycle_is_guarded_and_restartable() {
        let transport = MemoryTransport::new();
        let router = started(&transport).await;
        assert!(matches!(
            router.start().await,
            Err(RouterError::AlreadyRunning)
        ));

        router.stop().await;
        router.stop().await;
        assert!(!router.is_running().await);

        let Ok(()) = router.start().await else {
            panic!("restart failed");
        };
        let Ok(mut sub) = router.subscribe("^again$").await else {
            panic!("subscribe failed");
        };
        let Ok(()) = router.publish("again", "x").await else {
            panic!("publish failed");
        };
        assert!(next(&mut sub).await.is_some());
        assert_eq!(transport.feed_count().await, 1);
    }

    #[tokio::test]
    async fn publish_uses_prefixed_channel() {
        let transport = MemoryTransport::new();
        let router = router(&transport);
        let Ok(mut feed) = transport.psubscribe("app/*").await else {
            panic!("psubscribe failed");
        };

        let Ok(()) = router.publish("orders.1", "p").await else {
            panic!("publish failed");
        };
        let event = tokio::time::timeout(WAIT, feed.events.next()).await.ok().flatten();
        let Some(event) = event else {
            panic!("expected an event");
        };
        assert_eq!(event.channel, "app/orders.1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn saturated_queue_drops_with_critical_log() {
        let transport = MemoryTransport::new();
        let logger = Arc::new(RecordingLogger::default());
        let router = Dispatcher::builder(transport.clone())
            .channel_prefix("app")
            .queue_capacity(1)
            .timeout(Duration::from_millis(50))
            .logger(Arc::clone(&logger) as Arc<dyn Logger>)
            .build();
        let Ok(()) = router.start().await else {
            panic!("start failed");
        };
        let Ok(mut sub) = router.subscribe("^slow$").await else {
            panic!("subscribe failed");
        };

        let Ok(()) = router.publish("slow", "first").await else {
            panic!("publish failed");
        };
        let Ok(()) = router.publish("slow", "second").await else {
            panic!("publish failed");
        };

        let drained = tokio::time::timeout(WAIT, settle(&router)).await;
        assert!(drained.is_ok(), "dispatch must not block beyond the timeout");

        let crit = logger.at(Level::Crit);
        assert_eq!(crit.len(), 1);
        assert!(crit.iter().all(|line| line.contains("^slow$")));
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropped_handle_degrades_to_warning() {
        let transport = MemoryTransport::new();
        let logger = Arc::new(RecordingLogger::default());
        let router = Dispatcher::builder(transport.clone())
            .logger(Arc::clone(&logger) as Arc<dyn Logger>)
            .build();
        let Ok(()) = router.start().await else {
            panic!("start failed");
        };
        let Ok(sub) = router.subscribe("gone").await else {
            panic!("subscribe failed");
        };
        drop(sub);

        let Ok(()) = router.publish("gone", "x").await else {
            panic!("publish failed");
        };
        settle(&router).await;
        assert_eq!(logger.at(Level::Warn).len(), 1);
        assert!(logger.at(Level::Crit).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn table_mutation_during_dispatch_keeps_stable_subscriber() {
        let transport = MemoryTransport::new();
        let router = started(&transport).await;
        let Ok(mut stable) = router.subscribe("^load$").await else {
            panic!("subscribe failed");
        };

        let churn_router = router.clone();
        let churn = tokio::spawn(async move {
            for _ in 0..50 {
                if let Ok(sub) = churn_router.subscribe("^load$").await {
                    churn_router.unsubscribe(&sub).await;
                }
            }
        });
        for i in 0..100 {
            let Ok(()) = router.publish("load", format!("{i}")).await else {
                panic!("publish failed");
            };
        }
        let Ok(()) = churn.await else {
            panic!("churn task failed");
        };

        let mut received = 0;
        while received < 100 {
            if next(&mut stable).await.is_none() {
                break;
            }
            received += 1;
        }
        assert_eq!(received, 100);
        assert_eq!(router.subscription_count().await, 1);
    }

    #[derive(Debug)]
    struct BrokenHandle;

    #[async_trait]
    impl FeedHandle for BrokenHandle {
        async fn close(&self) -> Result<(), TransportError> {
            Err(TransportError::Backend("connection reset".into()))
        }
    }

    /// Wraps a memory transport whose feeds refuse to close and whose
    /// publishes fail.
    #[derive(Debug)]
    struct BrokenTransport(MemoryTransport);

    #[async_trait]
    impl Transport for BrokenTransport {
        async fn psubscribe(&self, wildcard: &str) -> Result<PatternFeed, TransportError> {
            let feed = self.0.psubscribe(wildcard).await?;
            Ok(PatternFeed {
                events: feed.events,
                handle: Box::new(BrokenHandle),
            })
        }

        async fn publish(&self, _channel: &str, _payload: Bytes) -> Result<(), TransportError> {
            Err(TransportError::Closed)
        }
    }

    /// Feed handle that takes a while before closing the underlying feed.
    #[derive(Debug)]
    struct SlowHandle(Box<dyn FeedHandle>);

    #[async_trait]
    impl FeedHandle for SlowHandle {
        async fn close(&self) -> Result<(), TransportError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.0.close().await
        }
    }

    #[derive(Debug)]
    struct SlowTransport(MemoryTransport);

    #[async_trait]
    impl Transport for SlowTransport {
        async fn psubscribe(&self, wildcard: &str) -> Result<PatternFeed, TransportError> {
            let feed = self.0.psubscribe(wildcard).await?;
            Ok(PatternFeed {
                events: feed.events,
                handle: Box::new(SlowHandle(feed.handle)),
            })
        }

        async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), TransportError> {
            self.0.publish(channel, payload).await
        }
    }

    async fn slow_started(memory: &MemoryTransport) -> Dispatcher {
        let router = Dispatcher::builder(SlowTransport(memory.clone())).build();
        let Ok(()) = router.start().await else {
            panic!("start failed");
        };
        router
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_stop_waits_for_stop_in_progress() {
        let memory = MemoryTransport::new();
        let router = slow_started(&memory).await;

        let first = {
            let router = router.clone();
            tokio::spawn(async move { router.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        router.stop().await;
        assert!(!router.is_running().await);
        assert_eq!(memory.feed_count().await, 0);
        let Ok(()) = first.await else {
            panic!("first stop panicked");
        };

        let Ok(()) = router.start().await else {
            panic!("restart failed");
        };
        let Ok(mut sub) = router.subscribe("^fresh$").await else {
            panic!("subscribe failed");
        };
        router.wait_idle().await;
        assert!(!sub.is_closed());
        assert_eq!(memory.feed_count().await, 1);

        let Ok(()) = router.publish("fresh", "x").await else {
            panic!("publish failed");
        };
        assert!(next(&mut sub).await.is_some());

        router.stop().await;
        assert_eq!(memory.feed_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn start_racing_stop_runs_after_it() {
        let memory = MemoryTransport::new();
        let router = slow_started(&memory).await;

        let stopping = {
            let router = router.clone();
            tokio::spawn(async move { router.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let Ok(()) = router.start().await else {
            panic!("start after stop failed");
        };
        let Ok(()) = stopping.await else {
            panic!("stop panicked");
        };

        let Ok(sub) = router.subscribe("^live$").await else {
            panic!("subscribe failed");
        };
        router.wait_idle().await;
        assert!(router.is_running().await);
        assert!(!sub.is_closed());
        assert_eq!(memory.feed_count().await, 1);

        assert!(matches!(
            router.start().await,
            Err(RouterError::AlreadyRunning)
        ));
        assert_eq!(memory.feed_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stops_close_everything_once() {
        let memory = MemoryTransport::new();
        let router = slow_started(&memory).await;
        let Ok(mut sub) = router.subscribe("a").await else {
            panic!("subscribe failed");
        };

        tokio::join!(router.stop(), router.stop(), router.stop());
        assert!(!router.is_running().await);
        assert_eq!(memory.feed_count().await, 0);
        assert!(next(&mut sub).await.is_none());
    }

    #[tokio::test]
    async fn wait_idle_is_reusable() {
        let memory = MemoryTransport::new();
        let router = started(&memory).await;
        let Ok(mut sub) = router.subscribe("^tick$").await else {
            panic!("subscribe failed");
        };
        for round in 0..3 {
            let Ok(()) = router.publish("tick", format!("{round}")).await else {
                panic!("publish failed");
            };
            settle(&router).await;
            assert_eq!(router.in_flight(), 0);
            assert!(sub.try_recv().is_some());
        }
    }

    #[tokio::test]
    async fn transport_close_failure_is_logged_and_stop_completes() {
        let logger = Arc::new(RecordingLogger::default());
        let router = Dispatcher::builder(BrokenTransport(MemoryTransport::new()))
            .logger(Arc::clone(&logger) as Arc<dyn Logger>)
            .build();
        let Ok(()) = router.start().await else {
            panic!("start failed");
        };
        let Ok(mut sub) = router.subscribe("a").await else {
            panic!("subscribe failed");
        };

        let stopped = tokio::time::timeout(WAIT, router.stop()).await;
        assert!(stopped.is_ok(), "stop must not hang on a failed close");
        assert!(!router.is_running().await);
        assert!(
            logger
                .at(Level::Error)
                .iter()
                .any(|line| line.contains("error closing subscriber"))
        );
        assert!(next(&mut sub).await.is_none());
    }

    #[tokio::test]
    async fn publish_error_is_propagated() {
        let router = Dispatcher::new(
            BrokenTransport(MemoryTransport::new()),
            RouterConfig::default(),
        );
        let result = router.publish("a", "x").await;
        assert!(matches!(
            result,
            Err(RouterError::Transport(TransportError::Closed))
        ));
    }

    #[tokio::test]
    async fn start_failure_leaves_dispatcher_stopped() {
        let router = Dispatcher::builder(MemoryTransport::new())
            .channel_prefix("bad[")
            .build();
        assert!(matches!(
            router.start().await,
            Err(RouterError::Transport(TransportError::InvalidWildcard { .. }))
        ));
        assert!(!router.is_running().await);
    }

    #[test]
    fn builder_applies_options() {
        let router = Dispatcher::builder(MemoryTransport::new())
            .channel_prefix("svc")
            .timeout(Duration::from_millis(10))
            .queue_capacity(0)
            .enable_logging()
            .build();
        let cfg = router.config();
        assert_eq!(cfg.channel_prefix, "svc");
        assert_eq!(cfg.timeout, Duration::from_millis(10));
        assert_eq!(cfg.queue_capacity, 1);
        assert!(cfg.logging_enabled);
        assert_eq!(router.in_flight(), 0);
    }
}
