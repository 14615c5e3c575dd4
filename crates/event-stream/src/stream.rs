//! Event stream lifecycle and public API.
//!
//! An [`EventStream`] owns the subscription registry, the three tier queues
//! with their worker pools, and the dead-letter sink. It is constructed
//! explicitly, shared by cloning the handle, and shut down with
//! [`EventStream::stop`].
//!
//! ## Lifecycle
//!
//! ```text
//! NotStarted ──start──► Running ──stop──► StopRequested ──drained──► Stopped
//! ```
//!
//! - `produce` is accepted only while `Running`. Afterwards events are
//!   discarded with a warning and are not dead-lettered.
//! - `stop` closes the queues, waits for every worker to drain and exit,
//!   cancels the handler context and closes the dead-letter sink. Calling it
//!   again logs a warning and waits for the first call to finish.
//! - A stopped stream cannot be restarted.

use crate::config::StreamConfig;
use crate::dead_letter::{DeadLetter, DeadLetterSink, JsonLinesSink};
use crate::dispatcher::Dispatcher;
use crate::error::StreamResult;
use crate::handler::{handler_fn, EventHandler};
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::stats::{StreamMetrics, StreamStats};
use crate::types::{Event, Payload, Priority};
use crate::worker::{start_pools, tier_queues, PoolSettings, TierQueues};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Queues and workers not yet created
    NotStarted,
    /// Accepting events
    Running,
    /// Stop called; queues closed and draining
    StopRequested,
    /// All workers exited. Terminal.
    Stopped,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamState::NotStarted,
            1 => StreamState::Running,
            2 => StreamState::StopRequested,
            _ => StreamState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            StreamState::NotStarted => 0,
            StreamState::Running => 1,
            StreamState::StopRequested => 2,
            StreamState::Stopped => 3,
        }
    }
}

struct Inner {
    config: StreamConfig,
    registry: Arc<SubscriptionRegistry>,
    sink: Arc<dyn DeadLetterSink>,
    metrics: Arc<StreamMetrics>,
    queues: RwLock<Option<TierQueues>>,
    state: AtomicU8,
    shutdown: CancellationToken,
    context: CancellationToken,
    workers: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    stopped: watch::Sender<bool>,
}

/// In-process publish/subscribe event stream with priority tiers.
///
/// Cloning is cheap and yields another handle to the same stream.
///
/// # Example
///
/// ```rust,no_run
/// use event_stream::{EventStream, Priority, StreamConfig};
///
/// # async fn example() -> Result<(), event_stream::StreamError> {
/// let stream = EventStream::start(StreamConfig::default())?;
///
/// let sub = stream.subscribe_fn("user_created", |_ctx, payload| async move {
///     println!("Received user_created event: {payload}");
/// });
///
/// stream.produce("user_created", "Alice", Priority::High);
///
/// stream.unsubscribe(&sub);
/// stream.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EventStream {
    inner: Arc<Inner>,
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl EventStream {
    /// Create a builder.
    pub fn builder() -> EventStreamBuilder {
        EventStreamBuilder::default()
    }

    /// Start a stream with the given configuration.
    ///
    /// Dead letters go to `config.dead_letter_path`, or standard error if
    /// that file cannot be opened. Must be called inside a tokio runtime.
    pub fn start(config: StreamConfig) -> StreamResult<Self> {
        Self::builder().config(config).start()
    }

    /// Start a stream configured from environment variables.
    ///
    /// See [`StreamConfig::from_env`].
    pub fn from_env() -> StreamResult<Self> {
        Self::start(StreamConfig::from_env())
    }

    /// Produce an event. Never blocks and never fails.
    ///
    /// If the tier queue is full the event is dropped and dead-lettered. If
    /// the stream is stopping or stopped the event is discarded with a
    /// warning.
    pub fn produce(&self, topic: impl Into<String>, payload: impl Into<Payload>, priority: Priority) {
        let event = Event::new(topic, payload, priority);

        let queues = self
            .inner
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(queues) = queues.as_ref().filter(|_| self.state() == StreamState::Running) else {
            self.reject(&event);
            return;
        };

        match queues.sender(priority).try_send(event) {
            Ok(()) => StreamMetrics::incr(&self.inner.metrics.events_produced),
            Err(TrySendError::Full(event)) => {
                tracing::error!(
                    topic = %event.topic(),
                    priority = %priority,
                    event_message = %event.payload(),
                    channel_capacity = self.inner.config.queue_capacity,
                    "Event channel is full, event sent to dead letter"
                );
                StreamMetrics::incr(&self.inner.metrics.events_dropped);
                self.inner.sink.record(DeadLetter::queue_full(&event));
            }
            Err(TrySendError::Closed(event)) => self.reject(&event),
        }
    }

    fn reject(&self, event: &Event) {
        tracing::warn!(
            topic = %event.topic(),
            priority = %event.priority(),
            "Attempted to emit event after stream stop signal"
        );
        StreamMetrics::incr(&self.inner.metrics.events_rejected);
    }

    /// Subscribe a handler to a topic.
    ///
    /// Keep the returned handle to unsubscribe later.
    pub fn subscribe(&self, topic: &str, handler: impl EventHandler + 'static) -> Subscription {
        self.inner.registry.subscribe(topic, Arc::new(handler))
    }

    /// Subscribe an already shared handler to a topic.
    pub fn subscribe_shared(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Subscription {
        self.inner.registry.subscribe(topic, handler)
    }

    /// Subscribe an async closure to a topic.
    pub fn subscribe_fn<F, Fut>(&self, topic: &str, f: F) -> Subscription
    where
        F: Fn(CancellationToken, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(topic, handler_fn(f))
    }

    /// Remove a subscription.
    ///
    /// Unsubscribing an unknown or already removed subscription only logs a
    /// warning.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.inner.registry.unsubscribe(subscription);
    }

    /// Stop the stream and wait for every worker to exit.
    ///
    /// Events already queued are still dispatched. Handler tasks spawned
    /// before or during the drain are not awaited; their context is
    /// cancelled once the workers are gone. Only the first call has any
    /// effect; later or concurrent calls wait until the stream is stopped.
    pub async fn stop(&self) {
        let transition = self.inner.state.compare_exchange(
            StreamState::Running.as_u8(),
            StreamState::StopRequested.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if transition.is_err() {
            tracing::warn!(state = ?self.state(), "Stop already called on event stream");
            self.wait_stopped().await;
            return;
        }

        tracing::info!("Event stream received stop signal. Closing channels...");
        self.inner.shutdown.cancel();
        drop(
            self.inner
                .queues
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        tracing::info!("Waiting for all workers to finish...");
        let workers = self.inner.workers.lock().await.take();
        if let Some(workers) = workers {
            if let Err(e) = workers.await {
                tracing::error!(error = %e, "Worker pool terminated abnormally");
            }
        }

        self.inner.context.cancel();

        let sink = Arc::clone(&self.inner.sink);
        if let Err(e) = tokio::task::spawn_blocking(move || sink.close()).await {
            tracing::error!(error = %e, "Failed to close dead letter sink");
        }

        self.inner
            .state
            .store(StreamState::Stopped.as_u8(), Ordering::SeqCst);
        self.inner.stopped.send_replace(true);
        tracing::info!("All event stream workers have shut down");
    }

    async fn wait_stopped(&self) {
        let mut stopped = self.inner.stopped.subscribe();
        while !*stopped.borrow_and_update() {
            if stopped.changed().await.is_err() {
                break;
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// True while events are accepted.
    pub fn is_running(&self) -> bool {
        self.state() == StreamState::Running
    }

    /// Stream configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Number of subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.registry.subscriber_count(topic)
    }

    /// Get stream statistics.
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            topics: self.inner.registry.topic_count(),
            active_subscriptions: self.inner.registry.subscription_count(),
            ..self.inner.metrics.snapshot()
        }
    }
}

/// Builder for [`EventStream`].
#[derive(Default)]
pub struct EventStreamBuilder {
    config: StreamConfig,
    sink: Option<Arc<dyn DeadLetterSink>>,
    context: Option<CancellationToken>,
}

impl fmt::Debug for EventStreamBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamBuilder")
            .field("config", &self.config)
            .field("custom_sink", &self.sink.is_some())
            .finish()
    }
}

impl EventStreamBuilder {
    /// Set the configuration.
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom dead-letter sink instead of the configured file.
    pub fn dead_letter_sink(mut self, sink: impl DeadLetterSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Parent cancellation context for handler invocations.
    ///
    /// Handlers receive a child of this token; cancelling it signals every
    /// handler without stopping the stream.
    pub fn context(mut self, token: CancellationToken) -> Self {
        self.context = Some(token);
        self
    }

    /// Create the queues and start the worker pools.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> StreamResult<EventStream> {
        self.config.validate()?;

        let config = self.config;
        let sink: Arc<dyn DeadLetterSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(JsonLinesSink::open_or_stderr(&config.dead_letter_path)),
        };
        let context = self
            .context
            .map(|parent| parent.child_token())
            .unwrap_or_else(CancellationToken::new);

        let registry = Arc::new(SubscriptionRegistry::new());
        let metrics = Arc::new(StreamMetrics::default());
        let shutdown = CancellationToken::new();
        let state = AtomicU8::new(StreamState::NotStarted.as_u8());

        let (queues, receivers) = tier_queues(config.queue_capacity);
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&sink),
            Arc::clone(&metrics),
            context.clone(),
        );
        let workers = start_pools(
            PoolSettings {
                workers_per_priority: config.workers_per_priority,
                tier_stagger: config.tier_stagger,
            },
            receivers,
            dispatcher,
            Arc::clone(&metrics),
            shutdown.clone(),
        );
        state.store(StreamState::Running.as_u8(), Ordering::SeqCst);

        tracing::info!(
            queue_capacity = config.queue_capacity,
            workers_per_priority = config.workers_per_priority,
            tier_stagger_ms = u64::try_from(config.tier_stagger.as_millis()).unwrap_or(u64::MAX),
            "Event stream started"
        );

        Ok(EventStream {
            inner: Arc::new(Inner {
                config,
                registry,
                sink,
                metrics,
                queues: RwLock::new(Some(queues)),
                state,
                shutdown,
                context,
                workers: tokio::sync::Mutex::new(Some(workers)),
                stopped: watch::Sender::new(false),
            }),
        })
    }
}
