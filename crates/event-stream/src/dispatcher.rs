//! Event dispatch.
//!
//! Resolves the subscriber snapshot for an event's topic and spawns one task
//! per handler. Each task catches panics and turns them into a
//! [`HandlerFailure`] recorded in the dead-letter sink, so a failing handler
//! never reaches its siblings, the worker, or the process. Dispatch does not
//! wait for handlers to finish.

use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::HandlerFailure;
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::stats::StreamMetrics;
use crate::types::Event;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Fans events out to their topic's subscribers.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    sink: Arc<dyn DeadLetterSink>,
    metrics: Arc<StreamMetrics>,
    context: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        sink: Arc<dyn DeadLetterSink>,
        metrics: Arc<StreamMetrics>,
        context: CancellationToken,
    ) -> Self {
        Self {
            registry,
            sink,
            metrics,
            context,
        }
    }

    /// Deliver one event to every current subscriber of its topic.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, event: Event) {
        StreamMetrics::incr(&self.metrics.events_dispatched);

        let subscriptions = self.registry.lookup(event.topic());
        if subscriptions.is_empty() {
            tracing::warn!(
                topic = %event.topic(),
                event_message = %event.payload(),
                "No subscribers for topic"
            );
            StreamMetrics::incr(&self.metrics.events_unroutable);
            self.sink.record(DeadLetter::no_subscribers(&event));
            return;
        }

        tracing::debug!(
            topic = %event.topic(),
            event_id = %event.id(),
            priority = %event.priority(),
            subscribers = subscriptions.len(),
            "Dispatching event"
        );

        let event = Arc::new(event);
        for subscription in subscriptions {
            self.spawn_invocation(subscription, Arc::clone(&event));
        }
    }

    fn spawn_invocation(&self, subscription: Subscription, event: Arc<Event>) {
        StreamMetrics::incr(&self.metrics.handler_invocations);

        let handler = subscription.handler();
        let ctx = self.context.clone();
        let sink = Arc::clone(&self.sink);
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            let payload = event.payload().clone();
            let invocation = async { handler.handle(ctx, payload).await };

            if let Err(panic) = AssertUnwindSafe(invocation).catch_unwind().await {
                let failure = HandlerFailure::from_panic(event.topic(), panic);
                tracing::error!(
                    topic = %event.topic(),
                    subscription_id = %subscription.id(),
                    error = %failure,
                    event_message = %event.payload(),
                    "Event handler panicked"
                );
                StreamMetrics::incr(&metrics.handler_failures);
                sink.record(DeadLetter::handler_failure(&event, subscription.id(), &failure));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::{DeadLetterReason, MemorySink};
    use crate::handler::handler_fn;
    use crate::types::Priority;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn dispatcher(registry: Arc<SubscriptionRegistry>, sink: MemorySink) -> Dispatcher {
        Dispatcher::new(
            registry,
            Arc::new(sink),
            Arc::new(StreamMetrics::default()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_dispatch_without_subscribers_dead_letters() {
        let sink = MemorySink::new();
        let dispatcher = dispatcher(Arc::new(SubscriptionRegistry::new()), sink.clone());

        dispatcher.dispatch(Event::new("nobody", "hello", Priority::Medium));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, DeadLetterReason::NoSubscribers);
        assert_eq!(records[0].payload, json!("hello"));
        assert_eq!(
            dispatcher.metrics.events_unroutable.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_dispatch_reaches_every_subscriber() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..3 {
            let tx = tx.clone();
            registry.subscribe(
                "t",
                Arc::new(handler_fn(move |_ctx, payload| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send((i, payload));
                    }
                })),
            );
        }

        let sink = MemorySink::new();
        dispatcher(registry, sink.clone()).dispatch(Event::new("t", 7, Priority::High));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let (i, payload) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(payload, json!(7));
            seen.push(i);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let failing = registry.subscribe(
            "panic_topic",
            Arc::new(handler_fn(|_ctx, _payload| async move {
                panic!("Oops! Something went wrong in the handler!");
            })),
        );
        registry.subscribe(
            "panic_topic",
            Arc::new(handler_fn(move |_ctx, payload| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(payload);
                }
            })),
        );

        let sink = MemorySink::new();
        let dispatcher = dispatcher(registry, sink.clone());
        dispatcher.dispatch(Event::new("panic_topic", "Faulty data", Priority::High));

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(json!("Faulty data")));

        tokio::time::timeout(Duration::from_secs(1), async {
            while sink.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, DeadLetterReason::HandlerFailure);
        assert_eq!(records[0].subscription_id, Some(failing.id()));
        assert!(records[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Oops! Something went wrong"));
    }
}
