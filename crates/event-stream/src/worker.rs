//! Tier queues and worker pools.
//!
//! Each priority tier has one bounded queue served by a fixed pool of worker
//! tasks. Workers of a tier share the queue receiver and take one event at a
//! time, so events leave a queue in FIFO order. A worker exits once its queue
//! is closed and drained.
//!
//! ```text
//!   produce ──try_send──► [high queue]   ─► N workers ─┐
//!           ──try_send──► [medium queue] ─► N workers ─┼─► Dispatcher
//!           ──try_send──► [low queue]    ─► N workers ─┘
//! ```
//!
//! Pools start in the order high, medium, low with a short stagger between
//! them. The stagger only biases the first moments after start-up toward
//! higher tiers; it is not an ordering guarantee.

use crate::dispatcher::Dispatcher;
use crate::stats::StreamMetrics;
use crate::types::{Event, Priority};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

type SharedReceiver = Arc<Mutex<mpsc::Receiver<Event>>>;

/// Producer side of the three tier queues.
///
/// Dropping it closes every queue.
#[derive(Debug)]
pub(crate) struct TierQueues {
    high: mpsc::Sender<Event>,
    medium: mpsc::Sender<Event>,
    low: mpsc::Sender<Event>,
}

impl TierQueues {
    /// Queue for a tier.
    pub fn sender(&self, priority: Priority) -> &mpsc::Sender<Event> {
        match priority {
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }
}

/// Consumer side of the three tier queues, in start-up order.
pub(crate) struct TierReceivers {
    tiers: [(Priority, SharedReceiver); 3],
}

/// Create the three bounded tier queues.
pub(crate) fn tier_queues(capacity: usize) -> (TierQueues, TierReceivers) {
    let (high_tx, high_rx) = mpsc::channel(capacity);
    let (medium_tx, medium_rx) = mpsc::channel(capacity);
    let (low_tx, low_rx) = mpsc::channel(capacity);

    let queues = TierQueues {
        high: high_tx,
        medium: medium_tx,
        low: low_tx,
    };
    let receivers = TierReceivers {
        tiers: [
            (Priority::High, Arc::new(Mutex::new(high_rx))),
            (Priority::Medium, Arc::new(Mutex::new(medium_rx))),
            (Priority::Low, Arc::new(Mutex::new(low_rx))),
        ],
    };

    (queues, receivers)
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolSettings {
    pub workers_per_priority: usize,
    pub tier_stagger: Duration,
}

/// Start every tier's worker pool.
///
/// Returns a handle that completes once all workers of all tiers have
/// exited. A cancelled `shutdown` token skips any remaining stagger delay so
/// the later pools start immediately and drain their queues.
pub(crate) fn start_pools(
    settings: PoolSettings,
    receivers: TierReceivers,
    dispatcher: Dispatcher,
    metrics: Arc<StreamMetrics>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut workers = JoinSet::new();

        for (tier, (priority, rx)) in receivers.tiers.into_iter().enumerate() {
            if tier > 0 && !settings.tier_stagger.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(settings.tier_stagger) => {}
                    _ = shutdown.cancelled() => {}
                }
            }

            for worker_id in 0..settings.workers_per_priority {
                metrics.worker_started();
                workers.spawn(run_worker(
                    priority,
                    worker_id,
                    Arc::clone(&rx),
                    dispatcher.clone(),
                    Arc::clone(&metrics),
                ));
            }
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Event worker terminated abnormally");
            }
        }
    })
}

async fn run_worker(
    priority: Priority,
    worker_id: usize,
    rx: SharedReceiver,
    dispatcher: Dispatcher,
    metrics: Arc<StreamMetrics>,
) {
    tracing::debug!(priority = %priority, worker_id, "Starting event worker");

    loop {
        let next = rx.lock().await.recv().await;
        match next {
            Some(event) => dispatcher.dispatch(event),
            None => break,
        }
    }

    metrics.worker_stopped();
    tracing::debug!(priority = %priority, worker_id, "Event worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::MemorySink;
    use crate::handler::handler_fn;
    use crate::registry::SubscriptionRegistry;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn setup(
        registry: Arc<SubscriptionRegistry>,
    ) -> (Dispatcher, Arc<StreamMetrics>, MemorySink) {
        let sink = MemorySink::new();
        let metrics = Arc::new(StreamMetrics::default());
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(sink.clone()),
            Arc::clone(&metrics),
            CancellationToken::new(),
        );
        (dispatcher, metrics, sink)
    }

    #[test]
    fn test_sender_per_tier() {
        let (queues, _receivers) = tier_queues(4);
        assert!(!queues.sender(Priority::High).same_channel(queues.sender(Priority::Low)));
        assert_eq!(queues.sender(Priority::Medium).max_capacity(), 4);
    }

    #[tokio::test]
    async fn test_try_send_reports_full_queue() {
        let (queues, _receivers) = tier_queues(1);
        let sender = queues.sender(Priority::Low);

        assert!(sender.try_send(Event::new("t", 1, Priority::Low)).is_ok());
        assert!(matches!(
            sender.try_send(Event::new("t", 2, Priority::Low)),
            Err(mpsc::error::TrySendError::Full(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pools_drain_and_exit_when_queues_close() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe(
            "t",
            Arc::new(handler_fn(move |_ctx, payload| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(payload);
                }
            })),
        );

        let (dispatcher, metrics, sink) = setup(registry);
        let (queues, receivers) = tier_queues(16);

        for (i, priority) in [Priority::Low, Priority::Medium, Priority::High]
            .into_iter()
            .enumerate()
        {
            queues
                .sender(priority)
                .try_send(Event::new("t", i, priority))
                .unwrap();
        }

        let settings = PoolSettings {
            workers_per_priority: 2,
            tier_stagger: Duration::from_millis(1),
        };
        let handle = start_pools(
            settings,
            receivers,
            dispatcher,
            Arc::clone(&metrics),
            CancellationToken::new(),
        );

        drop(queues);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(metrics.active_workers.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.events_dispatched.load(Ordering::Relaxed), 3);

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(
                tokio::time::timeout(Duration::from_secs(1), rx.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        received.sort_by_key(|v| v.as_u64());
        assert_eq!(received, vec![json!(0), json!(1), json!(2)]);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_skips_stagger() {
        let (dispatcher, metrics, _sink) = setup(Arc::new(SubscriptionRegistry::new()));
        let (queues, receivers) = tier_queues(4);

        let shutdown = CancellationToken::new();
        let settings = PoolSettings {
            workers_per_priority: 1,
            tier_stagger: Duration::from_secs(3600),
        };
        let handle = start_pools(settings, receivers, dispatcher, metrics, shutdown.clone());

        shutdown.cancel();
        drop(queues);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
