//! Subscription registry.
//!
//! Maps each topic to its subscriptions in insertion order. A topic is
//! present only while it has at least one subscription. All access goes
//! through a single reader/writer lock: lookups during dispatch share it,
//! subscribe and unsubscribe take it exclusively. The lock is never held
//! across an await point.

use crate::handler::EventHandler;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Identity of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Subscription handle.
///
/// Returned by subscribe; keep it to unsubscribe later. Cloning the handle
/// does not create a new subscription.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    created_at: DateTime<Utc>,
    handler: Arc<dyn EventHandler>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Subscription {
    /// Subscription ID
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn handler(&self) -> Arc<dyn EventHandler> {
        Arc::clone(&self.handler)
    }
}

/// Thread-safe topic to subscriptions map.
#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("topics", &self.topic_count())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler on a topic.
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Subscription {
        let subscription = Subscription {
            id: SubscriptionId::new(),
            topic: topic.to_string(),
            created_at: Utc::now(),
            handler,
        };

        {
            let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
            topics
                .entry(topic.to_string())
                .or_default()
                .push(subscription.clone());
        }

        tracing::info!(
            topic = %topic,
            subscription_id = %subscription.id,
            "Subscribed handler to topic"
        );

        subscription
    }

    /// Remove a subscription.
    ///
    /// Unknown topics and already-removed subscriptions are logged and
    /// otherwise ignored. Returns whether a subscription was removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);

        let Some(subs) = topics.get_mut(&subscription.topic) else {
            tracing::warn!(
                topic = %subscription.topic,
                "Attempted to unsubscribe from a topic with no subscribers"
            );
            return false;
        };

        let removed = match subs.iter().position(|s| s.id == subscription.id) {
            Some(index) => {
                subs.remove(index);
                true
            }
            None => false,
        };

        if subs.is_empty() {
            topics.remove(&subscription.topic);
            tracing::info!(
                topic = %subscription.topic,
                "Removed topic as no more subscribers"
            );
        }

        if removed {
            tracing::info!(
                topic = %subscription.topic,
                subscription_id = %subscription.id,
                "Unsubscribed handler from topic"
            );
        } else {
            tracing::warn!(
                topic = %subscription.topic,
                subscription_id = %subscription.id,
                "Attempted to unsubscribe a non-existent subscription"
            );
        }

        removed
    }

    /// Point-in-time copy of a topic's subscriptions.
    ///
    /// Empty when the topic has no subscribers.
    pub fn lookup(&self, topic: &str) -> Vec<Subscription> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).cloned().unwrap_or_default()
    }

    /// Number of subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).map_or(0, Vec::len)
    }

    /// Number of topics with at least one subscription.
    pub fn topic_count(&self) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total number of subscriptions across all topics.
    pub fn subscription_count(&self) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use std::thread;

    fn noop() -> Arc<dyn EventHandler> {
        Arc::new(handler_fn(|_ctx, _payload| async {}))
    }

    #[test]
    fn test_subscribe_creates_topic() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(registry.topic_count(), 0);

        let sub = registry.subscribe("user_created", noop());
        assert_eq!(sub.topic(), "user_created");
        assert_eq!(registry.topic_count(), 1);
        assert_eq!(registry.subscriber_count("user_created"), 1);
    }

    #[test]
    fn test_lookup_preserves_insertion_order() {
        let registry = SubscriptionRegistry::new();
        let first = registry.subscribe("t", noop());
        let second = registry.subscribe("t", noop());
        let third = registry.subscribe("t", noop());

        let ids: Vec<_> = registry.lookup("t").iter().map(Subscription::id).collect();
        assert_eq!(ids, vec![first.id(), second.id(), third.id()]);
    }

    #[test]
    fn test_unsubscribe_removes_only_matching() {
        let registry = SubscriptionRegistry::new();
        let a = registry.subscribe("t", noop());
        let b = registry.subscribe("t", noop());

        assert!(registry.unsubscribe(&a));

        let remaining = registry.lookup("t");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), b.id());
    }

    #[test]
    fn test_last_unsubscribe_removes_topic() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.subscribe("t", noop());

        assert!(registry.unsubscribe(&sub));
        assert_eq!(registry.topic_count(), 0);
        assert!(registry.lookup("t").is_empty());
    }

    #[test]
    fn test_redundant_unsubscribe_is_noop() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.subscribe("t", noop());
        let other = registry.subscribe("t", noop());

        assert!(registry.unsubscribe(&sub));
        assert!(!registry.unsubscribe(&sub));
        assert_eq!(registry.subscriber_count("t"), 1);

        assert!(registry.unsubscribe(&other));
        // Topic is gone now
        assert!(!registry.unsubscribe(&other));
    }

    #[test]
    fn test_same_instant_subscriptions_are_distinct() {
        let registry = SubscriptionRegistry::new();
        let subs: Vec<_> = (0..100).map(|_| registry.subscribe("t", noop())).collect();

        assert!(registry.unsubscribe(&subs[50]));
        assert_eq!(registry.subscriber_count("t"), 99);
        assert!(registry.lookup("t").iter().all(|s| s.id() != subs[50].id()));
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_changes() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.subscribe("t", noop());

        let snapshot = registry.lookup("t");
        registry.unsubscribe(&sub);
        registry.subscribe("t", noop());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), sub.id());
    }

    #[test]
    fn test_concurrent_subscribe_unsubscribe() {
        let registry = Arc::new(SubscriptionRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let topic = format!("topic.{}", i % 2);
                    for _ in 0..50 {
                        let sub = registry.subscribe(&topic, noop());
                        let _ = registry.lookup(&topic);
                        assert!(registry.unsubscribe(&sub));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.topic_count(), 0);
        assert_eq!(registry.subscription_count(), 0);
    }
}
