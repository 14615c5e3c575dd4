//! Event types carried through the stream
//!
//! This module defines the event envelope and the priority tiers that
//! select which queue and worker pool handles an event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque event payload.
///
/// Payloads are JSON values so that any undeliverable event can be written
/// to the dead-letter sink as-is.
pub type Payload = serde_json::Value;

/// Priority tier of an event.
///
/// Each tier owns one bounded queue and one worker pool. Ordering between
/// tiers is a soft bias only: high-priority events are usually, but not
/// always, handled before medium and low ones produced at the same time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Served by the first worker pool to start
    High,
    /// Default tier
    #[default]
    Medium,
    /// Served by the last worker pool to start
    Low,
}

impl Priority {
    /// All tiers in start-up order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Get the tier name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event envelope.
///
/// Created by [`EventStream::produce`](crate::EventStream::produce) and owned
/// by the tier queue until a worker picks it up. Events are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    id: Uuid,
    topic: String,
    priority: Priority,
    created_at: DateTime<Utc>,
    payload: Payload,
}

impl Event {
    /// Create a new event.
    ///
    /// # Arguments
    ///
    /// * `topic` - The topic subscribers registered against
    /// * `payload` - The event payload
    /// * `priority` - The tier the event is queued on
    pub fn new(topic: impl Into<String>, payload: impl Into<Payload>, priority: Priority) -> Self {
        Self {
            id: Uuid::now_v7(),
            topic: topic.into(),
            priority,
            created_at: Utc::now(),
            payload: payload.into(),
        }
    }

    /// Unique event ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Topic this event is routed by.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Priority tier.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Timestamp when the event was produced.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Event payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume the event, returning its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_new() {
        let event = Event::new("user_created", "Alice", Priority::High);

        assert_eq!(event.topic(), "user_created");
        assert_eq!(event.priority(), Priority::High);
        assert_eq!(event.payload(), &json!("Alice"));
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = Event::new("t", 1, Priority::Low);
        let b = Event::new("t", 1, Priority::Low);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_priority_serialization() {
        assert_eq!(serde_json::to_value(Priority::High).unwrap(), json!("high"));
        let parsed: Priority = serde_json::from_value(json!("low")).unwrap();
        assert_eq!(parsed, Priority::Low);
        assert_eq!(Priority::Medium.to_string(), "medium");
    }

    #[test]
    fn test_priority_default_is_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_priority_start_order() {
        assert_eq!(
            Priority::ALL,
            [Priority::High, Priority::Medium, Priority::Low]
        );
    }
}
