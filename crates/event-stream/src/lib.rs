//! # Event Stream
//!
//! An in-process publish/subscribe event bus with priority tiers, bounded
//! queues and a dead-letter sink.
//!
//! ## Overview
//!
//! The event-stream crate handles:
//! - **Subscriptions**: Topic-keyed handler registry
//! - **Priority Tiers**: High, medium and low queues, each with its own worker pool
//! - **Dispatch**: Concurrent, isolated handler invocations per event
//! - **Dead Letters**: A log of dropped, unroutable and failed events
//! - **Lifecycle**: Explicit start and draining shutdown
//!
//! ## Delivery Semantics
//!
//! - `produce` never blocks and never returns an error. A full tier queue
//!   drops the event and records it as a dead letter.
//! - Every handler subscribed when an event is dispatched receives it in its
//!   own task. A panicking handler is recorded as a dead letter and does not
//!   affect other handlers or later events.
//! - Priority is soft: high-priority events are usually handled first, but
//!   there is no ordering guarantee across tiers, and only best-effort
//!   ordering within one.
//! - No persistence, replay, acknowledgment or exactly-once delivery.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_stream::{EventStream, Priority, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), event_stream::StreamError> {
//!     let stream = EventStream::start(StreamConfig::default())?;
//!
//!     let sub = stream.subscribe_fn("user_created", |_ctx, payload| async move {
//!         tracing::info!(%payload, "Received user_created event");
//!     });
//!
//!     stream.produce("user_created", "Alice", Priority::High);
//!     stream.produce("user_created", "Bob", Priority::Medium);
//!
//!     stream.unsubscribe(&sub);
//!     stream.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Monitoring Dead Letters
//!
//! By default dead letters are appended as JSON lines to
//! `dead_letter_logs.json`. Callers that need to react to drops can supply
//! their own [`DeadLetterSink`], for example a [`MemorySink`]:
//!
//! ```rust,no_run
//! use event_stream::{DeadLetterReason, EventStream, MemorySink};
//!
//! # fn example() -> Result<(), event_stream::StreamError> {
//! let dead_letters = MemorySink::new();
//! let stream = EventStream::builder()
//!     .dead_letter_sink(dead_letters.clone())
//!     .start()?;
//!
//! let dropped = dead_letters.count(DeadLetterReason::QueueFull);
//! # let _ = (stream, dropped);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dead_letter;
pub mod error;
pub mod handler;
pub mod registry;
pub mod stats;
pub mod stream;
pub mod types;

mod dispatcher;
mod worker;

// Re-export main types
pub use config::StreamConfig;
pub use dead_letter::{DeadLetter, DeadLetterReason, DeadLetterSink, JsonLinesSink, MemorySink};
pub use error::{ConfigError, HandlerFailure, StreamError, StreamResult};
pub use handler::{handler_fn, EventHandler, HandlerFn};
pub use registry::{Subscription, SubscriptionId, SubscriptionRegistry};
pub use stats::StreamStats;
pub use stream::{EventStream, EventStreamBuilder, StreamState};
pub use types::{Event, Payload, Priority};

pub use tokio_util::sync::CancellationToken;
