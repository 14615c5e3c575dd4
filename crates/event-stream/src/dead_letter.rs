//! Dead-letter sink.
//!
//! Records events that could not be delivered and handler invocations that
//! terminated abnormally. There are exactly three triggers:
//!
//! - a tier queue was full when the event was produced
//! - a dispatched event had no subscribers
//! - a handler panicked
//!
//! Records are kept for diagnosis, never redelivered.

use crate::error::StreamResult;
use crate::registry::SubscriptionId;
use crate::types::{Event, Payload, Priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Why an event ended up in the dead-letter sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Tier queue at capacity when the event was produced
    QueueFull,
    /// No subscribers for the event's topic at dispatch time
    NoSubscribers,
    /// A handler panicked while processing the event
    HandlerFailure,
}

impl DeadLetterReason {
    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            DeadLetterReason::QueueFull => "Event channel full, event dropped",
            DeadLetterReason::NoSubscribers => "No subscribers for topic",
            DeadLetterReason::HandlerFailure => "Event handler panicked",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A dead-letter record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetter {
    /// When the record was created
    pub timestamp: DateTime<Utc>,

    /// Why the event was dead-lettered
    pub reason: DeadLetterReason,

    /// Human-readable reason
    pub message: String,

    /// Event topic
    pub topic: String,

    /// Event priority tier
    pub priority: Priority,

    /// Failure detail for handler failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Subscription whose handler failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<SubscriptionId>,

    /// Original event payload
    pub payload: Payload,
}

impl DeadLetter {
    fn new(reason: DeadLetterReason, event: &Event) -> Self {
        Self {
            timestamp: Utc::now(),
            reason,
            message: reason.description().to_string(),
            topic: event.topic().to_string(),
            priority: event.priority(),
            error: None,
            subscription_id: None,
            payload: event.payload().clone(),
        }
    }

    /// Record for an event dropped because its queue was full.
    pub fn queue_full(event: &Event) -> Self {
        Self::new(DeadLetterReason::QueueFull, event)
    }

    /// Record for an event with no subscribers.
    pub fn no_subscribers(event: &Event) -> Self {
        Self::new(DeadLetterReason::NoSubscribers, event)
    }

    /// Record for a handler that terminated abnormally.
    pub fn handler_failure(
        event: &Event,
        subscription_id: SubscriptionId,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            error: Some(error.to_string()),
            subscription_id: Some(subscription_id),
            ..Self::new(DeadLetterReason::HandlerFailure, event)
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Write-only destination for dead-letter records.
///
/// Implementations must not block callers beyond a short critical section:
/// records are written from producers and workers.
pub trait DeadLetterSink: Send + Sync {
    /// Record one dead letter.
    fn record(&self, letter: DeadLetter);

    /// Release the destination. Called once when the stream stops, from a
    /// blocking context, so it may wait for pending writes.
    fn close(&self) {}
}

/// Records buffered between producers and the writer thread.
pub const DEFAULT_WRITE_BUFFER: usize = 1024;

/// Dead-letter sink appending one JSON record per line.
///
/// Writes to a file opened in append mode, or to standard error when the file
/// cannot be opened. Records are handed to a dedicated writer thread through
/// a bounded buffer, so [`record`](DeadLetterSink::record) never waits on I/O.
/// When the buffer is full the record is dropped and logged.
/// [`close`](DeadLetterSink::close) drains the buffer and joins the writer;
/// after that records are only logged.
pub struct JsonLinesSink {
    sender: Mutex<Option<mpsc::Sender<DeadLetter>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    destination: String,
}

impl fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesSink")
            .field("destination", &self.destination)
            .finish()
    }
}

impl JsonLinesSink {
    /// Open a sink appending to `path`, creating the file if needed.
    pub fn open(path: impl AsRef<Path>) -> StreamResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self::from_writer(file, path.display().to_string()))
    }

    /// Open a sink on `path`, falling back to standard error on failure.
    pub fn open_or_stderr(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::open(path) {
            Ok(sink) => sink,
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Failed to open dead letter log file, falling back to stderr"
                );
                Self::stderr()
            }
        }
    }

    /// Sink writing to standard error.
    pub fn stderr() -> Self {
        Self::from_writer(io::stderr(), "stderr".to_string())
    }

    /// Sink writing to an arbitrary writer.
    pub fn from_writer(writer: impl Write + Send + 'static, destination: String) -> Self {
        Self::from_writer_with_buffer(writer, destination, DEFAULT_WRITE_BUFFER)
    }

    /// Sink writing to an arbitrary writer with `buffer` pending records.
    ///
    /// A zero buffer is treated as one.
    pub fn from_writer_with_buffer(
        writer: impl Write + Send + 'static,
        destination: String,
        buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let thread_destination = destination.clone();

        let spawned = thread::Builder::new()
            .name("dead-letter-writer".to_string())
            .spawn(move || Self::run_writer(writer, rx, &thread_destination));

        let (sender, writer) = match spawned {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(e) => {
                tracing::error!(
                    destination = %destination,
                    error = %e,
                    "Failed to start dead letter writer, records will only be logged"
                );
                (None, None)
            }
        };

        Self {
            sender: Mutex::new(sender),
            writer: Mutex::new(writer),
            destination,
        }
    }

    /// Where records are written.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    fn run_writer(
        mut writer: impl Write,
        mut rx: mpsc::Receiver<DeadLetter>,
        destination: &str,
    ) {
        while let Some(letter) = rx.blocking_recv() {
            if let Err(e) = Self::write_line(&mut writer, &letter) {
                tracing::error!(
                    destination = %destination,
                    topic = %letter.topic,
                    reason = %letter.reason,
                    error = %e,
                    "Failed to write dead letter record"
                );
            }
        }

        if let Err(e) = writer.flush() {
            tracing::error!(
                destination = %destination,
                error = %e,
                "Failed to close dead letter log"
            );
        }
    }

    fn write_line(writer: &mut impl Write, letter: &DeadLetter) -> StreamResult<()> {
        let mut line = serde_json::to_vec(letter)?;
        line.push(b'\n');
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}

impl DeadLetterSink for JsonLinesSink {
    fn record(&self, letter: DeadLetter) {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(sender) = guard.as_ref() else {
            tracing::error!(
                topic = %letter.topic,
                reason = %letter.reason,
                payload = %letter.payload,
                "Dead letter recorded after sink was closed"
            );
            return;
        };

        match sender.try_send(letter) {
            Ok(()) => {}
            Err(TrySendError::Full(letter)) => {
                tracing::error!(
                    destination = %self.destination,
                    topic = %letter.topic,
                    reason = %letter.reason,
                    payload = %letter.payload,
                    "Dead letter buffer is full, record dropped"
                );
            }
            Err(TrySendError::Closed(letter)) => {
                tracing::error!(
                    destination = %self.destination,
                    topic = %letter.topic,
                    reason = %letter.reason,
                    payload = %letter.payload,
                    "Dead letter writer has exited, record dropped"
                );
            }
        }
    }

    /// Drain pending records and join the writer thread. Blocks.
    fn close(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(writer) = writer {
            if writer.join().is_err() {
                tracing::error!(
                    destination = %self.destination,
                    "Dead letter writer terminated abnormally"
                );
            }
        }
    }
}

/// In-memory dead-letter sink.
///
/// Clones share the same record buffer, so a clone can be handed to the
/// stream while the original is kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<DeadLetter>>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all records so far.
    pub fn records(&self) -> Vec<DeadLetter> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of records so far.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records with the given reason.
    pub fn count(&self, reason: DeadLetterReason) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.reason == reason)
            .count()
    }
}

impl DeadLetterSink for MemorySink {
    fn record(&self, letter: DeadLetter) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(letter);
    }
}

// ============================================================================
// Tests
// ============================================================================
