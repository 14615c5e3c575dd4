//! Error types for the event stream
//!
//! Delivery problems (full queues, unroutable events, handler panics) are
//! never returned to callers; they are logged and recorded in the dead-letter
//! sink. The errors here only cover construction-time failures and the typed
//! value a panicking handler is converted into.

use std::any::Any;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Event stream error types.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Invalid stream configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dead-letter destination could not be opened or written
    #[error("Dead-letter sink error: {0}")]
    DeadLetterIo(#[from] std::io::Error),

    /// Dead-letter record could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Abnormal termination of a handler invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerFailure {
    /// The handler panicked
    #[error("panic in event handler for topic {topic}: {message}")]
    Panicked {
        /// Topic of the event being handled.
        topic: String,
        /// Panic message, if it was a string.
        message: String,
    },
}

impl HandlerFailure {
    /// Build a failure from a caught panic payload.
    pub fn from_panic(topic: &str, panic: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        HandlerFailure::Panicked {
            topic: topic.to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_failure_from_str_panic() {
        let failure = HandlerFailure::from_panic("panic_topic", Box::new("Oops!"));
        assert_eq!(
            failure.to_string(),
            "panic in event handler for topic panic_topic: Oops!"
        );
    }

    #[test]
    fn test_handler_failure_from_string_panic() {
        let failure = HandlerFailure::from_panic("t", Box::new(format!("bad value {}", 7)));
        assert_eq!(
            failure,
            HandlerFailure::Panicked {
                topic: "t".to_string(),
                message: "bad value 7".to_string(),
            }
        );
    }

    #[test]
    fn test_handler_failure_from_opaque_panic() {
        let failure = HandlerFailure::from_panic("t", Box::new(42_u8));
        assert!(failure.to_string().contains("non-string panic payload"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: StreamError = ConfigError::InvalidValue {
            key: "queue_capacity".to_string(),
            message: "must be greater than zero".to_string(),
        }
        .into();
        assert!(matches!(err, StreamError::Config(_)));
    }
}
