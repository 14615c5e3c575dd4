//! Event handlers.
//!
//! A handler receives the stream's cancellation context and the payload of
//! each event produced on a topic it is subscribed to. Handlers return
//! nothing: a handler that panics is caught at the invocation boundary and
//! recorded in the dead-letter sink.

use crate::types::Payload;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Event handler trait for processing event payloads.
///
/// The context is cancelled once the stream has stopped. Honoring it is up to
/// the handler; the stream never aborts a running invocation.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event payload.
    async fn handle(&self, ctx: CancellationToken, payload: Payload);
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(CancellationToken, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, ctx: CancellationToken, payload: Payload) {
        (self.f)(ctx, payload).await
    }
}

/// Wrap an async closure as a handler.
///
/// # Example
///
/// ```rust
/// use event_stream::handler_fn;
///
/// let handler = handler_fn(|_ctx, payload| async move {
///     println!("received {payload}");
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(CancellationToken, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    HandlerFn { f }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_handler_fn_invokes_closure() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let handler = handler_fn(move |_ctx, payload| {
            let counter = counter_clone.clone();
            async move {
                assert_eq!(payload, json!(5));
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        handler.handle(CancellationToken::new(), json!(5)).await;
        handler.handle(CancellationToken::new(), json!(5)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_sees_cancelled_context() {
        let handler = handler_fn(|ctx: CancellationToken, _payload| async move {
            assert!(ctx.is_cancelled());
        });

        let ctx = CancellationToken::new();
        ctx.cancel();
        handler.handle(ctx, json!(null)).await;
    }
}
