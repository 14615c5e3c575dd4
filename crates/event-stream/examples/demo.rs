//! Walkthrough of the event stream.
//!
//! Run with `RUST_LOG=info cargo run --example demo`. Dead letters are
//! appended to `dead_letter_logs.json` in the working directory.

use event_stream::{EventStream, Priority, StreamConfig};
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let stream = EventStream::start(StreamConfig::from_env())?;

    println!("\n Pub/Sub Usage Example");
    let create_user = stream.subscribe_fn("user_created", |_ctx, payload| async move {
        tracing::info!("Received user_created event: {payload}");
    });

    stream.produce("user_created", "Alice", Priority::High);
    stream.produce("user_created", "Bob", Priority::Medium);
    sleep(Duration::from_millis(100)).await;

    println!("\n Unsubscribe Usage Example");
    stream.unsubscribe(&create_user);
    sleep(Duration::from_millis(100)).await;

    println!("\n Non deterministic but should mostly return HighPriority first");
    let mixed = stream.subscribe_fn("mixed_priority", |_ctx, payload| async move {
        tracing::info!("Mixed Priority Handler received: {payload}");
    });

    stream.produce("mixed_priority", "Low Priority Message", Priority::Low);
    stream.produce("mixed_priority", "High Priority Message", Priority::High);
    stream.produce("mixed_priority", "Medium Priority Message", Priority::Medium);
    stream.produce("mixed_priority", "Another High Priority Message", Priority::High);
    sleep(Duration::from_millis(100)).await;

    stream.unsubscribe(&mixed);

    println!("\n No Subscriber for this handler");
    println!("Should receive an error log in the dead letter file");
    stream.produce("non_existent_topic", "Some message", Priority::Medium);
    sleep(Duration::from_millis(100)).await;

    println!("\n Intentionally adding a panic to handler");
    println!("Should also receive an error log in the dead letter file");
    stream.subscribe_fn("panic_topic", |_ctx, payload| async move {
        tracing::info!("Handler for panic_topic received: {payload}");
        panic!("Oops! Something went wrong in the handler!");
    });
    stream.produce("panic_topic", "Faulty data", Priority::High);
    sleep(Duration::from_millis(100)).await;

    stream.stop().await;
    println!("\n{:#?}", stream.stats());

    Ok(())
}
