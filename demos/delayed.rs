use std::time::Instant;

use imq::{Config, MessageQueue, QueueEvent};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<(), imq::ImqError> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let queue = MessageQueue::new("demo-delayed", Config::default());
    let mut events = queue.subscribe();
    queue.start().await?;

    let started = Instant::now();
    queue
        .send_in("demo-delayed", serde_json::json!("see you in two seconds"), 2000)
        .await?;

    while let Ok(event) = events.recv().await {
        if let QueueEvent::Message { payload, .. } = event {
            println!("after {:?}: {payload}", started.elapsed());
            break;
        }
    }

    queue.destroy().await?;
    Ok(())
}
