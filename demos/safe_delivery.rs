use imq::{Config, MessageQueue, QueueEvent};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<(), imq::ImqError> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // every received envelope transits a crash-survivable worker list; a
    // consumer dying mid-delivery gets its message rescued by the watcher
    let config = Config::new().safe_delivery(true).safe_delivery_ttl(2000);
    let queue = MessageQueue::new("demo-safe", config);
    let mut events = queue.subscribe();
    queue.start().await?;

    for n in 0..3 {
        queue.send("demo-safe", serde_json::json!({ "n": n })).await?;
    }

    let mut received = 0;
    while let Ok(event) = events.recv().await {
        if let QueueEvent::Message { payload, .. } = event {
            println!("got {payload}");
            received += 1;
            if received == 3 {
                break;
            }
        }
    }

    queue.destroy().await?;
    Ok(())
}
