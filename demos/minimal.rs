use imq::{Config, MessageQueue, QueueEvent};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<(), imq::ImqError> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let queue = MessageQueue::new("demo", Config::default());
    let mut events = queue.subscribe();
    queue.start().await?;

    queue
        .send("demo", serde_json::json!({ "hello": "world" }))
        .await?;

    if let Ok(QueueEvent::Message { payload, id, from }) = events.recv().await {
        println!("{id} from {from}: {payload}");
    }

    queue.destroy().await?;
    Ok(())
}
