use std::time::Duration;

use imq::{ErrorSource, MessageQueue};
use testresult::TestResult;

use crate::shared::*;

#[tokio::test]
async fn test_gzip_interop() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    let config = config.use_gzip(true);
    let producer = MessageQueue::new("zipper", config.clone());
    let consumer = MessageQueue::new("zipped", config);
    let mut events = consumer.subscribe();
    consumer.start().await?;

    let payload = serde_json::json!({"blob": "z".repeat(2048), "n": 1});
    producer.send("zipped", payload.clone()).await?;

    let (received, _, from) = recv_message(&mut events, Duration::from_secs(5))
        .await
        .expect("no message received");
    assert_eq!(received, payload);
    assert_eq!(from, "zipper");

    producer.destroy().await?;
    consumer.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_mode_mismatch_is_a_decode_error() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    // documented incompatibility: plain producer, gzip consumer
    let producer = MessageQueue::new("plainp", config.clone());
    let consumer = MessageQueue::new("mixed", config.use_gzip(true));
    let mut events = consumer.subscribe();
    consumer.start().await?;

    producer.send("mixed", serde_json::json!({"x": 1})).await?;

    let source = recv_error(&mut events, Duration::from_secs(5))
        .await
        .expect("no decode error surfaced");
    assert_eq!(source, ErrorSource::Message);

    producer.destroy().await?;
    consumer.destroy().await?;
    Ok(())
}
