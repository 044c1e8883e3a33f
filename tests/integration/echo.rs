use std::time::Duration;

use imq::MessageQueue;
use testresult::TestResult;

use crate::shared::*;

#[tokio::test]
async fn test_immediate_echo() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    let queue = MessageQueue::new("echo", config);
    let mut events = queue.subscribe();
    queue.start().await?;

    let id = queue.send("echo", serde_json::json!({"a": 1})).await?;

    let (payload, got_id, from) = recv_message(&mut events, Duration::from_secs(5))
        .await
        .expect("no message received");
    assert_eq!(payload, serde_json::json!({"a": 1}));
    assert_eq!(got_id, id);
    assert_eq!(from, "echo");

    queue.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_fifo_single_producer() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    let queue = MessageQueue::new("fifo", config);
    let mut events = queue.subscribe();
    queue.start().await?;

    for n in 0..5 {
        queue.send("fifo", serde_json::json!({"n": n})).await?;
    }
    for n in 0..5 {
        let (payload, ..) = recv_message(&mut events, Duration::from_secs(5))
            .await
            .expect("message missing");
        assert_eq!(payload, serde_json::json!({"n": n}));
    }

    queue.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_cross_queue_send() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    // the target queue does not exist in the producer process view; keys
    // are derived purely from (prefix, name)
    let producer = MessageQueue::new("producer", config.clone());
    let consumer = MessageQueue::new("sink", config);
    let mut events = consumer.subscribe();
    consumer.start().await?;

    producer.send("sink", serde_json::json!("ping")).await?;

    let (payload, _, from) = recv_message(&mut events, Duration::from_secs(5))
        .await
        .expect("no message received");
    assert_eq!(payload, serde_json::json!("ping"));
    assert_eq!(from, "producer");

    producer.destroy().await?;
    consumer.destroy().await?;
    Ok(())
}
