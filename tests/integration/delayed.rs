use std::time::{Duration, Instant};

use imq::MessageQueue;
use testresult::TestResult;

use crate::shared::*;

#[tokio::test]
async fn test_delayed_visibility() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    let queue = MessageQueue::new("later", config);
    let mut events = queue.subscribe();
    queue.start().await?;

    let started = Instant::now();
    queue
        .send_in("later", serde_json::json!({"x": "hi"}), 500)
        .await?;

    assert!(
        recv_message(&mut events, Duration::from_millis(300))
            .await
            .is_none(),
        "message visible before its due time"
    );

    let (payload, ..) = recv_message(&mut events, Duration::from_secs(10))
        .await
        .expect("delayed message never arrived");
    assert_eq!(payload, serde_json::json!({"x": "hi"}));
    assert!(started.elapsed() >= Duration::from_millis(450));

    queue.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_scheduled_messages_are_not_on_the_ready_list() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    let queue = MessageQueue::new("parked", config);
    queue.start().await?;

    queue.send_in("parked", serde_json::json!(1), 60_000).await?;
    queue.send_in("parked", serde_json::json!(2), 60_000).await?;

    assert_eq!(queue.scheduled_count().await?, 2);
    assert_eq!(queue.size().await?, 0);

    queue.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_start_flushes_overdue_messages() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    // schedule from a producer while no consumer is up, let the beacon
    // expire unobserved, then start the consumer: the one-shot promotion
    // on start must surface the message
    let producer = MessageQueue::new("flusher", config.clone());
    producer
        .send_in("overdue", serde_json::json!("late"), 200)
        .await?;
    producer.destroy().await?;

    tokio::time::sleep(Duration::from_millis(400)).await;

    let consumer = MessageQueue::new("overdue", config);
    let mut events = consumer.subscribe();
    consumer.start().await?;

    let (payload, ..) = recv_message(&mut events, Duration::from_secs(10))
        .await
        .expect("overdue message was not flushed on start");
    assert_eq!(payload, serde_json::json!("late"));

    consumer.destroy().await?;
    Ok(())
}
