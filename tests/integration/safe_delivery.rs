use std::time::Duration;

use deadpool_redis::redis::AsyncCommands;
use imq::{Envelope, MessageQueue};
use testresult::TestResult;

use crate::shared::*;

#[tokio::test]
async fn test_safe_delivery_round_trip() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    let config = config.safe_delivery(true).safe_delivery_ttl(1000);
    let prefix = config.prefix.clone();
    let pool = raw_pool(&config)?;

    let queue = MessageQueue::new("safe", config);
    let mut events = queue.subscribe();
    queue.start().await?;

    let id = queue.send("safe", serde_json::json!({"n": 1})).await?;
    let (payload, got_id, _) = recv_message(&mut events, Duration::from_secs(5))
        .await
        .expect("no message received");
    assert_eq!(payload, serde_json::json!({"n": 1}));
    assert_eq!(got_id, id);

    // the worker list is deleted once the envelope is processed
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(key_count(&pool, &format!("{prefix}:safe:worker:*")).await?, 0);

    queue.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_sweeper_rescues_stalled_worker_list() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    let config = config.safe_delivery(true).safe_delivery_ttl(500);
    let prefix = config.prefix.clone();

    // simulate a consumer that crashed after moving the envelope into its
    // worker list but before deleting it: the grace window is in the past
    let envelope = Envelope {
        id: "rescued-1".to_string(),
        from: "casualty".to_string(),
        message: serde_json::json!({"r": 1}),
        extra: serde_json::Map::new(),
    };
    let packed = serde_json::to_vec(&envelope)?;
    let expired_at = chrono::Utc::now().timestamp_millis() - 10_000;
    let stalled_key = format!("{prefix}:safe:worker:00000000-dead:{expired_at}");

    let pool = raw_pool(&config)?;
    let mut conn = pool.get().await?;
    let _: () = conn.lpush(&stalled_key, packed.as_slice()).await?;
    drop(conn);

    let queue = MessageQueue::new("safe", config);
    let mut events = queue.subscribe();
    queue.start().await?;

    let (payload, id, from) = recv_message(&mut events, Duration::from_secs(10))
        .await
        .expect("stalled envelope was not rescued");
    assert_eq!(payload, serde_json::json!({"r": 1}));
    assert_eq!(id, "rescued-1");
    assert_eq!(from, "casualty");

    queue.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_sweeper_leaves_unexpired_worker_lists_alone() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    let config = config.safe_delivery(true).safe_delivery_ttl(300);
    let prefix = config.prefix.clone();

    let envelope = Envelope {
        id: "in-flight".to_string(),
        from: "alive".to_string(),
        message: serde_json::json!(1),
        extra: serde_json::Map::new(),
    };
    let packed = serde_json::to_vec(&envelope)?;
    // grace window far in the future: this delivery is still in flight
    let expires_at = chrono::Utc::now().timestamp_millis() + 60_000;
    let live_key = format!("{prefix}:safe:worker:11111111-live:{expires_at}");

    let pool = raw_pool(&config)?;
    let mut conn = pool.get().await?;
    let _: () = conn.lpush(&live_key, packed.as_slice()).await?;

    let queue = MessageQueue::new("safe", config);
    let mut events = queue.subscribe();
    queue.start().await?;

    // several sweep periods pass without the in-flight envelope moving
    assert!(
        recv_message(&mut events, Duration::from_millis(1500))
            .await
            .is_none(),
        "sweeper rescued an in-flight delivery"
    );
    let len: i64 = conn.llen(&live_key).await?;
    assert_eq!(len, 1);

    let _: () = conn.del(&live_key).await?;
    queue.destroy().await?;
    Ok(())
}
