use std::time::Duration;

use imq::MessageQueue;
use testresult::TestResult;

use crate::shared::*;

#[tokio::test]
async fn test_single_watcher_per_prefix() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    let prefix = config.prefix.clone();
    let pool = raw_pool(&config)?;

    let first = MessageQueue::new("w1", config.clone());
    let second = MessageQueue::new("w2", config.clone());
    first.start().await?;
    second.start().await?;

    // exactly one lock and one watcher client, shared by both queues
    assert_eq!(key_count(&pool, &format!("{prefix}:watch:lock")).await?, 1);
    let watchers = client_count(&pool, &format!("{prefix}:w1:watcher:")).await?
        + client_count(&pool, &format!("{prefix}:w2:watcher:")).await?;
    assert_eq!(watchers, 1);

    second.destroy().await?;
    first.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_owner_shutdown_releases_the_lock() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    let prefix = config.prefix.clone();
    let pool = raw_pool(&config)?;

    let owner = MessageQueue::new("owner", config.clone());
    owner.start().await?;
    assert_eq!(key_count(&pool, &format!("{prefix}:watch:lock")).await?, 1);

    owner.destroy().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(key_count(&pool, &format!("{prefix}:watch:lock")).await?, 0);

    // a fresh process started afterwards successfully takes over
    let successor = MessageQueue::new("successor", config);
    successor.start().await?;
    assert_eq!(key_count(&pool, &format!("{prefix}:watch:lock")).await?, 1);

    successor.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn test_stale_lock_is_reclaimed() -> TestResult {
    let Some(config) = setup() else {
        return Ok(());
    };
    let prefix = config.prefix.clone();
    let pool = raw_pool(&config)?;

    // a crashed owner leaves the lock set with no watcher client behind
    {
        let mut conn = pool.get().await?;
        let _: () = deadpool_redis::redis::cmd("SET")
            .arg(format!("{prefix}:watch:lock"))
            .arg("")
            .query_async(&mut conn)
            .await?;
    }

    let queue = MessageQueue::new("reclaimer", config);
    queue.start().await?;

    // the stale lock was cleared and re-acquired by this process
    assert_eq!(key_count(&pool, &format!("{prefix}:watch:lock")).await?, 1);
    assert_eq!(
        client_count(&pool, &format!("{prefix}:reclaimer:watcher:")).await?,
        1
    );

    queue.destroy().await?;
    Ok(())
}
