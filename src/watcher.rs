use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use deadpool_redis::Pool;
use deadpool_redis::redis::aio::{ConnectionLike, MultiplexedConnection};
use deadpool_redis::redis::{self, AsyncCommands, Direction};
use futures::StreamExt;
use rand::Rng;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::connection::{self, Channel};
use crate::error::{ErrorSource, ImqError};
use crate::events::{QueueEvent, emit_error};
use crate::keys::Keys;
use crate::script::ScriptRegistry;

const SWEEP_SCAN_PAGE: usize = 1000;
const EXPIRED_EVENT_PATTERN: &str = "__keyevent@0__:expired";

/// The elected watcher for one server address.
///
/// At most one process per `(server, prefix)` holds this role. The owner
/// keeps a named command connection (the client the election counts), a
/// pub/sub subscription for keyspace-expiration events, and, in
/// safe-delivery mode, a periodic sweeper that returns stalled worker
/// lists to their queues.
pub(crate) struct Watcher {
    addr: String,
    /// Queue instance that won the election; only its `destroy()` tears
    /// the watcher down.
    created_by: String,
    keys: Keys,
    conn: MultiplexedConnection,
    cancel: CancellationToken,
}

/// Per-process watcher registry, so every queue in the process shares one
/// watcher per server address and prefix (election and the lock are
/// per-prefix).
static WATCHERS: OnceLock<Mutex<HashMap<String, Arc<Watcher>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Arc<Watcher>>> {
    WATCHERS.get_or_init(Mutex::default)
}

fn registry_key(addr: &str, prefix: &str) -> String {
    format!("{addr}/{prefix}")
}

/// Watcher election, run from every `start()`.
///
/// If some process already presents a watcher client the call resolves
/// without owning. A set lock without any watcher client is treated as
/// left over from a crashed owner: after a 1-50 ms randomized back-off
/// the lock is deleted and the takeover retried once.
pub(crate) async fn init(
    config: &Config,
    queue_name: &str,
    events: &broadcast::Sender<QueueEvent>,
    pool: &Pool,
) -> Result<(), ImqError> {
    let addr = config.addr();
    if registry()
        .lock()
        .await
        .contains_key(&registry_key(&addr, &config.prefix))
    {
        return Ok(());
    }

    let keys = Keys::new(config.prefix.clone());
    if count_watcher_clients(pool, &config.prefix).await? > 0 {
        tracing::debug!(addr, "watcher already running elsewhere");
        return Ok(());
    }

    if own_watch(config, queue_name, &keys, events, pool).await? {
        return Ok(());
    }

    let backoff_ms: u64 = rand::rng().random_range(1..=50);
    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

    if count_watcher_clients(pool, &config.prefix).await? == 0 {
        let mut conn = pool.get().await?;
        let _: () = conn.del(keys.lock()).await?;
        drop(conn);
        tracing::warn!(addr, "stale watcher lock cleared");
        own_watch(config, queue_name, &keys, events, pool).await?;
    }

    Ok(())
}

/// Attempts `SETNX` on the lock; the winner becomes the owner.
async fn own_watch(
    config: &Config,
    queue_name: &str,
    keys: &Keys,
    events: &broadcast::Sender<QueueEvent>,
    pool: &Pool,
) -> Result<bool, ImqError> {
    let acquired: bool = {
        let mut conn = pool.get().await?;
        conn.set_nx(keys.lock(), "").await?
    };
    if !acquired {
        return Ok(false);
    }

    match Watcher::build(config, queue_name, keys.clone(), events.clone()).await {
        Ok(watcher) => {
            registry().lock().await.insert(
                registry_key(&config.addr(), &config.prefix),
                Arc::new(watcher),
            );
            Ok(true)
        }
        Err(e) => {
            // could not stand up: hand the lock back so a peer can win
            if let Ok(mut conn) = pool.get().await {
                let _: Result<(), _> = conn.del(keys.lock()).await;
            }
            Err(e)
        }
    }
}

impl Watcher {
    async fn build(
        config: &Config,
        queue_name: &str,
        keys: Keys,
        events: broadcast::Sender<QueueEvent>,
    ) -> Result<Self, ImqError> {
        let mut conn = connection::connect_named(config, queue_name, Channel::Watcher).await?;

        let scripts = Arc::new(ScriptRegistry::new());
        let scripts_loaded = Arc::new(AtomicBool::new(false));
        match scripts.load_all(&mut conn).await {
            Ok(()) => scripts_loaded.store(true, Ordering::Release),
            // stay subscribed; promotion is a no-op until the hash is known
            Err(e) => emit_error(&events, ErrorSource::ScriptLoad, e),
        }

        if let Err(e) = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Ex")
            .query_async::<()>(&mut conn)
            .await
        {
            tracing::warn!(
                error = %e,
                "keyspace notifications unavailable; delayed promotion disabled"
            );
            emit_error(&events, ErrorSource::Config, e.into());
        }

        let client = redis::Client::open(config.redis_url())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(EXPIRED_EVENT_PATTERN).await?;
        pubsub
            .psubscribe(format!("{}:delayed:*", config.prefix))
            .await?;

        let cancel = CancellationToken::new();
        tokio::spawn(listen(
            pubsub,
            conn.clone(),
            scripts,
            scripts_loaded,
            keys.clone(),
            events.clone(),
            cancel.clone(),
        ));
        if config.safe_delivery {
            tokio::spawn(sweep_loop(
                config.addr(),
                config.safe_delivery_ttl,
                keys.clone(),
                events,
                cancel.clone(),
            ));
        }

        tracing::info!(addr = config.addr(), queue = queue_name, "watcher role acquired");

        Ok(Self {
            addr: config.addr(),
            created_by: queue_name.to_string(),
            keys,
            conn,
            cancel,
        })
    }

    async fn teardown(&self) {
        self.cancel.cancel();
        let mut conn = self.conn.clone();
        match redis::cmd("DEL")
            .arg(self.keys.lock())
            .query_async::<()>(&mut conn)
            .await
        {
            Ok(()) => tracing::info!(addr = self.addr, "watcher lock released"),
            Err(e) => tracing::warn!(addr = self.addr, error = %e, "failed to release watcher lock"),
        }
    }
}

/// Tears down the watcher for `addr`/`prefix` if `queue_name` owns it.
pub(crate) async fn destroy_for(addr: &str, prefix: &str, queue_name: &str) {
    let key = registry_key(addr, prefix);
    let removed = {
        let mut map = registry().lock().await;
        match map.get(&key) {
            Some(watcher) if watcher.created_by == queue_name => map.remove(&key),
            _ => None,
        }
    };
    if let Some(watcher) = removed {
        watcher.teardown().await;
    }
}

/// Releases every owned watcher lock; used by the process signal handler.
pub(crate) async fn release_all() {
    let drained: Vec<Arc<Watcher>> = {
        let mut map = registry().lock().await;
        map.drain().map(|(_, watcher)| watcher).collect()
    };
    for watcher in drained {
        watcher.teardown().await;
    }
}

/// Invokes the `move_delayed` script for one queue: every envelope in the
/// delayed set whose due time has arrived is appended to the ready list.
pub(crate) async fn process_delayed<C>(
    conn: &mut C,
    scripts: &ScriptRegistry,
    keys: &Keys,
    list_key: &str,
) -> Result<i64, ImqError>
where
    C: ConnectionLike + Send,
{
    let delayed_key = keys.delayed(list_key);
    let now = chrono::Utc::now().timestamp_millis();
    let moved: i64 = scripts
        .move_delayed()
        .key(&delayed_key)
        .key(list_key)
        .arg(now)
        .invoke_async(conn)
        .await?;
    if moved > 0 {
        tracing::debug!(list_key, moved, "promoted delayed messages");
    }
    Ok(moved)
}

/// Pub/sub loop of the owner. Every payload naming an expired TTL beacon
/// maps back to its ready list and triggers a promotion.
async fn listen(
    pubsub: redis::aio::PubSub,
    mut conn: MultiplexedConnection,
    scripts: Arc<ScriptRegistry>,
    scripts_loaded: Arc<AtomicBool>,
    keys: Keys,
    events: broadcast::Sender<QueueEvent>,
    cancel: CancellationToken,
) {
    let mut stream = Box::pin(pubsub.into_on_message());
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = stream.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                emit_error(&events, ErrorSource::Watch, e.into());
                continue;
            }
        };

        let Some(list_key) = Keys::list_from_ttl_key(&payload) else {
            continue;
        };
        if !scripts_loaded.load(Ordering::Acquire) {
            continue;
        }
        if let Err(e) = process_delayed(&mut conn, &scripts, &keys, &list_key).await {
            emit_error(&events, ErrorSource::Watch, e);
        }
    }
    tracing::debug!("watcher listener stopped");
}

/// Periodic rescue of stalled safe-delivery worker lists. Runs every
/// `safe_delivery_ttl` ms; self-terminates once the writer for this
/// address is gone, and cancels itself on server errors (the owner stays
/// subscribed).
async fn sweep_loop(
    addr: String,
    ttl_ms: u64,
    keys: Keys,
    events: broadcast::Sender<QueueEvent>,
    cancel: CancellationToken,
) {
    let period = Duration::from_millis(ttl_ms.max(1));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }

        let Some(pool) = connection::current_writer(&addr) else {
            break;
        };
        match sweep(&pool, &keys).await {
            Ok(rescued) if rescued > 0 => {
                tracing::info!(rescued, "returned stalled deliveries to their queues");
            }
            Ok(_) => {}
            Err(e) => {
                emit_error(&events, ErrorSource::SafeDelivery, e);
                break;
            }
        }
    }
    tracing::debug!("safe-delivery sweeper stopped");
}

/// One SCAN pass over the worker lists of this prefix. Lists whose grace
/// window has passed are pushed back onto their parent queue.
async fn sweep(pool: &Pool, keys: &Keys) -> Result<usize, ImqError> {
    let mut conn = pool.get().await?;
    let pattern = keys.worker_scan_pattern();
    let now = chrono::Utc::now().timestamp_millis();
    let mut cursor: u64 = 0;
    let mut rescued = 0;

    loop {
        let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(&pattern)
            .arg("COUNT")
            .arg(SWEEP_SCAN_PAGE)
            .query_async(&mut conn)
            .await?;

        for worker_key in page {
            let Some((list_key, expire_ms)) = Keys::parse_worker_key(&worker_key) else {
                continue;
            };
            if expire_ms > now {
                continue;
            }
            let moved: Option<Vec<u8>> = conn
                .lmove(&worker_key, &list_key, Direction::Right, Direction::Left)
                .await?;
            if moved.is_some() {
                rescued += 1;
                tracing::info!(worker_key, list_key, "rescued stalled delivery");
            }
        }

        cursor = next;
        if cursor == 0 {
            break;
        }
    }

    Ok(rescued)
}

async fn count_watcher_clients(pool: &Pool, prefix: &str) -> Result<usize, ImqError> {
    let mut conn = pool.get().await?;
    let client_list: String = redis::cmd("CLIENT")
        .arg("LIST")
        .query_async(&mut conn)
        .await?;
    Ok(count_watchers_in(&client_list, prefix))
}

/// Counts CLIENT LIST entries whose name matches `<prefix>:*:watcher:*`.
fn count_watchers_in(client_list: &str, prefix: &str) -> usize {
    let wanted = format!("{prefix}:");
    client_list
        .lines()
        .filter(|line| {
            line.split_whitespace()
                .find_map(|token| token.strip_prefix("name="))
                .is_some_and(|name| name.starts_with(&wanted) && name.contains(":watcher:"))
        })
        .count()
}
