use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use deadpool_redis::redis;
use deadpool_redis::redis::aio::MultiplexedConnection;
use deadpool_redis::{Pool, Runtime};

use crate::config::Config;
use crate::error::ImqError;

/// The three typed connections a queue holds against one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Reader,
    Writer,
    Watcher,
}

impl Channel {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Channel::Reader => "reader",
            Channel::Writer => "writer",
            Channel::Watcher => "watcher",
        }
    }
}

/// Human-readable client name set on dedicated connections, so roles can be
/// derived from the server's CLIENT LIST.
pub(crate) fn client_name(prefix: &str, queue: &str, channel: Channel) -> String {
    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    format!(
        "{prefix}:{queue}:{}:pid:{}:host:{hostname}",
        channel.as_str(),
        std::process::id()
    )
}

struct WriterEntry {
    pool: Pool,
    refs: usize,
}

/// Process-wide writer registry, one shared pool per `host:port`. Queues
/// sharing an address amortize a single writer; the pool is dropped when
/// the last queue releases it.
static WRITERS: OnceLock<Mutex<HashMap<String, WriterEntry>>> = OnceLock::new();

fn writers() -> &'static Mutex<HashMap<String, WriterEntry>> {
    WRITERS.get_or_init(Mutex::default)
}

pub(crate) fn acquire_writer(config: &Config) -> Result<Pool, ImqError> {
    let mut map = writers().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(entry) = map.get_mut(&config.addr()) {
        entry.refs += 1;
        return Ok(entry.pool.clone());
    }

    let pool = deadpool_redis::Config::from_url(config.redis_url())
        .create_pool(Some(Runtime::Tokio1))?;
    tracing::debug!(addr = config.addr(), "writer created");
    map.insert(
        config.addr(),
        WriterEntry {
            pool: pool.clone(),
            refs: 1,
        },
    );
    Ok(pool)
}

pub(crate) fn release_writer(addr: &str) {
    let mut map = writers().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(entry) = map.get_mut(addr) {
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            map.remove(addr);
            tracing::debug!(addr, "writer released");
        }
    }
}

pub(crate) fn writer_exists(addr: &str) -> bool {
    writers()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .contains_key(addr)
}

/// Pool clone without touching the refcount, for background tasks that must
/// self-terminate once the last queue lets go of the writer.
pub(crate) fn current_writer(addr: &str) -> Option<Pool> {
    writers()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(addr)
        .map(|entry| entry.pool.clone())
}

/// Names the warm writer connection after the queue that holds the pool.
/// Pooled connections share one logical writer identity per address.
pub(crate) async fn name_writer(
    pool: &Pool,
    config: &Config,
    queue: &str,
) -> Result<(), ImqError> {
    let mut conn = pool.get().await?;
    let name = client_name(&config.prefix, queue, Channel::Writer);
    let _: () = redis::cmd("CLIENT")
        .arg("SETNAME")
        .arg(&name)
        .query_async(&mut conn)
        .await?;
    Ok(())
}

/// Opens a dedicated connection and names it. Blocking commands monopolize
/// a connection, so readers (and the watcher's command channel) cannot come
/// from the shared writer pool.
pub(crate) async fn connect_named(
    config: &Config,
    queue: &str,
    channel: Channel,
) -> Result<MultiplexedConnection, ImqError> {
    let client = redis::Client::open(config.redis_url())?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let name = client_name(&config.prefix, queue, channel);
    let _: () = redis::cmd("CLIENT")
        .arg("SETNAME")
        .arg(&name)
        .query_async(&mut conn)
        .await?;
    tracing::debug!(name, "connection ready");
    Ok(conn)
}
