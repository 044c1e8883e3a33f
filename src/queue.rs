use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use deadpool_redis::Pool;
use deadpool_redis::redis::aio::MultiplexedConnection;
use deadpool_redis::redis::{self, AsyncCommands, Direction, RedisError};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec::Codec;
use crate::config::Config;
use crate::connection::{self, Channel};
use crate::envelope::Envelope;
use crate::error::{ErrorSource, ImqError};
use crate::events::{QueueEvent, emit_error};
use crate::keys::Keys;
use crate::script::ScriptRegistry;
use crate::watcher;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A named distributed queue.
///
/// Messages sent under a queue name are delivered to some process
/// subscribed under that name, exactly once in the default mode or at
/// least once with `safe_delivery`. Delivery is observed through the
/// event stream returned by [`MessageQueue::subscribe`].
///
/// Every instance holds a dedicated blocking reader; instances in one
/// process targeting the same server share a single writer, and one
/// process per server is elected to run the watcher (delayed-message
/// promotion and safe-delivery rescue).
pub struct MessageQueue {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    name: String,
    config: Config,
    keys: Keys,
    codec: Codec,
    scripts: ScriptRegistry,
    events: broadcast::Sender<QueueEvent>,
    initialized: AtomicBool,
    writer: std::sync::Mutex<Option<Pool>>,
    reader: Mutex<Option<MultiplexedConnection>>,
    read_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl MessageQueue {
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let keys = Keys::new(config.prefix.clone());
        let codec = Codec::from_use_gzip(config.use_gzip);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                keys,
                codec,
                scripts: ScriptRegistry::new(),
                events,
                initialized: AtomicBool::new(false),
                writer: std::sync::Mutex::new(None),
                reader: Mutex::new(None),
                read_cancel: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Subscribes to the queue's event stream. Every subscriber sees every
    /// [`QueueEvent`] emitted after the call.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Connects the queue: opens the missing reader and writer, runs the
    /// watcher election, starts the read loop, and flushes any messages
    /// that came due while no process was up. Idempotent.
    pub async fn start(&self) -> Result<(), ImqError> {
        if self.inner.name.is_empty() {
            return Err(ImqError::Config("queue name is required".to_string()));
        }
        if self.inner.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let pool = {
            let mut writer = self.inner.lock_writer();
            match writer.as_ref() {
                Some(pool) => pool.clone(),
                None => {
                    let pool = connection::acquire_writer(&self.inner.config)?;
                    *writer = Some(pool.clone());
                    pool
                }
            }
        };
        connection::name_writer(&pool, &self.inner.config, &self.inner.name).await?;
        {
            let mut reader = self.inner.reader.lock().await;
            if reader.is_none() {
                *reader = Some(
                    connection::connect_named(&self.inner.config, &self.inner.name, Channel::Reader)
                        .await?,
                );
            }
        }

        install_signal_handler();

        watcher::init(&self.inner.config, &self.inner.name, &self.inner.events, &pool).await?;

        self.inner.initialized.store(true, Ordering::Release);
        self.spawn_read_loop().await;

        // flush messages that came due before this process came up
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.process_delayed_once().await {
                emit_error(&inner.events, ErrorSource::ProcessDelayed, e);
            }
        });

        tracing::info!(queue = self.inner.name, "queue started");
        Ok(())
    }

    /// Sends a message to `to_queue` for immediate delivery and returns
    /// the envelope id. The target queue does not need to exist in this
    /// process.
    pub async fn send<M: Serialize>(&self, to_queue: &str, message: M) -> Result<String, ImqError> {
        self.send_in(to_queue, message, 0).await
    }

    /// Sends a message scheduled to become visible after `delay_ms`.
    ///
    /// A zero delay is an immediate send. Delayed envelopes land in the
    /// target's sorted set together with a TTL beacon whose expiration
    /// tells the watcher to promote them.
    pub async fn send_in<M: Serialize>(
        &self,
        to_queue: &str,
        message: M,
        delay_ms: u64,
    ) -> Result<String, ImqError> {
        if self.inner.lock_writer().is_none() {
            self.start().await?;
        }

        let envelope = Envelope::new(self.inner.name.clone(), serde_json::to_value(message)?);
        let id = envelope.id.clone();
        let packed = self.inner.codec.pack(&envelope).await?;
        let list_key = self.inner.keys.list(to_queue);

        let pool = self.inner.writer()?;
        let mut conn = pool.get().await?;

        if delay_ms == 0 {
            let _: () = conn.lpush(&list_key, packed.as_slice()).await?;
            tracing::trace!(queue = self.inner.name, to_queue, id, "message sent");
        } else {
            let due = chrono::Utc::now().timestamp_millis() + delay_ms as i64;
            let delayed_key = self.inner.keys.delayed(&list_key);
            let ttl_key = self.inner.keys.ttl(&list_key, &id);
            let _: () = redis::pipe()
                .zadd(&delayed_key, packed.as_slice(), due)
                .cmd("SET")
                .arg(&ttl_key)
                .arg("")
                .arg("PX")
                .arg(delay_ms)
                .arg("NX")
                .ignore()
                .query_async(&mut conn)
                .await?;
            tracing::trace!(queue = self.inner.name, to_queue, id, delay_ms, "message scheduled");
        }

        Ok(id)
    }

    /// Number of envelopes currently visible on this queue's ready list.
    pub async fn size(&self) -> Result<usize, ImqError> {
        let pool = self.inner.writer()?;
        let mut conn = pool.get().await?;
        let count: i64 = conn.llen(self.inner.keys.list(&self.inner.name)).await?;
        Ok(count as usize)
    }

    /// Number of envelopes scheduled for future delivery on this queue.
    pub async fn scheduled_count(&self) -> Result<usize, ImqError> {
        let pool = self.inner.writer()?;
        let mut conn = pool.get().await?;
        let list_key = self.inner.keys.list(&self.inner.name);
        let count: i64 = conn.zcard(self.inner.keys.delayed(&list_key)).await?;
        Ok(count as usize)
    }

    /// Stops consuming: cancels the read loop and drops the reader. The
    /// shared writer and any owned watcher keep running for the process.
    pub async fn stop(&self) {
        if let Some(cancel) = self.inner.lock_read_cancel().take() {
            cancel.cancel();
        }
        self.inner.reader.lock().await.take();
        self.inner.initialized.store(false, Ordering::Release);
        tracing::debug!(queue = self.inner.name, "queue stopped");
    }

    /// Deletes exactly this queue's ready list and delayed set. Other
    /// queues sharing the writer are untouched.
    pub async fn clear(&self) -> Result<(), ImqError> {
        let pool = self.inner.writer()?;
        let mut conn = pool.get().await?;
        let list_key = self.inner.keys.list(&self.inner.name);
        let delayed_key = self.inner.keys.delayed(&list_key);
        let _: () = conn.del(&[list_key, delayed_key]).await?;
        Ok(())
    }

    /// Full teardown: releases the watcher if this queue owns it, stops
    /// the reader, clears the queue's keys, and lets go of the shared
    /// writer (dropped once the last queue on the address releases it).
    pub async fn destroy(&self) -> Result<(), ImqError> {
        watcher::destroy_for(
            &self.inner.config.addr(),
            &self.inner.config.prefix,
            &self.inner.name,
        )
        .await;
        self.stop().await;

        if self.inner.lock_writer().is_some() {
            if let Err(e) = self.clear().await {
                tracing::warn!(queue = self.inner.name, error = %e, "clear on destroy failed");
            }
        }
        if self.inner.lock_writer().take().is_some() {
            connection::release_writer(&self.inner.config.addr());
        }

        tracing::info!(queue = self.inner.name, "queue destroyed");
        Ok(())
    }

    async fn spawn_read_loop(&self) {
        let cancel = CancellationToken::new();
        *self.inner.lock_read_cancel() = Some(cancel.clone());

        let Some(conn) = self.inner.reader.lock().await.clone() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        if inner.config.safe_delivery {
            tokio::spawn(read_loop_safe(inner, conn, cancel));
        } else {
            tokio::spawn(read_loop_unsafe(inner, conn, cancel));
        }
    }
}

impl Inner {
    fn lock_writer(&self) -> std::sync::MutexGuard<'_, Option<Pool>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_read_cancel(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.read_cancel.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn writer(&self) -> Result<Pool, ImqError> {
        self.lock_writer()
            .clone()
            .ok_or_else(|| ImqError::Config("queue is not started".to_string()))
    }

    /// Validates the source key, unpacks the envelope, and emits the
    /// message event. Envelopes popped for a different key are dropped
    /// silently; decode failures are reported and skipped.
    async fn process(&self, key: &str, data: &[u8]) {
        if key != self.keys.list(&self.name) {
            return;
        }
        match self.codec.unpack(data).await {
            Ok(envelope) => {
                tracing::trace!(
                    queue = self.name,
                    id = envelope.id,
                    from = envelope.from,
                    "message received"
                );
                let _ = self.events.send(QueueEvent::Message {
                    payload: envelope.message,
                    id: envelope.id,
                    from: envelope.from,
                });
            }
            Err(e) => {
                tracing::error!(queue = self.name, error = %e, "failed to decode envelope");
                emit_error(&self.events, ErrorSource::Message, e);
            }
        }
    }

    pub(crate) async fn process_delayed_once(&self) -> Result<i64, ImqError> {
        let pool = self.writer()?;
        let mut conn = pool.get().await?;
        let list_key = self.keys.list(&self.name);
        watcher::process_delayed(&mut conn, &self.scripts, &self.keys, &list_key).await
    }
}

/// Exactly-once loop: blocking right-pops straight off the ready list.
async fn read_loop_unsafe(
    inner: Arc<Inner>,
    mut conn: MultiplexedConnection,
    cancel: CancellationToken,
) {
    let list_key = inner.keys.list(&inner.name);
    tracing::debug!(queue = inner.name, "read loop started");

    loop {
        let result: Result<Option<(String, Vec<u8>)>, RedisError> = tokio::select! {
            _ = cancel.cancelled() => break,
            res = conn.brpop(&list_key, 0.0) => res,
        };
        match result {
            Ok(Some((key, data))) => inner.process(&key, &data).await,
            Ok(None) => {}
            Err(e) if connection_ended(&e) => break,
            Err(e) => {
                emit_error(&inner.events, ErrorSource::ReadUnsafe, e.into());
                break;
            }
        }
    }

    inner.initialized.store(false, Ordering::Release);
    tracing::debug!(queue = inner.name, "read loop ended");
}

/// At-least-once loop: each envelope is moved into a private worker list
/// keyed with its rescue deadline, processed, and only then deleted. A
/// crash in between leaves the worker list for the sweeper to rescue.
async fn read_loop_safe(
    inner: Arc<Inner>,
    mut conn: MultiplexedConnection,
    cancel: CancellationToken,
) {
    let list_key = inner.keys.list(&inner.name);
    tracing::debug!(queue = inner.name, "safe read loop started");

    loop {
        if cancel.is_cancelled() || !connection::writer_exists(&inner.config.addr()) {
            break;
        }

        let expire_ms =
            chrono::Utc::now().timestamp_millis() + inner.config.safe_delivery_ttl as i64;
        let worker_key =
            inner
                .keys
                .worker(&list_key, &Uuid::new_v4().to_string(), expire_ms);

        let result: Result<Option<Vec<u8>>, RedisError> = tokio::select! {
            _ = cancel.cancelled() => break,
            res = conn.blmove(
                &list_key,
                &worker_key,
                Direction::Right,
                Direction::Left,
                0.0,
            ) => res,
        };
        match result {
            Ok(Some(data)) => {
                inner.process(&list_key, &data).await;
                let deleted: Result<(), RedisError> = conn.del(&worker_key).await;
                if let Err(e) = deleted {
                    if connection_ended(&e) {
                        break;
                    }
                    emit_error(&inner.events, ErrorSource::ReadSafe, e.into());
                }
            }
            Ok(None) => {}
            Err(e) if connection_ended(&e) => break,
            Err(e) => {
                emit_error(&inner.events, ErrorSource::ReadSafe, e.into());
                break;
            }
        }
    }

    inner.initialized.store(false, Ordering::Release);
    tracing::debug!(queue = inner.name, "safe read loop ended");
}

/// The driver's "stream connection ended" condition; a normal exit for
/// the read loops (e.g. after `stop()` drops the reader).
fn connection_ended(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.kind() == redis::ErrorKind::IoError
}

static SIGNAL_HANDLER: Once = Once::new();

/// Installs the once-per-process SIGINT/SIGTERM handler: release every
/// owned watcher lock, then exit cleanly.
fn install_signal_handler() {
    SIGNAL_HANDLER.call_once(|| {
        tokio::spawn(async {
            if let Err(e) = shutdown_signal().await {
                tracing::warn!(error = %e, "failed to listen for shutdown signals");
                return;
            }
            tracing::info!("shutdown signal received");
            watcher::release_all().await;
            std::process::exit(0);
        });
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<(), std::io::Error> {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        res = ctrl_c => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<(), std::io::Error> {
    tokio::signal::ctrl_c().await
}
