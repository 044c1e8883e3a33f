/// Centralizes the Redis key naming scheme shared by every process pointed
/// at the same server.
#[derive(Debug, Clone)]
pub(crate) struct Keys {
    /// Namespace prefix applied to every key (e.g. `imq`).
    prefix: String,
    /// Redis string key acting as the watcher-election mutex.
    lock: String,
}

impl Keys {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            lock: format!("{prefix}:watch:lock"),
            prefix,
        }
    }

    /// Ready list of packed envelopes: `<prefix>:<name>`.
    pub(crate) fn list(&self, name: &str) -> String {
        format!("{}:{name}", self.prefix)
    }

    /// Sorted set of scheduled envelopes, scored by due-time ms.
    pub(crate) fn delayed(&self, list_key: &str) -> String {
        format!("{list_key}:delayed")
    }

    /// Expiry beacon for one delayed message. The value is irrelevant; only
    /// the keyspace-expiration event it emits matters.
    pub(crate) fn ttl(&self, list_key: &str, id: &str) -> String {
        format!("{list_key}:{id}:ttl")
    }

    /// Per-in-flight-message list used in safe-delivery mode.
    pub(crate) fn worker(&self, list_key: &str, worker_id: &str, expire_ms: i64) -> String {
        format!("{list_key}:worker:{worker_id}:{expire_ms}")
    }

    pub(crate) fn lock(&self) -> &str {
        &self.lock
    }

    /// SCAN pattern matching every worker list under this prefix.
    pub(crate) fn worker_scan_pattern(&self) -> String {
        format!("{}:*:worker:*", self.prefix)
    }

    /// Recovers the ready-list key from an expired TTL beacon, or `None`
    /// when the expired key is not a beacon. The beacon is
    /// `<list>:<id>:ttl`, so the last two segments are dropped.
    pub(crate) fn list_from_ttl_key(expired_key: &str) -> Option<String> {
        let (rest, last) = expired_key.rsplit_once(':')?;
        if last != "ttl" {
            return None;
        }
        let (list_key, _id) = rest.rsplit_once(':')?;
        Some(list_key.to_string())
    }

    /// Splits a worker-list key into its parent ready-list key and trailing
    /// expire-ms. Keys without a literal `worker` segment are rejected.
    pub(crate) fn parse_worker_key(worker_key: &str) -> Option<(String, i64)> {
        let (rest, expire) = worker_key.rsplit_once(':')?;
        let expire_ms: i64 = expire.parse().ok()?;
        let (rest, _worker_id) = rest.rsplit_once(':')?;
        let list_key = rest.strip_suffix(":worker")?;
        Some((list_key.to_string(), expire_ms))
    }
}
