use crate::error::ImqError;

pub(crate) const DEFAULT_HOST: &str = "localhost";
pub(crate) const DEFAULT_PORT: u16 = 6379;
pub(crate) const DEFAULT_PREFIX: &str = "imq";
pub(crate) const DEFAULT_SAFE_DELIVERY_TTL_MS: u64 = 5000;
pub(crate) const DEFAULT_WATCHER_CHECK_DELAY_MS: u64 = 5000;

/// Queue configuration. All fields are optional and default to a local
/// Redis under the `imq` namespace.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Namespace prefix applied to every Redis key.
    pub prefix: String,
    /// Pack envelopes as gzip-of-JSON instead of plain JSON.
    pub use_gzip: bool,
    /// Route each received envelope through a crash-survivable worker list
    /// (at-least-once delivery).
    pub safe_delivery: bool,
    /// Grace period in ms before a stalled worker list is rescued back onto
    /// the main queue.
    pub safe_delivery_ttl: u64,
    /// Reserved for a future watcher heartbeat.
    pub watcher_check_delay: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            prefix: DEFAULT_PREFIX.to_string(),
            use_gzip: false,
            safe_delivery: false,
            safe_delivery_ttl: DEFAULT_SAFE_DELIVERY_TTL_MS,
            watcher_check_delay: DEFAULT_WATCHER_CHECK_DELAY_MS,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from `IMQ_HOST`, `IMQ_PORT`, `IMQ_PREFIX`,
    /// `IMQ_USE_GZIP`, `IMQ_SAFE_DELIVERY` and `IMQ_SAFE_DELIVERY_TTL`.
    pub fn from_env() -> Result<Self, ImqError> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("IMQ_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("IMQ_PORT") {
            config.port = port
                .parse()
                .map_err(|_| ImqError::Config(format!("invalid IMQ_PORT: {port}")))?;
        }
        if let Ok(prefix) = std::env::var("IMQ_PREFIX") {
            config.prefix = prefix;
        }
        if let Ok(v) = std::env::var("IMQ_USE_GZIP") {
            config.use_gzip = env_flag(&v);
        }
        if let Ok(v) = std::env::var("IMQ_SAFE_DELIVERY") {
            config.safe_delivery = env_flag(&v);
        }
        if let Ok(ttl) = std::env::var("IMQ_SAFE_DELIVERY_TTL") {
            config.safe_delivery_ttl = ttl
                .parse()
                .map_err(|_| ImqError::Config(format!("invalid IMQ_SAFE_DELIVERY_TTL: {ttl}")))?;
        }
        Ok(config)
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn use_gzip(mut self, use_gzip: bool) -> Self {
        self.use_gzip = use_gzip;
        self
    }

    pub fn safe_delivery(mut self, safe_delivery: bool) -> Self {
        self.safe_delivery = safe_delivery;
        self
    }

    pub fn safe_delivery_ttl(mut self, ttl_ms: u64) -> Self {
        self.safe_delivery_ttl = ttl_ms;
        self
    }

    pub fn watcher_check_delay(mut self, delay_ms: u64) -> Self {
        self.watcher_check_delay = delay_ms;
        self
    }

    /// The writer-map key: one shared writer per `host:port` per process.
    pub(crate) fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

fn env_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "yes")
}
