//! Typed configuration for every broker subsystem.
//!
//! Mirrors the `redis`/`cache`/`events` keys enumerated in the broker's
//! external configuration contract. Each struct follows the builder-setter
//! idiom used throughout this crate's storage layer: `Default` plus chained
//! `with_*`/`set_*` methods, never a free-form map.

use std::time::Duration;

/// Connection parameters for the backing Redis deployment.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) password: Option<String>,
    pub(crate) db: i64,
    pub(crate) connect_timeout: Duration,
    pub(crate) command_timeout: Duration,
    pub(crate) max_retries_per_request: u32,
    pub(crate) lazy_connect: bool,
    pub(crate) url_override: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            max_retries_per_request: 3,
            lazy_connect: false,
            url_override: None,
        }
    }
}

impl RedisConfig {
    /// Bypasses host/port/db composition entirely; `connection_url()` returns
    /// this verbatim.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url_override: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn command_timeout(mut self, d: Duration) -> Self {
        self.command_timeout = d;
        self
    }

    pub fn max_retries_per_request(mut self, n: u32) -> Self {
        self.max_retries_per_request = n;
        self
    }

    pub fn lazy_connect(mut self, lazy: bool) -> Self {
        self.lazy_connect = lazy;
        self
    }

    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url_override {
            return url.clone();
        }
        match &self.password {
            Some(p) => format!("redis://:{p}@{}:{}/{}", self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Cache consistency strategy. Fixed at construction time and immutable
/// thereafter — the strategy lives here, not scattered across `cache.config`
/// / `cacheConfig`-style duplicate fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStrategy {
    WriteThrough,
    WriteBack,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub(crate) enabled: bool,
    pub(crate) strategy: CacheStrategy,
    pub(crate) max_size: usize,
    pub(crate) ttl: Duration,
    pub(crate) sync_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: CacheStrategy::WriteThrough,
            max_size: 1000,
            ttl: Duration::from_secs(300),
            sync_interval: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn sync_interval(mut self, sync_interval: Duration) -> Self {
        self.sync_interval = sync_interval;
        self
    }
}

#[derive(Clone, Debug)]
pub struct EventRateLimit {
    pub(crate) max_events_per_second: u32,
    pub(crate) window_size_ms: u64,
}

impl Default for EventRateLimit {
    fn default() -> Self {
        Self {
            max_events_per_second: 1000,
            window_size_ms: 1000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EventsConfig {
    pub(crate) max_listeners: usize,
    pub(crate) enable_audit_log: bool,
    pub(crate) enable_metrics: bool,
    pub(crate) enable_rate_limiting: bool,
    pub(crate) rate_limit: EventRateLimit,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_listeners: 100,
            enable_audit_log: false,
            enable_metrics: true,
            enable_rate_limiting: true,
            rate_limit: EventRateLimit::default(),
        }
    }
}

impl EventsConfig {
    pub fn max_listeners(mut self, n: usize) -> Self {
        self.max_listeners = n;
        self
    }

    pub fn enable_audit_log(mut self, enabled: bool) -> Self {
        self.enable_audit_log = enabled;
        self
    }

    pub fn enable_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    pub fn enable_rate_limiting(mut self, enabled: bool) -> Self {
        self.enable_rate_limiting = enabled;
        self
    }

    pub fn rate_limit(mut self, rate_limit: EventRateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

/// Top-level broker configuration composing the three sections above.
#[derive(Clone, Debug, Default)]
pub struct BrokerConfig {
    pub redis: RedisConfig,
    pub cache: CacheConfig,
    pub events: EventsConfig,
}

impl BrokerConfig {
    pub fn redis(mut self, redis: RedisConfig) -> Self {
        self.redis = redis;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn events(mut self, events: EventsConfig) -> Self {
        self.events = events;
        self
    }
}
