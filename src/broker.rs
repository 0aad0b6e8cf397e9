//! C10 — Broker façade & lifecycle. Composes every subsystem behind one
//! entry point; each sub-service is constructed with injected `Arc`
//! references rather than reaching back into a shared `this` (§9 redesign
//! flag).

use crate::audit::AuditTrail;
use crate::cache::HybridCache;
use crate::config::{BrokerConfig, CacheStrategy};
use crate::dependency::DependencyEngine;
use crate::dlq::DeadLetterRouter;
use crate::error::{ErrorContext, QueueError, Result};
use crate::events::hooks::HookSet;
use crate::events::EventBus;
use crate::queue::QueueCore;
use crate::ratelimit::RateLimiter;
use crate::retry::RetryEngine;
use crate::scheduler::Scheduler;
use crate::storage::StorageAdapter;
use crate::timeout::TimeoutMonitor;
use crate::validator::Validator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the background loop checks for due scheduled jobs and
/// timed-out processing items, across every known queue.
const SCHEDULER_TICK_INTERVAL: Duration = Duration::from_secs(1);

pub struct CloseOptions {
    pub timeout: Duration,
    pub force_sync_cache: bool,
}

impl Default for CloseOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            force_sync_cache: true,
        }
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub response_time_ms: u64,
    pub redis: bool,
    pub cache_hit_rate: f64,
    pub cache_pending_writes: usize,
}

struct BackgroundLoop {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl BackgroundLoop {
    async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

/// Resolves once a lazily-connected broker's connection and background
/// loops are up.
pub struct ReadyHandle {
    notify: Arc<Notify>,
    ready: Arc<AtomicBool>,
}

impl ReadyHandle {
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .map_err(|_| QueueError::timeout(ErrorContext::new("wait_ready"), timeout.as_millis() as u64))
    }
}

pub struct Broker {
    storage: Arc<StorageAdapter>,
    cache: Arc<HybridCache>,
    events: Arc<EventBus>,
    queues: Arc<QueueCore>,
    scheduler: Arc<Scheduler>,
    timeouts: Arc<TimeoutMonitor>,
    retries: Arc<RetryEngine>,
    dlq: Arc<DeadLetterRouter>,
    dependencies: Arc<DependencyEngine>,
    rate_limiter: Arc<RateLimiter>,
    validator: Arc<Validator>,
    audit: Arc<AuditTrail>,
    config: BrokerConfig,
    background: std::sync::Mutex<Vec<BackgroundLoop>>,
    is_shutting_down: AtomicBool,
}

impl Broker {
    /// Fully connects and initializes before returning. If
    /// `config.redis.lazy_connect` is set, skips the initial `PING` gate
    /// (the `ConnectionManager` still retries transparently underneath).
    pub async fn connect(config: BrokerConfig) -> Result<Arc<Self>> {
        let storage = Arc::new(StorageAdapter::connect(&config.redis).await?);
        if !config.redis.lazy_connect {
            storage.wait_for_connection(config.redis.connect_timeout).await?;
        }
        let broker = Self::assemble(storage, &config);
        broker.start_background_loops();
        Ok(broker)
    }

    /// Opens the `ConnectionManager` (which retries internally on its own)
    /// and starts background loops without waiting for a successful `PING`;
    /// use the returned [`ReadyHandle`] to wait for that readiness signal.
    pub async fn connect_lazy(config: BrokerConfig) -> Result<(Arc<Self>, ReadyHandle)> {
        let storage = Arc::new(StorageAdapter::connect(&config.redis).await?);
        let broker = Self::assemble(storage, &config);
        broker.start_background_loops();
        let ready = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let ready_clone = ready.clone();
        let notify_clone = notify.clone();
        let broker_clone = broker.clone();
        let timeout = config.redis.connect_timeout;
        tokio::spawn(async move {
            if broker_clone.storage.wait_for_connection(timeout).await.is_ok() {
                ready_clone.store(true, Ordering::SeqCst);
                notify_clone.notify_waiters();
            }
        });
        Ok((broker, ReadyHandle { notify, ready }))
    }

    fn assemble(storage: Arc<StorageAdapter>, config: &BrokerConfig) -> Arc<Self> {
        let events = Arc::new(EventBus::with_config(
            config.events.enable_rate_limiting,
            config.events.rate_limit.max_events_per_second,
            config.events.rate_limit.window_size_ms,
            config.events.max_listeners,
            config.events.enable_audit_log,
            config.events.enable_metrics,
        ));
        let cache = Arc::new(HybridCache::new(
            config.cache.strategy,
            config.cache.max_size,
            config.cache.ttl,
            storage.clone(),
        ));
        let queues = Arc::new(QueueCore::new(storage.clone(), cache.clone(), events.clone()));
        let scheduler = Arc::new(Scheduler::new(storage.clone(), queues.clone(), events.clone()));
        let timeouts = Arc::new(TimeoutMonitor::new(storage.clone(), queues.clone(), events.clone()));
        let retries = Arc::new(RetryEngine::new(storage.clone(), events.clone()));
        let dlq = Arc::new(DeadLetterRouter::new(queues.clone(), events.clone()));
        let dependencies = Arc::new(DependencyEngine::new(storage.clone(), queues.clone(), events.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(storage.clone(), events.clone()));
        let validator = Arc::new(Validator::new());
        let audit = Arc::new(AuditTrail::new(storage.clone(), events.clone()));
        Arc::new(Self {
            storage,
            cache,
            events,
            queues,
            scheduler,
            timeouts,
            retries,
            dlq,
            dependencies,
            rate_limiter,
            validator,
            audit,
            config: config.clone(),
            background: std::sync::Mutex::new(Vec::new()),
            is_shutting_down: AtomicBool::new(false),
        })
    }

    fn start_background_loops(self: &Arc<Self>) {
        let mut background = self.background.lock().unwrap();
        if self.config.cache.strategy == CacheStrategy::WriteBack {
            let cache = self.cache.clone();
            let interval = self.config.cache.sync_interval;
            let token = CancellationToken::new();
            let child_token = token.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = child_token.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = cache.flush_pending().await {
                                log::error!("cache flush failed: {e}");
                            }
                        }
                    }
                }
            });
            background.push(BackgroundLoop { handle, token });
        }

        {
            let queues = self.queues.clone();
            let scheduler = self.scheduler.clone();
            let timeouts = self.timeouts.clone();
            let hooks = Arc::new(HookSet::new());
            let token = CancellationToken::new();
            let child_token = token.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SCHEDULER_TICK_INTERVAL);
                loop {
                    tokio::select! {
                        _ = child_token.cancelled() => break,
                        _ = ticker.tick() => {
                            let now_ms = chrono::Utc::now().timestamp_millis();
                            match queues.get_all_queues().await {
                                Ok(all) => {
                                    for queue in all {
                                        if let Err(e) = scheduler.promote_due(&queue.id, now_ms, &hooks).await {
                                            log::error!("scheduler promotion failed for queue {}: {e}", queue.id);
                                        }
                                        if let Err(e) = timeouts.check_timed_out_jobs(&queue.id).await {
                                            log::error!("timeout sweep failed for queue {}: {e}", queue.id);
                                        }
                                    }
                                }
                                Err(e) => log::error!("failed to list queues for scheduler/timeout tick: {e}"),
                            }
                        }
                    }
                }
            });
            background.push(BackgroundLoop { handle, token });
        }
    }

    pub async fn wait_ready_internal(&self) -> Result<()> {
        self.storage.wait_for_connection(self.config.redis.connect_timeout).await
    }

    pub fn queues(&self) -> &Arc<QueueCore> {
        &self.queues
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn timeouts(&self) -> &Arc<TimeoutMonitor> {
        &self.timeouts
    }

    pub fn retries(&self) -> &Arc<RetryEngine> {
        &self.retries
    }

    pub fn dlq(&self) -> &Arc<DeadLetterRouter> {
        &self.dlq
    }

    pub fn dependencies(&self) -> &Arc<DependencyEngine> {
        &self.dependencies
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn cache(&self) -> &Arc<HybridCache> {
        &self.cache
    }

    pub async fn health_check(&self) -> HealthReport {
        let started = std::time::Instant::now();
        let redis_ok = self.storage.ping().await.is_ok();
        let response_time_ms = started.elapsed().as_millis() as u64;
        let stats = self.cache.stats();
        let status = if !redis_ok {
            "down"
        } else if stats.hit_rate() < 0.5 && stats.hits + stats.misses > 100 {
            "degraded"
        } else {
            "ok"
        };
        HealthReport {
            status,
            response_time_ms,
            redis: redis_ok,
            cache_hit_rate: stats.hit_rate(),
            cache_pending_writes: self.cache.pending_count(),
        }
    }

    pub fn default_hooks() -> HookSet {
        HookSet::new()
    }

    /// Stops background loops, drains pending cache writes, and disconnects.
    pub async fn close(&self, options: CloseOptions) -> Result<()> {
        self.is_shutting_down.store(true, Ordering::SeqCst);
        let loops: Vec<BackgroundLoop> = self.background.lock().unwrap().drain(..).collect();
        for bg in loops {
            bg.stop().await;
        }
        if options.force_sync_cache {
            self.cache.drain(options.timeout / 2).await?;
        }
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }
}
