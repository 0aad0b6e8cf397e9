//! C7 — Rate limiting & concurrency governance. Counters live in one Redis
//! hash per queue (`qm:queue:rate_counters:<queue>`), one field per
//! configured window plus `concurrent`. The "no leaks" invariant — every
//! `concurrent` increment pairs with exactly one decrement even on early
//! return or panic — is enforced by [`ConcurrencyGuard`], a drop guard
//! rather than a convention callers must remember.

use crate::error::{ErrorContext, QueueError, Result};
use crate::events::types::EventType;
use crate::events::EventBus;
use crate::model::RateLimitConfig;
use crate::storage::hash_codec::{decode_bool, decode_u64, encode_bool, encode_u64};
use crate::storage::{keys, StorageAdapter};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Safety TTL applied to the whole counters hash so abandoned queues don't
/// hold stale concurrency gauges forever if a process crashes mid-execution.
const COUNTERS_SAFETY_TTL_SECONDS: i64 = 90;

pub struct RateLimiter {
    storage: Arc<StorageAdapter>,
    events: Arc<EventBus>,
}

impl RateLimiter {
    pub fn new(storage: Arc<StorageAdapter>, events: Arc<EventBus>) -> Self {
        Self { storage, events }
    }

    pub async fn configure(&self, queue_id: &str, config: RateLimitConfig) -> Result<()> {
        let fields = encode_rate_limit_config(&config);
        self.storage.hset_many(&keys::rate_limit_config(queue_id), &fields).await?;
        self.events.emit(EventType::RateLimitConfigured, Some(queue_id), json!({}));
        Ok(())
    }

    pub async fn get_config(&self, queue_id: &str) -> Result<Option<RateLimitConfig>> {
        let fields = self.storage.hgetall(&keys::rate_limit_config(queue_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(decode_rate_limit_config(&fields)))
    }

    pub async fn disable(&self, queue_id: &str) -> Result<()> {
        self.storage.del(&keys::rate_limit_config(queue_id)).await?;
        self.events.emit(EventType::RateLimitDisabled, Some(queue_id), json!({}));
        Ok(())
    }

    pub async fn reset_counters(&self, queue_id: &str) -> Result<()> {
        self.storage.del(&keys::rate_counters(queue_id)).await?;
        self.events.emit(EventType::RateLimitCountersReset, Some(queue_id), json!({}));
        Ok(())
    }

    fn windows(&self, config: &RateLimitConfig, now_ms: i64) -> Vec<(String, Option<u64>)> {
        let mut windows = Vec::with_capacity(4);
        let second = now_ms / 1000;
        let minute = now_ms / 60_000;
        let hour = now_ms / 3_600_000;
        let day = now_ms / 86_400_000;
        windows.push((format!("second:{second}"), config.max_per_second));
        windows.push((format!("minute:{minute}"), config.max_per_minute));
        windows.push((format!("hour:{hour}"), config.max_per_hour));
        windows.push((format!("day:{day}"), config.max_per_day));
        windows
    }

    /// Checks every configured window plus the concurrent gauge without
    /// mutating any counter. Returns `Ok(())` if the call would be allowed,
    /// or `Err(QueueError::RateLimit)` naming the window that denied it.
    pub async fn check_rate_limit(&self, queue_id: &str) -> Result<()> {
        let ctx = ErrorContext::new("check_rate_limit").queue(queue_id);
        let Some(config) = self.get_config(queue_id).await? else { return Ok(()) };
        if !config.enabled {
            return Ok(());
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        let windows = self.windows(&config, now_ms);
        let (allowed, reason, window) = self
            .storage
            .rate_limit_check(&keys::rate_counters(queue_id), &windows, config.max_concurrent)
            .await?;
        if allowed {
            Ok(())
        } else {
            Err(QueueError::rate_limit(ctx, window_exceeded_reason(&reason, &window), window))
        }
    }

    /// Records the start of an execution attempt: increments every
    /// configured window counter plus `concurrent`, and returns a guard
    /// that decrements `concurrent` exactly once when it is released or
    /// dropped.
    pub async fn record_job_execution(&self, queue_id: &str) -> Result<ConcurrencyGuard> {
        let Some(config) = self.get_config(queue_id).await? else {
            return Ok(ConcurrencyGuard::noop());
        };
        if !config.enabled {
            return Ok(ConcurrencyGuard::noop());
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        let windows: Vec<String> = self
            .windows(&config, now_ms)
            .into_iter()
            .map(|(field, _)| field)
            .collect();
        self.storage
            .rate_limit_record_start(&keys::rate_counters(queue_id), &windows, COUNTERS_SAFETY_TTL_SECONDS)
            .await?;
        Ok(ConcurrencyGuard::armed(self.storage.clone(), queue_id.to_string()))
    }
}

/// Maps the Lua script's generic `reason`/`window` pair to the per-window
/// denial message the caller should see, e.g. `Per-second rate limit
/// exceeded`.
fn window_exceeded_reason(reason: &str, window: &str) -> String {
    if reason == "concurrent_exceeded" {
        return "Concurrent limit exceeded".to_string();
    }
    let period = match window.split(':').next() {
        Some("second") => "second",
        Some("minute") => "minute",
        Some("hour") => "hour",
        Some("day") => "day",
        _ => return reason.to_string(),
    };
    format!("Per-{period} rate limit exceeded")
}

fn encode_rate_limit_config(config: &RateLimitConfig) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("enabled".to_string(), encode_bool(config.enabled));
    if let Some(v) = config.max_per_second {
        fields.insert("max_per_second".to_string(), encode_u64(v));
    }
    if let Some(v) = config.max_per_minute {
        fields.insert("max_per_minute".to_string(), encode_u64(v));
    }
    if let Some(v) = config.max_per_hour {
        fields.insert("max_per_hour".to_string(), encode_u64(v));
    }
    if let Some(v) = config.max_per_day {
        fields.insert("max_per_day".to_string(), encode_u64(v));
    }
    if let Some(v) = config.max_concurrent {
        fields.insert("max_concurrent".to_string(), encode_u64(v));
    }
    fields
}

fn decode_rate_limit_config(fields: &HashMap<String, String>) -> RateLimitConfig {
    RateLimitConfig {
        max_per_second: fields.get("max_per_second").and_then(|s| decode_u64(s)),
        max_per_minute: fields.get("max_per_minute").and_then(|s| decode_u64(s)),
        max_per_hour: fields.get("max_per_hour").and_then(|s| decode_u64(s)),
        max_per_day: fields.get("max_per_day").and_then(|s| decode_u64(s)),
        max_concurrent: fields.get("max_concurrent").and_then(|s| decode_u64(s)),
        enabled: fields.get("enabled").map(|s| decode_bool(s)).unwrap_or(false),
    }
}

/// RAII guard over the `concurrent` gauge. Dropping it without calling
/// [`release`](Self::release) still decrements — via `block_in_place` +
/// `block_on`, same mechanism the hybrid cache uses for its synchronous
/// dirty-eviction flush — so a panicking processor future still releases
/// its slot.
pub struct ConcurrencyGuard {
    storage: Option<Arc<StorageAdapter>>,
    queue_id: String,
    released: AtomicBool,
}

impl ConcurrencyGuard {
    fn armed(storage: Arc<StorageAdapter>, queue_id: String) -> Self {
        Self {
            storage: Some(storage),
            queue_id,
            released: AtomicBool::new(false),
        }
    }

    fn noop() -> Self {
        Self {
            storage: None,
            queue_id: String::new(),
            released: AtomicBool::new(true),
        }
    }

    /// Explicit async release, preferred over relying on `Drop` when an
    /// async context is available.
    pub async fn release(self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(storage) = &self.storage {
            storage.hincrby(&keys::rate_counters(&self.queue_id), "concurrent", -1).await?;
        }
        Ok(())
    }
}

impl Drop for ConcurrencyGuard {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(storage) = self.storage.clone() else { return };
        let queue_id = self.queue_id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tokio::task::block_in_place(|| {
                handle.block_on(async move {
                    let _ = storage.hincrby(&keys::rate_counters(&queue_id), "concurrent", -1).await;
                })
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_exceeded_reason_maps_each_period() {
        assert_eq!(window_exceeded_reason("window_exceeded", "second:12345"), "Per-second rate limit exceeded");
        assert_eq!(window_exceeded_reason("window_exceeded", "minute:12345"), "Per-minute rate limit exceeded");
        assert_eq!(window_exceeded_reason("window_exceeded", "hour:12345"), "Per-hour rate limit exceeded");
        assert_eq!(window_exceeded_reason("window_exceeded", "day:12345"), "Per-day rate limit exceeded");
        assert_eq!(window_exceeded_reason("concurrent_exceeded", "concurrent"), "Concurrent limit exceeded");
    }

    #[test]
    fn encode_decode_round_trips() {
        let config = RateLimitConfig {
            max_per_second: Some(10),
            max_per_minute: Some(100),
            max_per_hour: None,
            max_per_day: None,
            max_concurrent: Some(5),
            enabled: true,
        };
        let fields = encode_rate_limit_config(&config);
        let decoded = decode_rate_limit_config(&fields);
        assert_eq!(decoded.max_per_second, Some(10));
        assert_eq!(decoded.max_per_minute, Some(100));
        assert_eq!(decoded.max_per_hour, None);
        assert_eq!(decoded.max_concurrent, Some(5));
        assert!(decoded.enabled);
    }
}
