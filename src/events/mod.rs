//! C3 — Event Bus & Hook Pipeline: a multicast with a global sink and one
//! sink per queue id, ordered middleware, and per-event-type rate limiting.

pub mod hooks;
pub mod types;
pub mod window;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use types::EventType;
use window::EventRateWindow;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub version: u32,
    pub source: String,
    pub queue_id: Option<String>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, queue_id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.as_str().to_string(),
            version: 1,
            source: "queue-manager".to_string(),
            queue_id,
            payload,
        }
    }

    pub fn custom(event_type: impl Into<String>, queue_id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.into(),
            version: 1,
            source: "queue-manager".to_string(),
            queue_id,
            payload,
        }
    }
}

type Middleware = Box<dyn Fn(&mut EventEnvelope) + Send + Sync>;

const GLOBAL_CHANNEL_CAPACITY: usize = 1024;

pub struct EventBus {
    global: broadcast::Sender<EventEnvelope>,
    per_queue: DashMap<String, broadcast::Sender<EventEnvelope>>,
    middleware: parking_lot::Mutex<Vec<Middleware>>,
    rate_limiting_enabled: bool,
    rate_window: Arc<EventRateWindow>,
    max_listeners: usize,
    audit_log_enabled: bool,
    metrics_enabled: bool,
    event_counts: DashMap<String, u64>,
}

impl EventBus {
    pub fn new(rate_limiting_enabled: bool, max_events_per_second: u32, window_size_ms: u64) -> Self {
        Self::with_config(rate_limiting_enabled, max_events_per_second, window_size_ms, 100, false, true)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_config(
        rate_limiting_enabled: bool,
        max_events_per_second: u32,
        window_size_ms: u64,
        max_listeners: usize,
        audit_log_enabled: bool,
        metrics_enabled: bool,
    ) -> Self {
        let (global, _) = broadcast::channel(GLOBAL_CHANNEL_CAPACITY);
        Self {
            global,
            per_queue: DashMap::new(),
            middleware: parking_lot::Mutex::new(Vec::new()),
            rate_limiting_enabled,
            rate_window: Arc::new(EventRateWindow::new(max_events_per_second, window_size_ms)),
            max_listeners,
            audit_log_enabled,
            metrics_enabled,
            event_counts: DashMap::new(),
        }
    }

    pub fn add_middleware(&self, mw: Middleware) {
        self.middleware.lock().push(mw);
    }

    fn warn_if_over_subscribed(&self, label: &str, count: usize) {
        if count > self.max_listeners {
            log::warn!("event bus sink {label} has {count} listeners, exceeding max_listeners={}", self.max_listeners);
        }
    }

    /// Subscribes to every event on the bus.
    pub fn subscribe_global(&self) -> broadcast::Receiver<EventEnvelope> {
        let rx = self.global.subscribe();
        self.warn_if_over_subscribed("global", self.global.receiver_count());
        rx
    }

    /// Subscribes to events for one queue only.
    pub fn subscribe_queue(&self, queue_id: &str) -> broadcast::Receiver<EventEnvelope> {
        let sender = self
            .per_queue
            .entry(queue_id.to_string())
            .or_insert_with(|| broadcast::channel(GLOBAL_CHANNEL_CAPACITY).0);
        let rx = sender.subscribe();
        self.warn_if_over_subscribed(queue_id, sender.receiver_count());
        rx
    }

    /// Per-event-type publish counters, accumulated only when `enableMetrics`
    /// is on; empty otherwise.
    pub fn metrics_snapshot(&self) -> std::collections::HashMap<String, u64> {
        self.event_counts.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }

    pub fn remove_queue_listener(&self, queue_id: &str) {
        self.per_queue.remove(queue_id);
    }

    /// Publishes an event: applies middleware in order, rate-limits by
    /// event type, then fans out to the global sink and (if present) the
    /// queue-specific sink. Delivery to a queue's listener happens in
    /// emission order within this process; no cross-queue ordering is
    /// implied.
    pub fn publish(&self, mut envelope: EventEnvelope) {
        for mw in self.middleware.lock().iter() {
            mw(&mut envelope);
        }
        if self.rate_limiting_enabled && !self.rate_window.allow(&envelope.event_type) {
            log::warn!("event {} dropped by rate limiter", envelope.event_type);
            return;
        }
        if self.metrics_enabled {
            *self.event_counts.entry(envelope.event_type.clone()).or_insert(0) += 1;
        }
        if self.audit_log_enabled {
            log::info!("event bus: {} queue={:?}", envelope.event_type, envelope.queue_id);
        }
        let _ = self.global.send(envelope.clone());
        if let Some(queue_id) = &envelope.queue_id {
            if let Some(sender) = self.per_queue.get(queue_id) {
                let _ = sender.send(envelope);
            }
        }
    }

    pub fn emit(&self, event_type: EventType, queue_id: Option<&str>, payload: serde_json::Value) {
        self.publish(EventEnvelope::new(event_type, queue_id.map(|s| s.to_string()), payload));
    }

    pub fn emit_custom(&self, event_type: impl Into<String>, queue_id: Option<&str>, payload: serde_json::Value) {
        self.publish(EventEnvelope::custom(event_type, queue_id.map(|s| s.to_string()), payload));
    }

    pub fn sweep_rate_window(&self) {
        self.rate_window.sweep();
    }
}
