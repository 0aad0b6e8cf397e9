//! Fixed-window event rate limiting, keyed by a struct rather than a
//! stringly-typed `"eventType:windowStart"` map (§9 redesign flag).

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    event_type: String,
    window_start_ms: u64,
}

pub struct EventRateWindow {
    window_size_ms: u64,
    max_events: u32,
    counters: parking_lot::Mutex<HashMap<WindowKey, u32>>,
}

impl EventRateWindow {
    pub fn new(max_events_per_second: u32, window_size_ms: u64) -> Self {
        Self {
            window_size_ms: window_size_ms.max(1),
            max_events: max_events_per_second,
            counters: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }

    /// Returns `true` if the event is allowed and records it; `false` if
    /// the window's cap has already been reached.
    pub fn allow(&self, event_type: &str) -> bool {
        let now = Self::now_ms();
        let window_start_ms = (now / self.window_size_ms) * self.window_size_ms;
        let key = WindowKey {
            event_type: event_type.to_string(),
            window_start_ms,
        };
        let mut counters = self.counters.lock();
        let count = counters.entry(key).or_insert(0);
        if *count >= self.max_events {
            return false;
        }
        *count += 1;
        true
    }

    /// Periodic sweep dropping windows older than two periods, rather than
    /// relying on opportunistic cleanup from `allow`.
    pub fn sweep(&self) {
        let now = Self::now_ms();
        let cutoff = now.saturating_sub(self.window_size_ms * 2);
        self.counters
            .lock()
            .retain(|key, _| key.window_start_ms >= cutoff);
    }
}
