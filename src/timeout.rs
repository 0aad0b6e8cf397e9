//! C9 (timeout slice) — per-job execution deadlines. A processor future
//! races a `tokio::time::sleep` armed to `timeout_at - now`; whichever
//! finishes first wins. A `PEXPIRE` safety net on the per-job tracker key
//! guards against a process crash leaving `status=processing` forever.

use crate::error::{ErrorContext, QueueError, Result};
use crate::events::hooks::HookSet;
use crate::events::types::EventType;
use crate::events::EventBus;
use crate::model::{Item, ItemStatus};
use crate::queue::{ItemPatch, QueueCore};
use crate::storage::{keys, StorageAdapter};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Extra grace period applied to the Redis-side tracker key beyond the
/// logical timeout, so a crashed process's bookkeeping still expires.
const SAFETY_NET_MS: i64 = 60_000;

pub struct TimeoutMonitor {
    storage: Arc<StorageAdapter>,
    queues: Arc<QueueCore>,
    events: Arc<EventBus>,
}

impl TimeoutMonitor {
    pub fn new(storage: Arc<StorageAdapter>, queues: Arc<QueueCore>, events: Arc<EventBus>) -> Self {
        Self { storage, queues, events }
    }

    pub async fn add_job_with_timeout(&self, queue_id: &str, item_id: &str, timeout_ms: i64, hooks: &HookSet) -> Result<Item> {
        let timeout_at = chrono::Utc::now().timestamp_millis() + timeout_ms;
        let patch = ItemPatch {
            timeout: Some(Some(timeout_ms)),
            timeout_at: Some(Some(timeout_at)),
            ..Default::default()
        };
        let item = self.queues.update_item(queue_id, item_id, patch, hooks).await?;
        self.storage
            .pexpire(&keys::timeout_tracker(queue_id, item_id), timeout_ms + SAFETY_NET_MS)
            .await
            .ok();
        self.storage.hset_field(&keys::timeout_tracker(queue_id, item_id), "timeout_at", &timeout_at.to_string()).await?;
        self.events.emit(EventType::JobAddedTimeout, Some(queue_id), json!({ "item_id": item_id, "timeout_ms": timeout_ms }));
        Ok(item)
    }

    /// Races `processor` against a sleep armed to the item's remaining
    /// timeout. On timeout, marks the item `TimedOut` and returns
    /// `QueueError::Timeout`; the processor future is dropped (cancelled)
    /// at the `select!` point.
    pub async fn execute_job_with_timeout<F, Fut, T>(&self, queue_id: &str, item: &Item, processor: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = ErrorContext::new("execute_job_with_timeout").queue(queue_id).item(&item.id);
        let remaining_ms = match item.timeout_at {
            Some(at) => (at - chrono::Utc::now().timestamp_millis()).max(0),
            None => return processor().await,
        };
        tokio::select! {
            result = processor() => result,
            _ = tokio::time::sleep(Duration::from_millis(remaining_ms as u64)) => {
                self.mark_timed_out(queue_id, &item.id).await.ok();
                Err(QueueError::timeout(ctx, remaining_ms as u64))
            }
        }
    }

    async fn mark_timed_out(&self, queue_id: &str, item_id: &str) -> Result<()> {
        let patch = ItemPatch {
            status: Some(ItemStatus::TimedOut),
            ..Default::default()
        };
        self.queues.update_item(queue_id, item_id, patch, &HookSet::new()).await?;
        self.events.emit(EventType::JobTimedOut, Some(queue_id), json!({ "item_id": item_id }));
        Ok(())
    }

    /// Sweeps `queue_id` for processing items whose deadline has already
    /// passed (missed by `execute_job_with_timeout`'s own race, e.g. after a
    /// crash/restart) and marks them `TimedOut`.
    pub async fn check_timed_out_jobs(&self, queue_id: &str) -> Result<Vec<String>> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let items = self.queues.get_queue_items(queue_id, 0, usize::MAX).await?;
        let mut timed_out = Vec::new();
        for item in items {
            if item.status == ItemStatus::Processing {
                if let Some(timeout_at) = item.timeout_at {
                    if timeout_at <= now_ms {
                        self.mark_timed_out(queue_id, &item.id).await?;
                        timed_out.push(item.id);
                    }
                }
            }
        }
        Ok(timed_out)
    }

    pub async fn extend_job_timeout(&self, queue_id: &str, item_id: &str, extra_ms: i64, hooks: &HookSet) -> Result<Item> {
        let ctx = ErrorContext::new("extend_job_timeout").queue(queue_id).item(item_id);
        let item = self
            .queues
            .get_item(queue_id, item_id)
            .await?
            .ok_or_else(|| QueueError::not_found(ctx))?;
        let new_timeout_at = item.timeout_at.unwrap_or_else(|| chrono::Utc::now().timestamp_millis()) + extra_ms;
        let patch = ItemPatch {
            timeout_at: Some(Some(new_timeout_at)),
            ..Default::default()
        };
        let updated = self.queues.update_item(queue_id, item_id, patch, hooks).await?;
        self.storage
            .pexpire(&keys::timeout_tracker(queue_id, item_id), (new_timeout_at - chrono::Utc::now().timestamp_millis()).max(0) + SAFETY_NET_MS)
            .await
            .ok();
        self.events.emit(EventType::JobTimeoutExtended, Some(queue_id), json!({ "item_id": item_id, "timeout_at": new_timeout_at }));
        Ok(updated)
    }
}
