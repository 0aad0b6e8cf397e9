//! C4 — Queue/Item Core: CRUD over queues and the items inside them.
//! Mutating operations take a [`HookSet`] by reference (threaded per call,
//! not owned by `QueueCore`) and publish an [`EventEnvelope`] on success.

pub mod item;
pub mod priority;

pub use item::{decode_queue_hash, encode_queue_hash, ItemPatch};

use crate::cache::HybridCache;
use crate::error::{ErrorContext, QueueError, Result};
use crate::events::hooks::{run_hooks, HookSet, DEFAULT_HOOK_TIMEOUT};
use crate::events::types::EventType;
use crate::events::EventBus;
use crate::model::{Item, ItemStatus, Queue};
use crate::storage::{keys, StorageAdapter};
use serde_json::json;
use std::sync::Arc;

pub const MAX_BATCH_POP: usize = 100;
pub const MAX_BULK_ITEMS: usize = 1000;

pub struct QueueCore {
    storage: Arc<StorageAdapter>,
    cache: Arc<HybridCache>,
    events: Arc<EventBus>,
}

impl QueueCore {
    pub fn new(storage: Arc<StorageAdapter>, cache: Arc<HybridCache>, events: Arc<EventBus>) -> Self {
        Self { storage, cache, events }
    }

    fn emit(&self, event_type: EventType, queue_id: &str, payload: serde_json::Value) {
        self.events.emit(event_type, Some(queue_id), payload);
    }

    // -- queue-level ops -----------------------------------------------------

    pub async fn create_queue(&self, queue_id: &str, name: &str) -> Result<Queue> {
        let ctx = ErrorContext::new("create_queue").queue(queue_id);
        if self.storage.exists(&keys::meta(queue_id)).await? {
            return Err(QueueError::already_exists(ctx));
        }
        let queue = Queue::new(queue_id, name);
        self.storage.hset_many(&keys::meta(queue_id), &encode_queue_hash(&queue)).await?;
        self.cache.put_queue(queue_id, queue.clone(), false);
        self.emit(EventType::QueueCreated, queue_id, json!({ "name": name }));
        Ok(queue)
    }

    pub async fn get_queue(&self, queue_id: &str) -> Result<Option<Queue>> {
        if let Some(queue) = self.cache.get_queue(queue_id) {
            return Ok(Some(queue));
        }
        let fields = self.storage.hgetall(&keys::meta(queue_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let queue = decode_queue_hash(queue_id, &fields)?;
        self.cache.put_queue(queue_id, queue.clone(), false);
        Ok(Some(queue))
    }

    async fn require_queue(&self, queue_id: &str, operation: &'static str) -> Result<Queue> {
        self.get_queue(queue_id)
            .await?
            .ok_or_else(|| QueueError::not_found(ErrorContext::new(operation).queue(queue_id)))
    }

    pub async fn get_all_queues(&self) -> Result<Vec<Queue>> {
        let keys_found = self.storage.scan_match("qm:meta:*").await?;
        let mut queues = Vec::with_capacity(keys_found.len());
        for key in keys_found {
            let queue_id = key.trim_start_matches("qm:meta:").to_string();
            if let Some(queue) = self.get_queue(&queue_id).await? {
                queues.push(queue);
            }
        }
        Ok(queues)
    }

    pub async fn update_queue(&self, queue_id: &str, name: Option<&str>, paused: Option<bool>) -> Result<Queue> {
        let mut queue = self.require_queue(queue_id, "update_queue").await?;
        if let Some(name) = name {
            queue.name = name.to_string();
        }
        if let Some(paused) = paused {
            queue.paused = paused;
        }
        queue.updated_at = chrono::Utc::now();
        queue.version += 1;
        self.storage.hset_many(&keys::meta(queue_id), &encode_queue_hash(&queue)).await?;
        self.cache.put_queue(queue_id, queue.clone(), false);
        let event = if paused == Some(true) {
            EventType::QueuePaused
        } else if paused == Some(false) {
            EventType::QueueResumed
        } else {
            EventType::QueueUpdated
        };
        self.emit(event, queue_id, json!({ "version": queue.version }));
        Ok(queue)
    }

    pub async fn delete_queue(&self, queue_id: &str) -> Result<()> {
        self.require_queue(queue_id, "delete_queue").await?;
        let meta = keys::meta(queue_id);
        let items = keys::items(queue_id);
        let scheduled = keys::scheduled(queue_id);
        let rate_limit = keys::rate_limit_config(queue_id);
        let rate_counters = keys::rate_counters(queue_id);
        let audit_config = keys::audit_config(queue_id);
        let audit_index = keys::audit_index(queue_id);
        let schema = keys::schema(queue_id);
        let fixed_keys: [&str; 8] = [&meta, &items, &scheduled, &rate_limit, &rate_counters, &audit_config, &audit_index, &schema];
        let dep_pattern = format!("qm:queue:dependencies:{queue_id}:*");
        let audit_log_pattern = format!("qm:queue:audit:log:{queue_id}:*");
        let execution_pattern = format!("qm:queue:execution:{queue_id}:*");
        let timeout_pattern = format!("qm:queue:timeout:{queue_id}:*");
        let scan_patterns: [&str; 4] = [&dep_pattern, &audit_log_pattern, &execution_pattern, &timeout_pattern];
        self.storage.delete_queue_keys(&fixed_keys, &scan_patterns).await?;
        self.cache.invalidate_queue(queue_id);
        self.cache.invalidate_items(queue_id);
        self.events.remove_queue_listener(queue_id);
        self.emit(EventType::QueueDeleted, queue_id, json!({}));
        Ok(())
    }

    pub async fn rename_queue(&self, queue_id: &str, new_queue_id: &str) -> Result<Queue> {
        let ctx = ErrorContext::new("rename_queue").queue(queue_id);
        if self.storage.exists(&keys::meta(new_queue_id)).await? {
            return Err(QueueError::already_exists(ctx));
        }
        let mut queue = self.require_queue(queue_id, "rename_queue").await?;
        let items = self.get_queue_items(queue_id, 0, u64::MAX as usize).await?;
        queue.id = new_queue_id.to_string();
        queue.updated_at = chrono::Utc::now();
        self.storage.hset_many(&keys::meta(new_queue_id), &encode_queue_hash(&queue)).await?;
        let bodies: Vec<String> = items.iter().filter_map(|i| serde_json::to_string(i).ok()).collect();
        if !bodies.is_empty() {
            self.storage.replace_list(&keys::items(new_queue_id), &bodies).await?;
        }
        self.storage.del(&keys::meta(queue_id)).await?;
        self.storage.del(&keys::items(queue_id)).await?;
        self.cache.invalidate_queue(queue_id);
        self.cache.invalidate_items(queue_id);
        self.cache.put_queue(new_queue_id, queue.clone(), false);
        self.emit(EventType::QueueRenamedOut, queue_id, json!({ "to": new_queue_id }));
        self.emit(EventType::QueueRenamedIn, new_queue_id, json!({ "from": queue_id }));
        Ok(queue)
    }

    pub async fn clear_queue(&self, queue_id: &str) -> Result<u64> {
        let mut queue = self.require_queue(queue_id, "clear_queue").await?;
        let count = self.storage.llen(&keys::items(queue_id)).await?;
        self.storage.del(&keys::items(queue_id)).await?;
        queue.item_count = 0;
        queue.updated_at = chrono::Utc::now();
        self.storage.hset_field(&keys::meta(queue_id), "item_count", "0").await?;
        self.cache.invalidate_items(queue_id);
        self.cache.put_queue(queue_id, queue, false);
        self.emit(EventType::QueueCleared, queue_id, json!({ "removed": count }));
        Ok(count)
    }

    // -- item-level ops -------------------------------------------------------

    pub async fn add_to_queue(&self, queue_id: &str, data: serde_json::Value, hooks: &HookSet) -> Result<Item> {
        self.require_queue(queue_id, "add_to_queue").await?;
        let item = Item::new(data);
        run_hooks(&hooks.before, "before", "add_to_queue", &item, queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        let body = serde_json::to_string(&item)
            .map_err(|e| QueueError::validation(ErrorContext::new("add_to_queue").queue(queue_id), e.to_string()))?;
        self.storage.push_item(&keys::items(queue_id), &keys::meta(queue_id), &body).await?;
        self.cache.invalidate_items(queue_id);
        self.cache.invalidate_queue(queue_id);
        self.emit(EventType::ItemAdded, queue_id, json!({ "item_id": item.id }));
        run_hooks(&hooks.after, "after", "add_to_queue", &item, queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        Ok(item)
    }

    pub async fn get_queue_items(&self, queue_id: &str, offset: usize, limit: usize) -> Result<Vec<Item>> {
        if let Some(items) = self.cache.get_items(queue_id) {
            return Ok(items.into_iter().skip(offset).take(limit).collect());
        }
        let raw = self.storage.lrange(&keys::items(queue_id), 0, -1).await?;
        let items: Vec<Item> = raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect();
        self.cache.put_items(queue_id, items.clone(), false);
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    pub async fn get_item(&self, queue_id: &str, item_id: &str) -> Result<Option<Item>> {
        let items = self.get_queue_items(queue_id, 0, usize::MAX).await?;
        Ok(items.into_iter().find(|i| i.id == item_id))
    }

    pub async fn update_item(&self, queue_id: &str, item_id: &str, patch: ItemPatch, hooks: &HookSet) -> Result<Item> {
        let ctx = ErrorContext::new("update_item").queue(queue_id).item(item_id);
        let mut item = self
            .get_item(queue_id, item_id)
            .await?
            .ok_or_else(|| QueueError::not_found(ctx.clone()))?;
        run_hooks(&hooks.before, "before", "update_item", &item, queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        patch.apply(&mut item);
        let body = serde_json::to_string(&item).map_err(|e| QueueError::validation(ctx.clone(), e.to_string()))?;
        let updated = self
            .storage
            .update_item(&keys::items(queue_id), &keys::meta(queue_id), item_id, &body)
            .await?;
        if updated.is_none() {
            return Err(QueueError::not_found(ctx));
        }
        self.cache.invalidate_items(queue_id);
        self.emit(EventType::ItemUpdated, queue_id, json!({ "item_id": item_id }));
        run_hooks(&hooks.after, "after", "update_item", &item, queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        Ok(item)
    }

    pub async fn delete_item_from_queue(&self, queue_id: &str, item_id: &str, hooks: &HookSet) -> Result<Item> {
        let ctx = ErrorContext::new("delete_item_from_queue").queue(queue_id).item(item_id);
        let item = self
            .get_item(queue_id, item_id)
            .await?
            .ok_or_else(|| QueueError::not_found(ctx.clone()))?;
        run_hooks(&hooks.before, "before", "delete_item_from_queue", &item, queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        let removed = self.storage.delete_item(&keys::items(queue_id), &keys::meta(queue_id), item_id).await?;
        if removed.is_none() {
            return Err(QueueError::not_found(ctx));
        }
        self.cache.invalidate_items(queue_id);
        self.emit(EventType::ItemDeleted, queue_id, json!({ "item_id": item_id }));
        run_hooks(&hooks.after, "after", "delete_item_from_queue", &item, queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        Ok(item)
    }

    /// Reads the next item to pop without removing it (the tail of the
    /// add-head/drain-tail list).
    pub async fn peek_queue(&self, queue_id: &str) -> Result<Option<Item>> {
        let raw = self.storage.lindex(&keys::items(queue_id), -1).await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    pub async fn pop_from_queue(&self, queue_id: &str, hooks: &HookSet) -> Result<Option<Item>> {
        let raw = self.storage.pop_fifo(&keys::items(queue_id), &keys::meta(queue_id)).await?;
        let Some(raw) = raw else { return Ok(None) };
        let item: Item = serde_json::from_str(&raw)
            .map_err(|e| QueueError::unknown(ErrorContext::new("pop_from_queue").queue(queue_id), e.to_string()))?;
        self.cache.invalidate_items(queue_id);
        self.emit(EventType::ItemPopped, queue_id, json!({ "item_id": item.id }));
        run_hooks(&hooks.after, "after", "pop_from_queue", &item, queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        Ok(Some(item))
    }

    pub async fn pop_batch_from_queue(&self, queue_id: &str, n: usize, hooks: &HookSet) -> Result<Vec<Item>> {
        let n = n.min(MAX_BATCH_POP);
        let raw = self.storage.pop_batch(&keys::items(queue_id), &keys::meta(queue_id), n).await?;
        let items: Vec<Item> = raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect();
        self.cache.invalidate_items(queue_id);
        self.emit(EventType::ItemsBatchPopped, queue_id, json!({ "count": items.len() }));
        for item in &items {
            run_hooks(&hooks.after, "after", "pop_batch_from_queue", item, queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        }
        Ok(items)
    }

    pub async fn requeue_item(
        &self,
        queue_id: &str,
        item_id: &str,
        position: RequeuePosition,
        hooks: &HookSet,
    ) -> Result<Item> {
        let ctx = ErrorContext::new("requeue_item").queue(queue_id).item(item_id);
        let mut item = self
            .get_item(queue_id, item_id)
            .await?
            .ok_or_else(|| QueueError::not_found(ctx.clone()))?;
        item.status = ItemStatus::Pending;
        item.updated_at = Some(chrono::Utc::now());
        run_hooks(&hooks.before, "before", "requeue_item", &item, queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        let body = serde_json::to_string(&item).map_err(|e| QueueError::validation(ctx.clone(), e.to_string()))?;
        let (pos_str, index) = position.into_wire();
        let updated = self
            .storage
            .requeue_item(&keys::items(queue_id), &keys::meta(queue_id), item_id, &body, pos_str, index)
            .await?;
        if updated.is_none() {
            return Err(QueueError::not_found(ctx));
        }
        self.cache.invalidate_items(queue_id);
        self.emit(EventType::ItemRequeued, queue_id, json!({ "item_id": item_id }));
        run_hooks(&hooks.after, "after", "requeue_item", &item, queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        Ok(item)
    }

    pub async fn move_item_between_queues(
        &self,
        src_queue_id: &str,
        dst_queue_id: &str,
        item_id: &str,
        position: RequeuePosition,
        hooks: &HookSet,
    ) -> Result<Item> {
        let ctx = ErrorContext::new("move_item_between_queues").queue(src_queue_id).item(item_id);
        self.require_queue(dst_queue_id, "move_item_between_queues").await?;
        let mut item = self
            .get_item(src_queue_id, item_id)
            .await?
            .ok_or_else(|| QueueError::not_found(ctx.clone()))?;
        run_hooks(&hooks.before, "before", "move_item_between_queues", &item, src_queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        item.updated_at = Some(chrono::Utc::now());
        let body = serde_json::to_string(&item).map_err(|e| QueueError::validation(ctx.clone(), e.to_string()))?;
        let (pos_str, _) = position.into_wire();
        let moved = self
            .storage
            .move_item(
                &keys::items(src_queue_id),
                &keys::meta(src_queue_id),
                &keys::items(dst_queue_id),
                &keys::meta(dst_queue_id),
                item_id,
                &body,
                pos_str,
            )
            .await?;
        if moved.is_none() {
            return Err(QueueError::not_found(ctx));
        }
        self.cache.invalidate_items(src_queue_id);
        self.cache.invalidate_items(dst_queue_id);
        self.emit(EventType::ItemMovedOut, src_queue_id, json!({ "item_id": item_id, "to": dst_queue_id }));
        self.emit(EventType::ItemMovedIn, dst_queue_id, json!({ "item_id": item_id, "from": src_queue_id }));
        run_hooks(&hooks.after, "after", "move_item_between_queues", &item, dst_queue_id, DEFAULT_HOOK_TIMEOUT).await?;
        Ok(item)
    }

    pub async fn find_item<F>(&self, queue_id: &str, predicate: F) -> Result<Option<Item>>
    where
        F: Fn(&Item) -> bool,
    {
        let items = self.get_queue_items(queue_id, 0, usize::MAX).await?;
        let found = items.into_iter().find(|i| predicate(i));
        if found.is_some() {
            self.emit(EventType::ItemFound, queue_id, json!({}));
        }
        Ok(found)
    }

    pub async fn filter_items<F>(&self, queue_id: &str, predicate: F) -> Result<Vec<Item>>
    where
        F: Fn(&Item) -> bool,
    {
        let items = self.get_queue_items(queue_id, 0, usize::MAX).await?;
        let filtered: Vec<Item> = items.into_iter().filter(|i| predicate(i)).collect();
        self.emit(EventType::ItemsFiltered, queue_id, json!({ "count": filtered.len() }));
        Ok(filtered)
    }

    pub async fn bulk_add_items(&self, queue_id: &str, bodies: Vec<serde_json::Value>, hooks: &HookSet) -> Result<Vec<Item>> {
        if bodies.len() > MAX_BULK_ITEMS {
            return Err(QueueError::validation(
                ErrorContext::new("bulk_add_items").queue(queue_id),
                format!("batch of {} exceeds max of {MAX_BULK_ITEMS}", bodies.len()),
            ));
        }
        let mut items = Vec::with_capacity(bodies.len());
        for data in bodies {
            items.push(self.add_to_queue(queue_id, data, hooks).await?);
        }
        Ok(items)
    }

    pub async fn bulk_update_item_status(
        &self,
        queue_id: &str,
        item_ids: &[String],
        status: ItemStatus,
        hooks: &HookSet,
    ) -> Result<Vec<Item>> {
        let mut updated = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            let patch = ItemPatch { status: Some(status), ..Default::default() };
            updated.push(self.update_item(queue_id, item_id, patch, hooks).await?);
        }
        Ok(updated)
    }

    pub async fn bulk_delete_items(&self, queue_id: &str, item_ids: &[String], hooks: &HookSet) -> Result<Vec<Item>> {
        let mut deleted = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            deleted.push(self.delete_item_from_queue(queue_id, item_id, hooks).await?);
        }
        Ok(deleted)
    }
}

/// Destination slot for `requeueItem`/`moveItemBetweenQueues`.
#[derive(Clone, Copy, Debug)]
pub enum RequeuePosition {
    Head,
    Tail,
    Index(usize),
}

impl RequeuePosition {
    fn into_wire(self) -> (&'static str, usize) {
        match self {
            RequeuePosition::Head => ("head", 0),
            RequeuePosition::Tail => ("tail", 0),
            RequeuePosition::Index(i) => ("index", i),
        }
    }
}
